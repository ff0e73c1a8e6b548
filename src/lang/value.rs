use serde::{Deserialize, Serialize};

/// Runtime value in the Gox stack machine.
///
/// Values are the only data that can exist on the operand stack, in frame
/// locals and in globals. Booleans and chars are represented as integers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),

    /// 64-bit floating-point number.
    Float(f64),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
        }
    }

    /// Numeric view used by the float opcode family.
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Int(n) => n as f64,
            Value::Float(f) => f,
        }
    }

    /// Integer view used by conversions and printing. Floats truncate toward zero.
    pub fn as_i64(self) -> i64 {
        match self {
            Value::Int(n) => n,
            Value::Float(f) => f as i64,
        }
    }

    pub fn is_truthy(self) -> bool {
        match self {
            Value::Int(n) => n != 0,
            Value::Float(f) => f != 0.0,
        }
    }
}

impl Default for Value {
    /// Unset locals and globals read as integer zero.
    fn default() -> Self {
        Value::Int(0)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(b as i64)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            // Debug keeps the fractional part: `3.0`, not `3`.
            Value::Float(x) => write!(f, "{:?}", x),
        }
    }
}

/// Declared kind of a variable, parameter or function result.
///
/// Kinds are static metadata: the generator uses them to pick opcode
/// families and the IR text format records them as one-letter codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Int,
    Float,
    Char,
    Bool,
    /// Result kind of a function that returns nothing.
    Void,
}

impl Kind {
    /// One-letter code used in the IR text format.
    pub fn code(self) -> &'static str {
        match self {
            Kind::Int => "I",
            Kind::Float => "F",
            Kind::Char => "C",
            Kind::Bool => "B",
            Kind::Void => "V",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "I" => Some(Kind::Int),
            "F" => Some(Kind::Float),
            "C" => Some(Kind::Char),
            "B" => Some(Kind::Bool),
            "V" => Some(Kind::Void),
            _ => None,
        }
    }

    pub fn is_float(self) -> bool {
        self == Kind::Float
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Char => "char",
            Kind::Bool => "bool",
            Kind::Void => "void",
        };
        write!(f, "{}", name)
    }
}
