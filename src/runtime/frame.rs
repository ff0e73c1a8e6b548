use std::collections::HashMap;

use crate::lang::value::Value;

/// One function activation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    pub function: String,

    /// Caller instruction to resume at. `None` for the outermost frame.
    pub return_address: Option<usize>,

    pub locals: HashMap<String, Value>,
}

impl CallFrame {
    pub fn new(function: impl Into<String>, return_address: Option<usize>) -> Self {
        Self {
            function: function.into(),
            return_address,
            locals: HashMap::new(),
        }
    }

    /// Unset locals read as integer zero.
    pub fn get_local(&self, name: &str) -> Value {
        self.locals.get(name).copied().unwrap_or_default()
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }
}
