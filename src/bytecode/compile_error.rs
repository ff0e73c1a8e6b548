use thiserror::Error;

use crate::lang::node::BinOp;
use crate::lang::value::Kind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenError {
    /// A node that's valid but appeared in an invalid position
    #[error("ir error: {}", describe_position(.node_type, .name, .reason, .hint))]
    InvalidPosition {
        node_type: String,
        name: Option<String>,
        reason: String,
        hint: Option<String>,
    },
    /// String literal used somewhere other than a print statement
    #[error("ir error: string literals can only appear in print statements")]
    StringNotPrintable,
    /// No IR opcode exists for this operator at this operand kind
    #[error("ir error: operator '{}' is not supported for {kind} operands", .op.symbol())]
    UnsupportedOperator { op: BinOp, kind: Kind },
    #[error("ir error: call to unknown function '{0}'")]
    UnknownFunction(String),
    #[error("ir error: '{name}' takes {expected} argument(s) but {found} were given")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("ir error: function '{0}' is declared more than once")]
    DuplicateFunction(String),
    /// `main` and `_actual_main` are generated by the compiler
    #[error("ir error: '{0}' is reserved for the generated entry point")]
    ReservedName(String),
}

impl GenError {
    /// Function declaration nested inside another body
    pub fn func_in_body(name: &str) -> Self {
        GenError::InvalidPosition {
            node_type: "function declaration".to_string(),
            name: Some(name.to_string()),
            reason: "functions cannot be declared inside another body".to_string(),
            hint: Some("move the declaration to the top level".to_string()),
        }
    }

    pub fn break_outside_loop() -> Self {
        GenError::InvalidPosition {
            node_type: "break".to_string(),
            name: None,
            reason: "break used outside of a while loop".to_string(),
            hint: None,
        }
    }

    pub fn continue_outside_loop() -> Self {
        GenError::InvalidPosition {
            node_type: "continue".to_string(),
            name: None,
            reason: "continue used outside of a while loop".to_string(),
            hint: None,
        }
    }
}

fn describe_position(
    node_type: &str,
    name: &Option<String>,
    reason: &str,
    hint: &Option<String>,
) -> String {
    let mut out = match name {
        Some(n) => format!("{} '{}': {}", node_type, n, reason),
        None => format!("{}: {}", node_type, reason),
    };
    if let Some(h) = hint {
        out.push_str(&format!("\n  hint: {}", h));
    }
    out
}
