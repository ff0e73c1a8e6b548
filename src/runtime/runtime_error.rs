use thiserror::Error;

use crate::bytecode::stack_check::VerifyError;
use crate::lang::value::Value;

/// What went wrong. Every kind is fatal to the current run.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("memory access of {width} byte(s) at {address} is out of bounds (size {size})")]
    MemoryOutOfBounds {
        address: i64,
        width: usize,
        size: usize,
    },

    #[error("malformed control flow: {0}")]
    StructuralMismatch(String),

    #[error("stack underflow")]
    StackUnderflow,

    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("value {value} does not fit in {target}")]
    ValueOutOfRange { value: Value, target: &'static str },

    #[error("{0} limit exceeded")]
    LimitExceeded(String),

    #[error("output failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("module rejected: {0}")]
    Verify(#[from] VerifyError),
}

/// Bounded view of the machine at the moment of failure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MachineSnapshot {
    pub ip: usize,
    pub function: Option<String>,
    /// Up to 10 values, bottom to top, ending at the top of the stack.
    pub stack_top: Vec<Value>,
    pub stack_depth: usize,
    /// Up to 5 globals, ordered by name.
    pub globals: Vec<(String, Value)>,
}

impl std::fmt::Display for MachineSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stack: Vec<String> = self.stack_top.iter().map(Value::to_string).collect();
        let globals: Vec<String> = self
            .globals
            .iter()
            .map(|(name, value)| format!("{} = {}", name, value))
            .collect();

        write!(f, "  ip: {}", self.ip)?;
        write!(
            f,
            "\n  function: {}",
            self.function.as_deref().unwrap_or("<none>")
        )?;
        write!(f, "\n  stack ({}): [{}]", self.stack_depth, stack.join(", "))?;
        write!(f, "\n  globals: {{{}}}", globals.join(", "))
    }
}

#[derive(Debug)]
pub struct RuntimeError {
    pub kind: VmError,
    /// Active frame names, outermost first.
    pub call_stack: Vec<String>,
    pub snapshot: MachineSnapshot,
}

impl RuntimeError {
    pub fn new(kind: VmError) -> Self {
        RuntimeError {
            kind,
            call_stack: Vec::new(),
            snapshot: MachineSnapshot::default(),
        }
    }

    pub fn function(&self) -> Option<&str> {
        self.snapshot.function.as_deref()
    }

    pub fn ip(&self) -> usize {
        self.snapshot.ip
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}", self.kind)?;

        if let Some(function) = self.function() {
            write!(f, "\n  at {}@{}", function, self.ip())?;
        }

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.call_stack.iter().rev().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<VmError> for RuntimeError {
    fn from(kind: VmError) -> Self {
        RuntimeError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_lists_frames_innermost_first() {
        let err = RuntimeError {
            kind: VmError::DivisionByZero,
            call_stack: vec!["main".into(), "_actual_main".into(), "div".into()],
            snapshot: MachineSnapshot {
                ip: 2,
                function: Some("div".into()),
                ..Default::default()
            },
        };

        let msg = err.to_string();
        assert!(msg.starts_with("runtime error: division by zero"));
        assert!(msg.contains("at div@2"));
        assert!(msg.contains("0: div"));
        assert!(msg.contains("2: main"));
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = MachineSnapshot {
            ip: 7,
            function: Some("f".into()),
            stack_top: vec![Value::Int(1), Value::Float(2.0)],
            stack_depth: 2,
            globals: vec![("g".into(), Value::Int(3))],
        };

        let text = snapshot.to_string();
        assert!(text.contains("ip: 7"));
        assert!(text.contains("stack (2): [1, 2.0]"));
        assert!(text.contains("globals: {g = 3}"));
    }

    #[test]
    fn test_memory_error_message() {
        let err = VmError::MemoryOutOfBounds {
            address: 4096,
            width: 4,
            size: 4096,
        };
        assert_eq!(
            err.to_string(),
            "memory access of 4 byte(s) at 4096 is out of bounds (size 4096)"
        );
    }
}
