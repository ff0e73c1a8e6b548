use thiserror::Error;

use crate::bytecode::{IrFunction, IrModule, Op};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyError {
    #[error("{function}@{ip}: stack underflow at {op}, needed {needed} item(s)")]
    StackUnderflow {
        function: String,
        ip: usize,
        op: &'static str,
        needed: usize,
    },

    #[error("{function}@{ip}: {message}")]
    StructuralMismatch {
        function: String,
        ip: usize,
        message: String,
    },

    #[error("{function}@{ip}: local '{name}' is missing from the locals table")]
    UndeclaredLocal {
        function: String,
        ip: usize,
        name: String,
    },

    #[error("{function}@{ip}: call to unknown function '{name}'")]
    UnknownFunction {
        function: String,
        ip: usize,
        name: String,
    },
}

/// Returns (pops, pushes) for an op, or None if the effect depends on the callee.
///
/// `Ret` is counted as (0, 0): it takes a value only when one is present.
pub fn effect(op: &Op) -> Option<(usize, usize)> {
    use Op::*;
    Some(match op {
        ConstI(_) | PushI(_) | ConstF(_) => (0, 1),

        AddI | SubI | MulI | DivI | ModI => (2, 1),
        AddF | SubF | MulF | DivF => (2, 1),
        EqI | NeI | LtI | LeI | GtI | GeI => (2, 1),
        EqF | NeF | LtF | LeF | GtF | GeF => (2, 1),
        AndI | OrI => (2, 1),
        ItoF | FtoI => (1, 1),

        PeekI | PeekF | PeekB => (1, 1),
        PokeI | PokeF | PokeB => (2, 0),
        Grow => (1, 0),

        LocalGet(_) | GlobalGet(_) => (0, 1),
        LocalSet(_) | GlobalSet(_) => (1, 0),

        Ret => (0, 0),

        If => (1, 0),
        Else | EndIf => (0, 0),
        Loop | EndLoop | Continue => (0, 0),
        CBreak => (1, 0),

        Drop => (1, 0),
        PrintI | PrintF | PrintB => (1, 0),

        // Arity comes from the callee.
        Call(_) => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Marker {
    If,
    Else,
    Loop,
}

/// Check one function against its module.
///
/// NOTE: the stack-height pass is a linear scan that does not follow
/// branches. Well-formed generator output nets zero per statement, so
/// underflow at any linear position means a malformed stream.
pub fn check_function(func: &IrFunction, module: &IrModule) -> Result<(), VerifyError> {
    let mut markers: Vec<Marker> = Vec::new();
    let mut height: usize = 0;

    let structural = |ip: usize, message: &str| VerifyError::StructuralMismatch {
        function: func.name.clone(),
        ip,
        message: message.to_string(),
    };

    for (ip, op) in func.code.iter().enumerate() {
        match op {
            Op::If => markers.push(Marker::If),
            Op::Else => match markers.last_mut() {
                Some(top @ Marker::If) => *top = Marker::Else,
                _ => return Err(structural(ip, "ELSE without an open IF")),
            },
            Op::EndIf => match markers.last() {
                Some(Marker::If | Marker::Else) => {
                    markers.pop();
                }
                _ => return Err(structural(ip, "ENDIF without an open IF")),
            },
            Op::Loop => markers.push(Marker::Loop),
            Op::EndLoop => match markers.last() {
                Some(Marker::Loop) => {
                    markers.pop();
                }
                _ => return Err(structural(ip, "ENDLOOP without an open LOOP")),
            },
            Op::CBreak | Op::Continue => {
                if !markers.contains(&Marker::Loop) {
                    return Err(structural(ip, &format!("{} outside of a LOOP", op.mnemonic())));
                }
            }
            Op::LocalGet(name) | Op::LocalSet(name) if !func.has_local(name) => {
                return Err(VerifyError::UndeclaredLocal {
                    function: func.name.clone(),
                    ip,
                    name: name.clone(),
                });
            }
            _ => {}
        }

        let (pops, pushes) = match (effect(op), op) {
            (Some(e), _) => e,
            (None, Op::Call(name)) => match module.function(name) {
                Some(callee) => (callee.arity(), 1),
                None => {
                    return Err(VerifyError::UnknownFunction {
                        function: func.name.clone(),
                        ip,
                        name: name.clone(),
                    });
                }
            },
            (None, _) => (0, 0),
        };

        height = height
            .checked_sub(pops)
            .ok_or_else(|| VerifyError::StackUnderflow {
                function: func.name.clone(),
                ip,
                op: op.mnemonic(),
                needed: pops,
            })?;
        height += pushes;
    }

    if let Some(open) = markers.last() {
        let name = match open {
            Marker::If | Marker::Else => "IF",
            Marker::Loop => "LOOP",
        };
        return Err(structural(func.code.len(), &format!("unclosed {}", name)));
    }

    Ok(())
}

/// Check every function in the module.
pub fn check_module(module: &IrModule) -> Result<(), VerifyError> {
    for func in &module.functions {
        check_function(func, module)?;
    }
    Ok(())
}
