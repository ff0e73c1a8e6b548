use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// OP - IR instructions
// =============================================================================

/// One IR instruction.
///
/// There are no jump offsets: `If`/`Else`/`EndIf` and `Loop`/`CBreak`/`EndLoop`
/// are structural markers resolved by the machine at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    // literals
    ConstI(i64),
    PushI(i64),
    ConstF(f64),

    // integer arithmetic
    AddI,
    SubI,
    MulI,
    DivI,
    ModI,

    // float arithmetic
    AddF,
    SubF,
    MulF,
    DivF,

    // integer comparison
    EqI,
    NeI,
    LtI,
    LeI,
    GtI,
    GeI,

    // float comparison
    EqF,
    NeF,
    LtF,
    LeF,
    GtF,
    GeF,

    // logic
    AndI,
    OrI,

    // conversion
    ItoF,
    FtoI,

    // memory
    PeekI,
    PokeI,
    PeekF,
    PokeF,
    PeekB,
    PokeB,
    Grow,

    // variables
    LocalGet(String),
    LocalSet(String),
    GlobalGet(String),
    GlobalSet(String),

    // ==========================================================================
    // Calls
    // ==========================================================================
    Call(String),
    Ret,

    // ==========================================================================
    // Structural control flow
    // ==========================================================================
    /// Pop a condition; when it is zero, skip to the matching `Else` or `EndIf`.
    If,
    /// Reached at the end of a then-branch: skip to the matching `EndIf`.
    Else,
    EndIf,
    /// Open a loop. The loop re-enters at the instruction right after it.
    Loop,
    /// Pop a condition; when it is zero, leave the innermost loop.
    CBreak,
    /// Jump back to the instruction right after the innermost `Loop`.
    EndLoop,
    /// Same target as `EndLoop`, usable from anywhere in the loop body.
    Continue,

    // stack
    Drop,

    // I/O
    PrintI,
    PrintF,
    PrintB,
}

/// Operand of an instruction as it appears in the text form.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Int(i64),
    Float(f64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(String),

    #[error("{mnemonic} expects {expected}")]
    Operands {
        mnemonic: String,
        expected: &'static str,
    },
}

impl Op {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::ConstI(_) => "CONSTI",
            Op::PushI(_) => "PUSHI",
            Op::ConstF(_) => "CONSTF",
            Op::AddI => "ADDI",
            Op::SubI => "SUBI",
            Op::MulI => "MULI",
            Op::DivI => "DIVI",
            Op::ModI => "MODI",
            Op::AddF => "ADDF",
            Op::SubF => "SUBF",
            Op::MulF => "MULF",
            Op::DivF => "DIVF",
            Op::EqI => "EQI",
            Op::NeI => "NEI",
            Op::LtI => "LTI",
            Op::LeI => "LEI",
            Op::GtI => "GTI",
            Op::GeI => "GEI",
            Op::EqF => "EQF",
            Op::NeF => "NEF",
            Op::LtF => "LTF",
            Op::LeF => "LEF",
            Op::GtF => "GTF",
            Op::GeF => "GEF",
            Op::AndI => "ANDI",
            Op::OrI => "ORI",
            Op::ItoF => "ITOF",
            Op::FtoI => "FTOI",
            Op::PeekI => "PEEKI",
            Op::PokeI => "POKEI",
            Op::PeekF => "PEEKF",
            Op::PokeF => "POKEF",
            Op::PeekB => "PEEKB",
            Op::PokeB => "POKEB",
            Op::Grow => "GROW",
            Op::LocalGet(_) => "LOCAL_GET",
            Op::LocalSet(_) => "LOCAL_SET",
            Op::GlobalGet(_) => "GLOBAL_GET",
            Op::GlobalSet(_) => "GLOBAL_SET",
            Op::Call(_) => "CALL",
            Op::Ret => "RET",
            Op::If => "IF",
            Op::Else => "ELSE",
            Op::EndIf => "ENDIF",
            Op::Loop => "LOOP",
            Op::CBreak => "CBREAK",
            Op::EndLoop => "ENDLOOP",
            Op::Continue => "CONTINUE",
            Op::Drop => "DROP",
            Op::PrintI => "PRINTI",
            Op::PrintF => "PRINTF",
            Op::PrintB => "PRINTB",
        }
    }

    pub fn operand(&self) -> Option<Operand> {
        match self {
            Op::ConstI(n) | Op::PushI(n) => Some(Operand::Int(*n)),
            Op::ConstF(x) => Some(Operand::Float(*x)),
            Op::LocalGet(name)
            | Op::LocalSet(name)
            | Op::GlobalGet(name)
            | Op::GlobalSet(name)
            | Op::Call(name) => Some(Operand::Name(name.clone())),
            _ => None,
        }
    }

    /// Rebuild an instruction from its mnemonic and operands.
    pub fn decode(mnemonic: &str, operands: Vec<Operand>) -> Result<Op, DecodeError> {
        let mut operands = operands.into_iter();
        let first = operands.next();
        if operands.next().is_some() {
            return Err(DecodeError::Operands {
                mnemonic: mnemonic.to_string(),
                expected: "at most one operand",
            });
        }

        let bad = |expected: &'static str| DecodeError::Operands {
            mnemonic: mnemonic.to_string(),
            expected,
        };

        let int = |operand: Option<Operand>| match operand {
            Some(Operand::Int(n)) => Ok(n),
            _ => Err(bad("an integer operand")),
        };
        let name = |operand: Option<Operand>| match operand {
            Some(Operand::Name(s)) => Ok(s),
            _ => Err(bad("a name operand")),
        };

        let op = match mnemonic {
            "CONSTI" => Op::ConstI(int(first)?),
            "PUSHI" => Op::PushI(int(first)?),
            "CONSTF" => match first {
                Some(Operand::Float(x)) => Op::ConstF(x),
                Some(Operand::Int(n)) => Op::ConstF(n as f64),
                _ => return Err(bad("a numeric operand")),
            },
            "LOCAL_GET" => Op::LocalGet(name(first)?),
            "LOCAL_SET" => Op::LocalSet(name(first)?),
            "GLOBAL_GET" => Op::GlobalGet(name(first)?),
            "GLOBAL_SET" => Op::GlobalSet(name(first)?),
            "CALL" => Op::Call(name(first)?),
            other => {
                let op = match other {
                    "ADDI" => Op::AddI,
                    "SUBI" => Op::SubI,
                    "MULI" => Op::MulI,
                    "DIVI" => Op::DivI,
                    "MODI" => Op::ModI,
                    "ADDF" => Op::AddF,
                    "SUBF" => Op::SubF,
                    "MULF" => Op::MulF,
                    "DIVF" => Op::DivF,
                    "EQI" => Op::EqI,
                    "NEI" => Op::NeI,
                    "LTI" => Op::LtI,
                    "LEI" => Op::LeI,
                    "GTI" => Op::GtI,
                    "GEI" => Op::GeI,
                    "EQF" => Op::EqF,
                    "NEF" => Op::NeF,
                    "LTF" => Op::LtF,
                    "LEF" => Op::LeF,
                    "GTF" => Op::GtF,
                    "GEF" => Op::GeF,
                    "ANDI" => Op::AndI,
                    "ORI" => Op::OrI,
                    "ITOF" => Op::ItoF,
                    "FTOI" => Op::FtoI,
                    "PEEKI" => Op::PeekI,
                    "POKEI" => Op::PokeI,
                    "PEEKF" => Op::PeekF,
                    "POKEF" => Op::PokeF,
                    "PEEKB" => Op::PeekB,
                    "POKEB" => Op::PokeB,
                    "GROW" => Op::Grow,
                    "RET" => Op::Ret,
                    "IF" => Op::If,
                    "ELSE" => Op::Else,
                    "ENDIF" => Op::EndIf,
                    "LOOP" => Op::Loop,
                    "CBREAK" => Op::CBreak,
                    "ENDLOOP" => Op::EndLoop,
                    "CONTINUE" => Op::Continue,
                    "DROP" => Op::Drop,
                    "PRINTI" => Op::PrintI,
                    "PRINTF" => Op::PrintF,
                    "PRINTB" => Op::PrintB,
                    unknown => return Err(DecodeError::UnknownOpcode(unknown.to_string())),
                };
                if first.is_some() {
                    return Err(bad("no operands"));
                }
                op
            }
        };

        Ok(op)
    }
}
