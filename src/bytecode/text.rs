//! Textual IR format.
//!
//! ```text
//! MODULE:::
//! globals: {'total': 'I'}
//! FUNCTION::: add, ['x', 'y'], ['I', 'I'] I
//! locals: {}
//! ('LOCAL_GET', 'x')
//! ('LOCAL_GET', 'y')
//! ('ADDI',)
//! ('RET',)
//! ```
//!
//! Instruction lines use tuple literal syntax: a quoted mnemonic, then
//! operands. Names are quoted, numbers are bare (integer unless the literal
//! only parses as a float). The `globals:` and `locals:` lines are metadata;
//! a malformed metadata line is skipped with a warning.

use std::fmt::Write as _;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::bytecode::op::{DecodeError, Operand};
use crate::bytecode::{IrFunction, IrModule, Op};
use crate::lang::value::Kind;

const MODULE_TAG: &str = "MODULE:::";
const FUNCTION_TAG: &str = "FUNCTION:::";
const LOCALS_TAG: &str = "locals:";
const GLOBALS_TAG: &str = "globals:";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IrParseError {
    #[error("line {line}: unknown opcode '{mnemonic}'")]
    UnknownOpcode { line: usize, mnemonic: String },

    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("line {line}: instruction outside of any function")]
    OrphanInstruction { line: usize },

    #[error("line {line}: function '{name}' is defined more than once")]
    DuplicateFunction { line: usize, name: String },
}

impl IrParseError {
    fn from_decode(line: usize, err: DecodeError) -> Self {
        match err {
            DecodeError::UnknownOpcode(mnemonic) => IrParseError::UnknownOpcode { line, mnemonic },
            other => IrParseError::Malformed {
                line,
                message: other.to_string(),
            },
        }
    }
}

// =============================================================================
// Dump
// =============================================================================

impl IrModule {
    /// Deterministic textual form, accepted back by [`load_ir_from_string`].
    pub fn dump(&self) -> String {
        let mut lines = vec![MODULE_TAG.to_string()];

        if !self.globals.is_empty() {
            let globals = self.globals.iter().map(|(n, k)| (n.as_str(), k.code()));
            lines.push(format!("{} {}", GLOBALS_TAG, format_dict(globals)));
        }

        for func in &self.functions {
            let params = func.params.iter().map(String::as_str);
            let kinds = func.param_kinds();
            lines.push(format!(
                "{} {}, {}, {} {}",
                FUNCTION_TAG,
                func.name,
                format_list(params),
                format_list(kinds.iter().map(|k| k.code())),
                func.ret.code()
            ));

            let locals = func.declared_locals().map(|(n, k)| (n.as_str(), k.code()));
            lines.push(format!("{} {}", LOCALS_TAG, format_dict(locals)));

            for op in &func.code {
                lines.push(format_instr(op));
            }
        }

        lines.join("\n")
    }
}

pub fn format_instr(op: &Op) -> String {
    match op.operand() {
        None => format!("('{}',)", op.mnemonic()),
        Some(Operand::Int(n)) => format!("('{}', {})", op.mnemonic(), n),
        Some(Operand::Float(x)) => format!("('{}', {:?})", op.mnemonic(), x),
        Some(Operand::Name(name)) => format!("('{}', '{}')", op.mnemonic(), name),
    }
}

fn format_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::from("[");
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "'{}'", item);
    }
    out.push(']');
    out
}

fn format_dict<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::from("{");
    for (i, (key, value)) in entries.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "'{}': '{}'", key, value);
    }
    out.push('}');
    out
}

// =============================================================================
// Load
// =============================================================================

/// Parse the textual IR form produced by [`IrModule::dump`].
#[instrument(level = "debug", skip_all)]
pub fn load_ir_from_string(text: &str) -> Result<IrModule, IrParseError> {
    let mut module = IrModule::new();
    let mut current: Option<IrFunction> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();

        if trimmed.is_empty() || trimmed == MODULE_TAG {
            continue;
        }

        if let Some(header) = trimmed.strip_prefix(FUNCTION_TAG) {
            if let Some(done) = current.take() {
                finish_function(&mut module, done, line)?;
            }
            current = Some(parse_function_header(header, line)?);
        } else if let Some(rest) = trimmed.strip_prefix(LOCALS_TAG) {
            match (&mut current, Cursor::new(rest, line).metadata()) {
                (Some(func), Ok(entries)) => {
                    for (name, kind) in entries {
                        func.add_local(name, kind);
                    }
                }
                (None, _) => warn!(line, "locals line outside of any function, skipped"),
                (_, Err(err)) => warn!(line, %err, "malformed locals line, skipped"),
            }
        } else if let Some(rest) = trimmed.strip_prefix(GLOBALS_TAG) {
            match Cursor::new(rest, line).metadata() {
                Ok(entries) => {
                    for (name, kind) in entries {
                        module.add_global(name, kind);
                    }
                }
                Err(err) => warn!(line, %err, "malformed globals line, skipped"),
            }
        } else if trimmed.starts_with('(') {
            let func = current
                .as_mut()
                .ok_or(IrParseError::OrphanInstruction { line })?;
            func.emit(parse_instr(trimmed, line)?);
        } else {
            return Err(IrParseError::Malformed {
                line,
                message: format!("unrecognized line '{}'", trimmed),
            });
        }
    }

    if let Some(done) = current.take() {
        let last_line = text.lines().count();
        finish_function(&mut module, done, last_line)?;
    }

    debug!(functions = module.functions.len(), "loaded IR module");
    Ok(module)
}

fn finish_function(module: &mut IrModule, func: IrFunction, line: usize) -> Result<(), IrParseError> {
    if module.function(&func.name).is_some() {
        return Err(IrParseError::DuplicateFunction {
            line,
            name: func.name,
        });
    }
    module.add_function(func);
    Ok(())
}

fn parse_function_header(header: &str, line: usize) -> Result<IrFunction, IrParseError> {
    let mut cursor = Cursor::new(header, line);

    let name = cursor.atom()?.into_text();
    cursor.expect(',')?;
    let params = cursor.sequence('[', ']')?;
    cursor.expect(',')?;
    let kinds = cursor.sequence('[', ']')?;
    let ret = cursor.atom()?;
    cursor.finish()?;

    if params.len() != kinds.len() {
        return Err(cursor.error(format!(
            "{} parameter(s) but {} kind(s)",
            params.len(),
            kinds.len()
        )));
    }

    let mut typed = Vec::with_capacity(params.len());
    for (param, kind) in params.into_iter().zip(kinds) {
        typed.push((param.into_text(), cursor.kind(kind)?));
    }
    let ret = cursor.kind(ret)?;

    Ok(IrFunction::new(name, typed, ret))
}

fn parse_instr(text: &str, line: usize) -> Result<Op, IrParseError> {
    let mut cursor = Cursor::new(text, line);
    let atoms = cursor.sequence('(', ')')?;
    cursor.finish()?;

    let mut atoms = atoms.into_iter();
    let mnemonic = atoms
        .next()
        .ok_or_else(|| cursor.error("empty instruction"))?
        .into_text();
    let operands = atoms.map(Atom::into_operand).collect();

    Op::decode(&mnemonic, operands).map_err(|e| IrParseError::from_decode(line, e))
}

/// Token inside a line: a quoted string or a bare word/number.
#[derive(Debug, Clone, PartialEq)]
enum Atom {
    Quoted(String),
    Bare(String),
}

impl Atom {
    fn into_text(self) -> String {
        match self {
            Atom::Quoted(s) | Atom::Bare(s) => s,
        }
    }

    fn into_operand(self) -> Operand {
        match self {
            Atom::Quoted(s) => Operand::Name(s),
            Atom::Bare(s) => {
                if let Ok(n) = s.parse::<i64>() {
                    Operand::Int(n)
                } else if let Ok(x) = s.parse::<f64>() {
                    Operand::Float(x)
                } else {
                    Operand::Name(s)
                }
            }
        }
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str, line: usize) -> Self {
        Self { src, pos: 0, line }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), IrParseError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", expected)))
        }
    }

    fn finish(&mut self) -> Result<(), IrParseError> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.error(format!("trailing input '{}'", &self.src[self.pos..]))),
        }
    }

    fn error(&self, message: impl Into<String>) -> IrParseError {
        IrParseError::Malformed {
            line: self.line,
            message: message.into(),
        }
    }

    fn atom(&mut self) -> Result<Atom, IrParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.bump();
                let start = self.pos;
                loop {
                    match self.bump() {
                        Some(ch) if ch == quote => break,
                        Some(_) => {}
                        None => return Err(self.error("unterminated string")),
                    }
                }
                let end = self.pos - quote.len_utf8();
                Ok(Atom::Quoted(self.src[start..end].to_string()))
            }
            _ => {
                let start = self.pos;
                while let Some(ch) = self.peek() {
                    if ch.is_whitespace() || matches!(ch, ',' | ')' | ']' | '}' | ':') {
                        break;
                    }
                    self.bump();
                }
                if start == self.pos {
                    return Err(self.error("expected a value"));
                }
                Ok(Atom::Bare(self.src[start..self.pos].to_string()))
            }
        }
    }

    /// Comma-separated atoms between `open` and `close`; a trailing comma is allowed.
    fn sequence(&mut self, open: char, close: char) -> Result<Vec<Atom>, IrParseError> {
        self.expect(open)?;
        let mut atoms = Vec::new();
        loop {
            if self.eat(close) {
                break;
            }
            atoms.push(self.atom()?);
            if !self.eat(',') {
                self.expect(close)?;
                break;
            }
        }
        Ok(atoms)
    }

    /// `{'name': 'K', ...}` with kind codes as values.
    fn metadata(&mut self) -> Result<Vec<(String, Kind)>, IrParseError> {
        self.expect('{')?;
        let mut entries = Vec::new();
        loop {
            if self.eat('}') {
                break;
            }
            let name = self.atom()?.into_text();
            self.expect(':')?;
            let kind = self.atom()?;
            entries.push((name, self.kind(kind)?));
            if !self.eat(',') {
                self.expect('}')?;
                break;
            }
        }
        self.finish()?;
        Ok(entries)
    }

    fn kind(&self, atom: Atom) -> Result<Kind, IrParseError> {
        let code = atom.into_text();
        Kind::from_code(&code).ok_or_else(|| self.error(format!("unknown kind '{}'", code)))
    }
}
