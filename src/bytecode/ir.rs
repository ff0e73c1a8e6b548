use crate::bytecode::Op;
use crate::lang::value::Kind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A compiled IR module.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IrModule {
    /// Functions in emission order. Names are unique.
    pub functions: Vec<IrFunction>,

    /// Declared globals and their kinds.
    pub globals: BTreeMap<String, Kind>,
}

impl IrModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, func: IrFunction) {
        self.functions.push(func);
    }

    pub fn add_global(&mut self, name: impl Into<String>, kind: Kind) {
        self.globals.insert(name.into(), kind);
    }

    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Binary form for caching compiled modules.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// A single function: signature, locals table and instruction stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFunction {
    pub name: String,

    /// Parameter names in binding order. Defines the arity.
    pub params: Vec<String>,

    pub ret: Kind,

    /// Every local, parameters included, with its declared kind.
    pub locals: BTreeMap<String, Kind>,

    pub code: Vec<Op>,
}

impl IrFunction {
    pub fn new(name: impl Into<String>, params: Vec<(String, Kind)>, ret: Kind) -> Self {
        let locals = params.iter().cloned().collect();
        Self {
            name: name.into(),
            params: params.into_iter().map(|(name, _)| name).collect(),
            ret,
            locals,
            code: Vec::new(),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Declare a local. An existing declaration is kept.
    pub fn add_local(&mut self, name: impl Into<String>, kind: Kind) {
        self.locals.entry(name.into()).or_insert(kind);
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.locals.contains_key(name)
    }

    pub fn param_kinds(&self) -> Vec<Kind> {
        self.params
            .iter()
            .map(|p| self.locals.get(p).copied().unwrap_or(Kind::Int))
            .collect()
    }

    /// Locals that are not parameters.
    pub fn declared_locals(&self) -> impl Iterator<Item = (&String, &Kind)> {
        self.locals
            .iter()
            .filter(|(name, _)| !self.params.iter().any(|p| p == *name))
    }

    pub fn emit(&mut self, op: Op) {
        self.code.push(op);
    }
}
