//! # goxvm
//!
//! IR generator, IR module format and stack machine for the Gox language.
//!
//! ```text
//! Program (AST) ──IrGenerator──▶ IrModule ──dump/load──▶ text
//!                                   │
//!                                   └──▶ StackMachine::load ──▶ run("main")
//! ```

pub mod bytecode;
pub mod lang;
pub mod runtime;
