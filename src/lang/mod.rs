//! # Gox language surface
//!
//! The abstract syntax tree handed over by the (external) front end, and the
//! runtime values the stack machine operates on.
//!
//! The AST is arena-allocated: a [`program::Program`] owns every expression
//! and statement, and nodes refer to one another through `ExprId`/`StmtId`
//! indices. The program is assumed to be type-correct.

pub mod node;
pub mod program;
pub mod value;
