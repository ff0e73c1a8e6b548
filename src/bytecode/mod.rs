pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod stack_check;
pub mod text;

pub use compile::IrGenerator;
pub use compile_error::GenError;
pub use ir::{IrFunction, IrModule};
pub use op::Op;
pub use text::{IrParseError, load_ir_from_string};
