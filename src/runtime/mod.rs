pub mod config;
pub mod frame;
pub mod memory;
pub mod runtime_error;
pub mod vm;

pub use config::VmConfig;
pub use runtime_error::{MachineSnapshot, RuntimeError, VmError};
pub use vm::{MachineState, StackMachine};
