//! VBM - VirtualBox VM Manager Library
//!
//! Declarative VirtualBox machines driven through `VBoxManage`: fill in a
//! spec's defaults, reconcile it into a registered machine, and read the
//! machine back from the tool's machine-readable output.

pub mod cli;
pub mod config;
pub mod decode;
pub mod error;
pub mod mock;
pub mod runner;
pub mod utils;
pub mod vm;

// Re-export commonly used types
pub use cli::commands::Cli;
pub use config::schema::{VirtualMachine, VirtualMachineSpec};
pub use error::{Error, OperationError, Result, ValidationErrors};
pub use runner::{CommandOutput, CommandRunner, VBoxManage};
pub use vm::VBox;
