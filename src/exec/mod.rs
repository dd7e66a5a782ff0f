// Execution control: supervised subprocess runs, process-tree termination,
// and typed command builders for the external tools.
pub mod command;
pub mod process_tree;
pub mod supervisor;

pub use command::{BuildCommand, CbTestCommand, ExecSpec, GcovCommand};
pub use supervisor::{RunOutput, Supervisor};
