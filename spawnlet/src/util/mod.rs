//! Process and filesystem helpers shared by the orchestrator components.

mod binary;
mod process;

pub use binary::find_binary;
pub use process::{CommandOutput, run_command};
