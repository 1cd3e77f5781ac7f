pub mod command;
pub mod process;

pub use command::{EngineCommand, EngineFlag};
pub use process::{EngineProcess, TerminationFailure};
