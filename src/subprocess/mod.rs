//! External command execution
//!
//! The orchestrator shells out to description commands (e.g. a cloud CLI)
//! whose JSON output feeds back into the parameter set. This module owns the
//! process capability: a trait, a tokio-backed production runner that drains
//! stdout and stderr concurrently, and a scripted mock for tests.

pub mod mock;
pub mod runner;

pub use mock::{MockCommandConfig, MockCommandRunner};
pub use runner::{CommandRunner, ExitStatus, ProcessCommand, ProcessError, ProcessOutput};
pub use runner::TokioCommandRunner;
