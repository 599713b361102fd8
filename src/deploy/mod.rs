//! Stack deployment execution
//!
//! The orchestrator drives a whole deployment plan; the change set planner
//! handles one stack's create-or-update; the poller owns the waiting and
//! throttle handling both lean on.

pub mod changeset;
pub mod orchestrator;
pub mod poller;

pub use changeset::{ChangeSetPlanner, UpdateOutcome};
pub use orchestrator::DeploymentOrchestrator;
pub use poller::{Poller, PollerConfig, Probe};
