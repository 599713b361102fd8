//! # Cascade
//!
//! Sequenced CloudFormation-style stack deployments driven by a declarative
//! plan: change-set updates, output chaining between stacks, parameter store
//! publishing and artifact staging.
//!
//! ## Usage
//!
//! ```bash
//! cascade deploy --plan deploy.yaml [--region us-west-2] [--output-dir target/cascade]
//! cascade validate --plan deploy.yaml
//! ```
//!
//! ## Modules
//!
//! - `artifact` - Local repository scan, content hashing and blob staging
//! - `audit` - Append-only narrative audit trail
//! - `cloud` - Control-plane capability traits, mocks and AWS adapters
//! - `conditions` - Boolean, value-equality and region gates
//! - `config` - Deployment plan model, loading and validation
//! - `deploy` - Change-set planner, settle poller and the run orchestrator
//! - `error` - Crate-wide error taxonomy
//! - `extract` - JSON path extraction and external command output capture
//! - `params` - Parameter resolution and output propagation
//! - `subprocess` - External command execution capability

pub mod artifact;
pub mod audit;
pub mod cloud;
pub mod conditions;
pub mod config;
pub mod deploy;
pub mod error;
pub mod extract;
pub mod params;
pub mod subprocess;
