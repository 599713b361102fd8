//! Remote capabilities consumed by the deployment engine
//!
//! The engine talks to the control plane only through the traits defined
//! here; no SDK vocabulary appears outside the feature-gated adapters. Each
//! capability ships a deterministic in-memory mock, so the whole engine runs
//! under test without touching the network.

pub mod mock;
pub mod types;

#[cfg(feature = "aws")]
pub mod aws;

pub use types::{
    object_url, CallerIdentity, ChangeSetState, ParameterKind, RemoteError, SessionToken,
    StackDescription, StackOutput, StackStatus, TemplateParameter,
};

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::audit::AuditSink;
use crate::error::Error;

/// Stack lifecycle operations against the control plane.
#[async_trait]
pub trait StackApi: Send + Sync {
    /// Describe a stack; `Ok(None)` means it does not exist.
    async fn describe(&self, name: &str) -> Result<Option<StackDescription>, RemoteError>;

    /// Create a fresh stack from a staged template and return its id.
    async fn create(
        &self,
        name: &str,
        template_url: &str,
        parameters: &[TemplateParameter],
        requires_iam: bool,
    ) -> Result<String, RemoteError>;

    /// Request a diff of an existing stack against a new template.
    async fn create_change_set(
        &self,
        stack: &str,
        change_set: &str,
        template_url: &str,
        parameters: &[TemplateParameter],
        requires_iam: bool,
    ) -> Result<String, RemoteError>;

    async fn describe_change_set(
        &self,
        stack: &str,
        change_set: &str,
    ) -> Result<ChangeSetState, RemoteError>;

    async fn execute_change_set(&self, stack: &str, change_set: &str)
        -> Result<(), RemoteError>;

    async fn delete_change_set(&self, stack: &str, change_set: &str) -> Result<(), RemoteError>;
}

/// Remote key/value store with encrypted values.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Read a value; `Ok(None)` means the key does not exist.
    async fn get(&self, name: &str, decrypt: bool) -> Result<Option<String>, RemoteError>;

    async fn put(
        &self,
        name: &str,
        value: &str,
        kind: ParameterKind,
        description: &str,
        overwrite: bool,
    ) -> Result<(), RemoteError>;
}

/// Blob storage for staged artifacts and templates.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<(), RemoteError>;
}

/// Token minting for role assumption.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Assume a role and return a capability token for it.
    async fn assume(&self, role: &str) -> Result<SessionToken, RemoteError>;

    /// The ambient principal the process is running as.
    async fn identity(&self) -> Result<CallerIdentity, RemoteError>;
}

/// The bundle of remote capabilities one deployment run operates through.
#[derive(Clone)]
pub struct CloudSet {
    pub stacks: Arc<dyn StackApi>,
    pub params: Arc<dyn ParameterStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub credentials: Arc<dyn CredentialProvider>,
}

impl CloudSet {
    /// A fully scripted bundle plus handles for seeding and assertions.
    pub fn mock() -> (Self, mock::MockCloud) {
        let handles = mock::MockCloud::new();
        (handles.cloud_set(), handles)
    }
}

/// Builds capability bundles bound to a credential token.
///
/// The orchestrator rebuilds its bundle whenever it assumes (or re-assumes) a
/// role, and the output mapper builds one-off parameter stores for mappings
/// that write under their own role. `None` means ambient credentials.
pub trait CloudFactory: Send + Sync {
    fn build(&self, token: Option<&SessionToken>) -> CloudSet;

    fn parameter_store(&self, token: Option<&SessionToken>) -> Arc<dyn ParameterStore>;
}

/// Role assumption with the audit narrative attached.
///
/// Every place a role can be configured (the plan, a unit, an output
/// mapping) funnels through here, so the trail always shows which principal
/// performed the calls that followed. Assumption always happens under the
/// ambient credentials, never under a previously minted token.
pub struct CredentialBroker {
    credentials: Arc<dyn CredentialProvider>,
    audit: Arc<dyn AuditSink>,
}

impl CredentialBroker {
    pub fn new(credentials: Arc<dyn CredentialProvider>, audit: Arc<dyn AuditSink>) -> Self {
        Self { credentials, audit }
    }

    /// Assume the given role; `None` reports ambient credentials and mints
    /// nothing.
    pub async fn assume(&self, role: Option<&str>) -> Result<Option<SessionToken>, Error> {
        let Some(arn) = role else {
            self.audit.record("roleArn: From default provider chain.");
            return Ok(None);
        };
        self.audit.record(&format!("roleArn: {arn}"));
        match self.credentials.assume(arn).await {
            Ok(token) => {
                self.audit.record("Role assumed.");
                Ok(Some(token))
            }
            Err(e) => {
                self.audit.record("Wasn't able to assume role.");
                self.audit.record(&e.to_string());
                Err(Error::Validation("Unable to assume role.".into()))
            }
        }
    }
}
