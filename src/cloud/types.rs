use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error surface shared by all remote capabilities.
///
/// `Throttled` is the one retryable class; everything else aborts the
/// operation that observed it. Adapters should classify structurally (error
/// codes) where the client exposes them and fall back to
/// [`RemoteError::from_message`] otherwise.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("Rate limited: {0}")]
    Throttled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Api(String),
}

impl RemoteError {
    /// Classify an error message when no structured code is available.
    ///
    /// The control plane signals throttling with a message containing
    /// "Rate exceeded"; matching on it is fragile but is the only signal
    /// some clients expose.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("Rate exceeded") {
            RemoteError::Throttled(message)
        } else if message.contains("does not exist") || message.contains("not found") {
            RemoteError::NotFound(message)
        } else {
            RemoteError::Api(message)
        }
    }

    pub fn is_throttle(&self) -> bool {
        matches!(self, RemoteError::Throttled(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Raw status string of a deployed stack, e.g. `CREATE_COMPLETE`.
///
/// Kept as the wire string rather than an enum: the termination rules are
/// suffix and substring checks, and unknown statuses must not break polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackStatus(pub String);

impl StackStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Any `*_IN_PROGRESS` status means the control plane is still working.
    pub fn is_in_progress(&self) -> bool {
        self.0.ends_with("_IN_PROGRESS")
    }

    /// Rollback landings mean the operation was applied and undone.
    pub fn is_rollback(&self) -> bool {
        self.0.contains("ROLLBACK")
    }

    pub fn is_create_complete(&self) -> bool {
        self.0 == "CREATE_COMPLETE"
    }

    pub fn is_update_complete(&self) -> bool {
        self.0 == "UPDATE_COMPLETE"
    }

    /// A first create that failed and rolled back leaves the stack in a
    /// state that can only be deleted, never updated.
    pub fn is_stuck_rollback(&self) -> bool {
        self.0 == "ROLLBACK_COMPLETE"
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One named output value published by a deployed stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
}

impl StackOutput {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Snapshot of a deployed stack as reported by the control plane.
#[derive(Debug, Clone)]
pub struct StackDescription {
    pub name: String,
    pub status: StackStatus,
    pub status_reason: Option<String>,
    pub outputs: Vec<StackOutput>,
}

/// Status of a change-set computation, with the planned changes once the
/// diff has landed.
#[derive(Debug, Clone, Default)]
pub struct ChangeSetState {
    pub status: String,
    pub status_reason: Option<String>,
    pub stack_id: Option<String>,
    /// One summary line per planned change, e.g. `Modify AWS::Lambda::Function web`.
    pub changes: Vec<String>,
}

impl ChangeSetState {
    pub fn is_complete(&self) -> bool {
        self.status == "CREATE_COMPLETE"
    }

    pub fn is_failed(&self) -> bool {
        self.status == "FAILED"
    }

    /// A change-set status is settled once the diff computation has landed.
    pub fn is_settled(&self) -> bool {
        self.is_complete() || self.is_failed()
    }
}

/// A key/value template parameter in the control plane's file shape.
///
/// Parameter files are JSON arrays of these objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateParameter {
    pub parameter_key: String,
    pub parameter_value: String,
}

impl TemplateParameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            parameter_key: key.into(),
            parameter_value: value.into(),
        }
    }
}

/// Value type for parameter store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParameterKind {
    #[default]
    String,
    StringList,
    SecureString,
}

impl ParameterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterKind::String => "String",
            ParameterKind::StringList => "StringList",
            ParameterKind::SecureString => "SecureString",
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A minted capability token for an assumed role.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub expiry: Option<DateTime<Utc>>,
}

/// The ambient principal, used to self-assume when no role is configured.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub arn: String,
}

/// Public URL of a staged blob-store object.
pub fn object_url(bucket: &str, key: &str) -> String {
    format!("https://s3.amazonaws.com/{bucket}/{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_classification_from_message() {
        assert!(RemoteError::from_message("Rate exceeded").is_throttle());
        assert!(RemoteError::from_message("Stack with id foo does not exist").is_not_found());
        assert!(matches!(
            RemoteError::from_message("boom"),
            RemoteError::Api(_)
        ));
    }

    #[test]
    fn stack_status_rules() {
        assert!(StackStatus::new("UPDATE_IN_PROGRESS").is_in_progress());
        assert!(StackStatus::new("CLEANUP_IN_PROGRESS").is_in_progress());
        assert!(!StackStatus::new("CREATE_COMPLETE").is_in_progress());
        assert!(StackStatus::new("UPDATE_ROLLBACK_COMPLETE").is_rollback());
        assert!(StackStatus::new("ROLLBACK_FAILED").is_rollback());
        assert!(!StackStatus::new("UPDATE_COMPLETE").is_rollback());
    }

    #[test]
    fn parameter_file_shape_round_trips() {
        let json = r#"[{"ParameterKey":"Env","ParameterValue":"prod"}]"#;
        let params: Vec<TemplateParameter> = serde_json::from_str(json).unwrap();
        assert_eq!(params, vec![TemplateParameter::new("Env", "prod")]);
    }
}
