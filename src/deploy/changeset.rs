//! Create-or-update execution through change sets
//!
//! An existing stack is never updated blind: a change set is created first,
//! inspected for an empty diff, and only executed when it carries changes.
//! A missing stack is created directly. Both paths poll afterwards until
//! the stack settles and record the narrative lines for the audit trail.

use std::sync::Arc;

use uuid::Uuid;

use crate::audit::AuditSink;
use crate::cloud::{ChangeSetState, RemoteError, StackApi, StackDescription, TemplateParameter};
use crate::error::{Error, Result};

use super::poller::{Poller, Probe};

/// Status reason prefix the control plane uses for an empty diff.
const NO_CHANGES_REASON: &str = "The submitted information didn't contain changes.";

/// Result of updating an existing stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The change set was empty; nothing was executed.
    NoChanges,

    /// The change set executed and the stack settled cleanly.
    Updated { stack_id: String },
}

/// Creates stacks and drives updates through change sets.
pub struct ChangeSetPlanner {
    stacks: Arc<dyn StackApi>,
    audit: Arc<dyn AuditSink>,
    poller: Poller,
}

impl ChangeSetPlanner {
    pub fn new(stacks: Arc<dyn StackApi>, audit: Arc<dyn AuditSink>) -> Self {
        Self::with_poller(stacks, audit, Poller::default())
    }

    pub fn with_poller(
        stacks: Arc<dyn StackApi>,
        audit: Arc<dyn AuditSink>,
        poller: Poller,
    ) -> Self {
        Self {
            stacks,
            audit,
            poller,
        }
    }

    /// Look a stack up, tolerating the transient misses the control plane
    /// produces right after mutations. `Ok(None)` is the definitive
    /// negative: the stack does not exist.
    pub async fn find_stack(&self, name: &str) -> Result<Option<StackDescription>> {
        let stacks = self.stacks.as_ref();
        let found = self
            .poller
            .run(move || async move {
                match stacks.describe(name).await {
                    Ok(Some(description)) => Ok(Probe::Terminal(description)),
                    Ok(None) => Ok(Probe::Ambiguous),
                    Err(e) if e.is_not_found() => Ok(Probe::Ambiguous),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(cloud_error)?;
        Ok(found)
    }

    /// Create a stack and wait for it to reach CREATE_COMPLETE.
    pub async fn create(
        &self,
        name: &str,
        template_url: &str,
        parameters: &[TemplateParameter],
        requires_iam: bool,
    ) -> Result<()> {
        let stack_id = self
            .poller
            .retry_on_throttle(|| self.stacks.create(name, template_url, parameters, requires_iam))
            .await
            .map_err(cloud_error)?;

        self.audit.record(&format!("Created {name} with id: {stack_id}."));

        let description = self.wait_for_settled(name).await?;
        if !description.status.is_create_complete() {
            return Err(Error::Deploy(format!(
                "CloudFormation Error: The stack ({name}) landed in {} instead of CREATE_COMPLETE.",
                description.status
            )));
        }
        self.audit.record("Stack Finished.");
        Ok(())
    }

    /// Update a stack through a change set.
    ///
    /// An empty diff is reported and the unexecuted change set deleted; a
    /// diff with changes is executed and the stack polled until it settles.
    pub async fn update(
        &self,
        name: &str,
        template_url: &str,
        parameters: &[TemplateParameter],
        requires_iam: bool,
    ) -> Result<UpdateOutcome> {
        let change_set = format!("N-{}", Uuid::new_v4());

        self.poller
            .retry_on_throttle(|| {
                self.stacks
                    .create_change_set(name, &change_set, template_url, parameters, requires_iam)
            })
            .await
            .map_err(cloud_error)?;

        let state = self.wait_for_change_set(name, &change_set).await?;

        if state.is_failed() {
            let reason = state.status_reason.clone().unwrap_or_default();
            if !reason.starts_with(NO_CHANGES_REASON) {
                return Err(Error::Deploy(format!("ChangeSet Error: {reason}")));
            }
        }

        if state.changes.is_empty() {
            self.audit.record("No changes to the Stack required.");
            // An unexecuted change set stays listed on the stack until
            // deleted.
            if let Err(e) = self.stacks.delete_change_set(name, &change_set).await {
                tracing::warn!("could not delete empty change set {change_set}: {e}");
            }
            return Ok(UpdateOutcome::NoChanges);
        }

        self.poller
            .retry_on_throttle(|| self.stacks.execute_change_set(name, &change_set))
            .await
            .map_err(cloud_error)?;

        let description = self.wait_for_settled(name).await?;
        if !description.status.is_update_complete() {
            return Err(Error::Deploy(format!(
                "CloudFormation Error: The stack ({name}) landed in {} instead of UPDATE_COMPLETE.",
                description.status
            )));
        }

        let stack_id = state.stack_id.clone().unwrap_or_default();
        self.audit
            .record(&format!("Updated {name} with id: {stack_id}."));
        self.audit.record("Stack Finished.");

        Ok(UpdateOutcome::Updated { stack_id })
    }

    /// Poll a stack until it leaves its in-progress states.
    async fn wait_for_settled(&self, name: &str) -> Result<StackDescription> {
        let stacks = self.stacks.as_ref();
        let settled = self
            .poller
            .run(move || async move {
                match stacks.describe(name).await {
                    Ok(Some(description)) if description.status.is_in_progress() => {
                        Ok(Probe::Pending)
                    }
                    Ok(Some(description)) => Ok(Probe::Terminal(description)),
                    Ok(None) => Ok(Probe::Ambiguous),
                    Err(e) if e.is_not_found() => Ok(Probe::Ambiguous),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(cloud_error)?;

        settled.ok_or_else(|| {
            Error::Deploy(format!(
                "The stack ({name}) was not found while waiting for it to settle."
            ))
        })
    }

    async fn wait_for_change_set(&self, stack: &str, change_set: &str) -> Result<ChangeSetState> {
        let stacks = self.stacks.as_ref();
        let settled = self
            .poller
            .run(move || async move {
                match stacks.describe_change_set(stack, change_set).await {
                    Ok(state) if state.is_settled() => Ok(Probe::Terminal(state)),
                    Ok(_) => Ok(Probe::Pending),
                    Err(e) if e.is_not_found() => Ok(Probe::Ambiguous),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(cloud_error)?;

        settled.ok_or_else(|| {
            Error::Deploy(format!(
                "The change set ({change_set}) was not found while waiting for it to settle."
            ))
        })
    }
}

fn cloud_error(e: RemoteError) -> Error {
    Error::Deploy(format!("CloudFormation Error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::mocks::MemoryAudit;
    use crate::cloud::mock::MockCloud;
    use crate::deploy::poller::PollerConfig;
    use std::time::Duration;

    struct Fixture {
        planner: ChangeSetPlanner,
        cloud: MockCloud,
        audit: Arc<MemoryAudit>,
    }

    fn fixture() -> Fixture {
        let cloud = MockCloud::new();
        let set = cloud.cloud_set();
        let audit = Arc::new(MemoryAudit::new());
        let poller = Poller::new(PollerConfig {
            backoff_ceiling: Duration::from_millis(2),
            throttle_delay: Duration::from_millis(1),
            ambiguity_budget: 3,
        });
        let planner = ChangeSetPlanner::with_poller(set.stacks.clone(), audit.clone(), poller);
        Fixture {
            planner,
            cloud,
            audit,
        }
    }

    fn params() -> Vec<TemplateParameter> {
        vec![TemplateParameter::new("Environment", "prod")]
    }

    #[tokio::test]
    async fn absent_stack_is_a_definitive_negative() {
        let f = fixture();
        let found = f.planner.find_stack("api").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn find_stack_outlasts_transient_misses() {
        let f = fixture();
        f.cloud
            .stacks
            .queue_describe("api", Err(RemoteError::NotFound("does not exist".into())));
        f.cloud.stacks.queue_stack("api", "CREATE_COMPLETE", &[]);

        let found = f.planner.find_stack("api").await.unwrap();
        assert_eq!(found.unwrap().status.as_str(), "CREATE_COMPLETE");
    }

    #[tokio::test]
    async fn create_waits_for_the_stack_to_settle() {
        let f = fixture();
        f.cloud.stacks.queue_stack("api", "CREATE_IN_PROGRESS", &[]);
        f.cloud.stacks.queue_stack("api", "CREATE_COMPLETE", &[]);

        f.planner
            .create("api", "https://s3.amazonaws.com/t/1-api.yaml", &params(), false)
            .await
            .unwrap();

        assert_eq!(f.cloud.stacks.created().len(), 1);
        assert!(f.audit.contains("Created api with id: api/mock-stack-id."));
        assert!(f.audit.contains("Stack Finished."));
    }

    #[tokio::test]
    async fn create_fails_when_the_stack_rolls_back() {
        let f = fixture();
        f.cloud.stacks.queue_stack("api", "CREATE_IN_PROGRESS", &[]);
        f.cloud.stacks.queue_stack("api", "ROLLBACK_COMPLETE", &[]);

        let err = f
            .planner
            .create("api", "https://s3.amazonaws.com/t/1-api.yaml", &params(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ROLLBACK_COMPLETE"));
        assert!(!f.audit.contains("Stack Finished."));
    }

    #[tokio::test]
    async fn empty_diff_deletes_the_change_set() {
        let f = fixture();
        f.cloud.stacks.queue_change_set_settled(
            "api",
            "FAILED",
            Some("The submitted information didn't contain changes. Submit different information."),
            &[],
        );

        let outcome = f
            .planner
            .update("api", "https://s3.amazonaws.com/t/1-api.yaml", &params(), false)
            .await
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::NoChanges);
        assert!(f.audit.contains("No changes to the Stack required."));
        assert_eq!(f.cloud.stacks.executed().len(), 0);
        assert_eq!(f.cloud.stacks.deleted().len(), 1);
    }

    #[tokio::test]
    async fn failed_change_set_surfaces_the_reason() {
        let f = fixture();
        f.cloud.stacks.queue_change_set_settled(
            "api",
            "FAILED",
            Some("Parameters: [VpcId] must have values"),
            &[],
        );

        let err = f
            .planner
            .update("api", "https://s3.amazonaws.com/t/1-api.yaml", &params(), false)
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("ChangeSet Error: Parameters: [VpcId] must have values"));
        assert_eq!(f.cloud.stacks.deleted().len(), 0);
    }

    #[tokio::test]
    async fn changes_are_executed_and_polled_to_completion() {
        let f = fixture();
        f.cloud.stacks.queue_change_set(
            "api",
            Ok(ChangeSetState {
                status: "CREATE_IN_PROGRESS".into(),
                status_reason: None,
                stack_id: None,
                changes: vec![],
            }),
        );
        f.cloud
            .stacks
            .queue_change_set_settled("api", "CREATE_COMPLETE", None, &["Modify AppFunction"]);
        f.cloud.stacks.queue_stack("api", "UPDATE_IN_PROGRESS", &[]);
        f.cloud.stacks.queue_stack("api", "UPDATE_COMPLETE", &[]);

        let outcome = f
            .planner
            .update("api", "https://s3.amazonaws.com/t/1-api.yaml", &params(), true)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            UpdateOutcome::Updated {
                stack_id: "api/mock-stack-id".into()
            }
        );
        assert_eq!(f.cloud.stacks.executed().len(), 1);
        let requested = f.cloud.stacks.change_sets_requested();
        assert_eq!(requested.len(), 1);
        assert!(requested[0].change_set.starts_with("N-"));
        assert!(f.audit.contains("Updated api with id: api/mock-stack-id."));
        assert!(f.audit.contains("Stack Finished."));
    }

    #[tokio::test]
    async fn update_fails_when_the_stack_rolls_back() {
        let f = fixture();
        f.cloud
            .stacks
            .queue_change_set_settled("api", "CREATE_COMPLETE", None, &["Modify AppFunction"]);
        f.cloud
            .stacks
            .queue_stack("api", "UPDATE_ROLLBACK_COMPLETE", &[]);

        let err = f
            .planner
            .update("api", "https://s3.amazonaws.com/t/1-api.yaml", &params(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("UPDATE_ROLLBACK_COMPLETE"));
    }

    #[tokio::test]
    async fn complete_but_empty_diff_counts_as_no_changes() {
        let f = fixture();
        f.cloud
            .stacks
            .queue_change_set_settled("api", "CREATE_COMPLETE", None, &[]);

        let outcome = f
            .planner
            .update("api", "https://s3.amazonaws.com/t/1-api.yaml", &params(), false)
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::NoChanges);
        assert_eq!(f.cloud.stacks.executed().len(), 0);
    }
}
