//! Scripted in-memory capabilities for tests.
//!
//! Responses are queued per operation; the last queued response is sticky so
//! poll loops can run past the scripted prefix. Every call is recorded for
//! assertions.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::types::{
    CallerIdentity, ChangeSetState, ParameterKind, RemoteError, SessionToken, StackDescription,
    StackOutput, StackStatus, TemplateParameter,
};
use super::{
    ArtifactStore, CloudFactory, CloudSet, CredentialProvider, ParameterStore, StackApi,
};

fn pop_sticky<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[derive(Debug, Clone)]
pub struct CreateRecord {
    pub name: String,
    pub template_url: String,
    pub parameters: Vec<TemplateParameter>,
    pub requires_iam: bool,
}

#[derive(Debug, Clone)]
pub struct ChangeSetRecord {
    pub stack: String,
    pub change_set: String,
    pub template_url: String,
    pub parameters: Vec<TemplateParameter>,
}

#[derive(Default)]
pub struct MockStackApi {
    describes: Mutex<HashMap<String, VecDeque<Result<Option<StackDescription>, RemoteError>>>>,
    change_set_states: Mutex<HashMap<String, VecDeque<Result<ChangeSetState, RemoteError>>>>,
    created: Mutex<Vec<CreateRecord>>,
    change_sets: Mutex<Vec<ChangeSetRecord>>,
    executed: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<(String, String)>>,
}

impl MockStackApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw describe response for a stack name.
    pub fn queue_describe(
        &self,
        name: &str,
        response: Result<Option<StackDescription>, RemoteError>,
    ) {
        self.describes
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue a successful describe with the given status and outputs.
    pub fn queue_stack(&self, name: &str, status: &str, outputs: &[(&str, &str)]) {
        self.queue_describe(
            name,
            Ok(Some(StackDescription {
                name: name.to_string(),
                status: StackStatus::new(status),
                status_reason: None,
                outputs: outputs
                    .iter()
                    .map(|(k, v)| StackOutput::new(*k, *v))
                    .collect(),
            })),
        );
    }

    /// Queue a change-set describe response for a stack name.
    pub fn queue_change_set(&self, stack: &str, response: Result<ChangeSetState, RemoteError>) {
        self.change_set_states
            .lock()
            .unwrap()
            .entry(stack.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue a settled change-set state with the given status and changes.
    pub fn queue_change_set_settled(
        &self,
        stack: &str,
        status: &str,
        reason: Option<&str>,
        changes: &[&str],
    ) {
        self.queue_change_set(
            stack,
            Ok(ChangeSetState {
                status: status.to_string(),
                status_reason: reason.map(|r| r.to_string()),
                stack_id: Some(format!("{stack}/mock-stack-id")),
                changes: changes.iter().map(|c| c.to_string()).collect(),
            }),
        );
    }

    pub fn created(&self) -> Vec<CreateRecord> {
        self.created.lock().unwrap().clone()
    }

    pub fn change_sets_requested(&self) -> Vec<ChangeSetRecord> {
        self.change_sets.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<(String, String)> {
        self.executed.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl StackApi for MockStackApi {
    async fn describe(&self, name: &str) -> Result<Option<StackDescription>, RemoteError> {
        let mut describes = self.describes.lock().unwrap();
        match describes.get_mut(name).and_then(pop_sticky) {
            Some(response) => response,
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        name: &str,
        template_url: &str,
        parameters: &[TemplateParameter],
        requires_iam: bool,
    ) -> Result<String, RemoteError> {
        self.created.lock().unwrap().push(CreateRecord {
            name: name.to_string(),
            template_url: template_url.to_string(),
            parameters: parameters.to_vec(),
            requires_iam,
        });
        Ok(format!("{name}/mock-stack-id"))
    }

    async fn create_change_set(
        &self,
        stack: &str,
        change_set: &str,
        template_url: &str,
        parameters: &[TemplateParameter],
        _requires_iam: bool,
    ) -> Result<String, RemoteError> {
        self.change_sets.lock().unwrap().push(ChangeSetRecord {
            stack: stack.to_string(),
            change_set: change_set.to_string(),
            template_url: template_url.to_string(),
            parameters: parameters.to_vec(),
        });
        Ok(format!("{change_set}/mock-change-set-id"))
    }

    async fn describe_change_set(
        &self,
        stack: &str,
        _change_set: &str,
    ) -> Result<ChangeSetState, RemoteError> {
        let mut states = self.change_set_states.lock().unwrap();
        match states.get_mut(stack).and_then(pop_sticky) {
            Some(response) => response,
            None => Err(RemoteError::NotFound(format!(
                "no change set scripted for stack {stack}"
            ))),
        }
    }

    async fn execute_change_set(
        &self,
        stack: &str,
        change_set: &str,
    ) -> Result<(), RemoteError> {
        self.executed
            .lock()
            .unwrap()
            .push((stack.to_string(), change_set.to_string()));
        Ok(())
    }

    async fn delete_change_set(&self, stack: &str, change_set: &str) -> Result<(), RemoteError> {
        self.deleted
            .lock()
            .unwrap()
            .push((stack.to_string(), change_set.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PutRecord {
    pub name: String,
    pub value: String,
    pub kind: ParameterKind,
    pub description: String,
    pub overwrite: bool,
}

#[derive(Default)]
pub struct MockParameterStore {
    values: Mutex<HashMap<String, String>>,
    puts: Mutex<Vec<PutRecord>>,
}

impl MockParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, name: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }

    pub fn puts(&self) -> Vec<PutRecord> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ParameterStore for MockParameterStore {
    async fn get(&self, name: &str, _decrypt: bool) -> Result<Option<String>, RemoteError> {
        Ok(self.values.lock().unwrap().get(name).cloned())
    }

    async fn put(
        &self,
        name: &str,
        value: &str,
        kind: ParameterKind,
        description: &str,
        overwrite: bool,
    ) -> Result<(), RemoteError> {
        self.puts.lock().unwrap().push(PutRecord {
            name: name.to_string(),
            value: value.to_string(),
            kind,
            description: description.to_string(),
            overwrite,
        });
        self.values
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockArtifactStore {
    uploads: Mutex<Vec<(String, String, PathBuf)>>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> Vec<(String, String, PathBuf)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<(), RemoteError> {
        self.uploads.lock().unwrap().push((
            bucket.to_string(),
            key.to_string(),
            path.to_path_buf(),
        ));
        Ok(())
    }
}

pub const MOCK_IDENTITY_ARN: &str = "arn:aws:iam::123456789012:user/mock";

#[derive(Default)]
pub struct MockCredentialProvider {
    assumed: Mutex<Vec<String>>,
}

impl MockCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assumed_roles(&self) -> Vec<String> {
        self.assumed.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialProvider for MockCredentialProvider {
    async fn assume(&self, role: &str) -> Result<SessionToken, RemoteError> {
        let mut assumed = self.assumed.lock().unwrap();
        assumed.push(role.to_string());
        let n = assumed.len();
        Ok(SessionToken {
            access_key: "AKIAMOCK".to_string(),
            secret_key: "mock-secret".to_string(),
            session_token: format!("mock-session-{n}"),
            expiry: Some(Utc::now() + ChronoDuration::hours(1)),
        })
    }

    async fn identity(&self) -> Result<CallerIdentity, RemoteError> {
        Ok(CallerIdentity {
            arn: MOCK_IDENTITY_ARN.to_string(),
        })
    }
}

/// Handles to every mock capability, plus the bundle built over them.
#[derive(Clone)]
pub struct MockCloud {
    pub stacks: Arc<MockStackApi>,
    pub params: Arc<MockParameterStore>,
    pub artifacts: Arc<MockArtifactStore>,
    pub credentials: Arc<MockCredentialProvider>,
}

impl MockCloud {
    pub fn new() -> Self {
        Self {
            stacks: Arc::new(MockStackApi::new()),
            params: Arc::new(MockParameterStore::new()),
            artifacts: Arc::new(MockArtifactStore::new()),
            credentials: Arc::new(MockCredentialProvider::new()),
        }
    }

    pub fn cloud_set(&self) -> CloudSet {
        CloudSet {
            stacks: self.stacks.clone(),
            params: self.params.clone(),
            artifacts: self.artifacts.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory that hands out the same mock bundle regardless of token, recording
/// which tokens were used to build.
pub struct MockCloudFactory {
    cloud: MockCloud,
    builds: Mutex<Vec<Option<String>>>,
    store_builds: Mutex<Vec<Option<String>>>,
}

impl MockCloudFactory {
    pub fn new(cloud: MockCloud) -> Self {
        Self {
            cloud,
            builds: Mutex::new(Vec::new()),
            store_builds: Mutex::new(Vec::new()),
        }
    }

    /// Session tokens passed to `build`, in order.
    pub fn build_tokens(&self) -> Vec<Option<String>> {
        self.builds.lock().unwrap().clone()
    }

    /// Session tokens passed to `parameter_store`, in order.
    pub fn store_tokens(&self) -> Vec<Option<String>> {
        self.store_builds.lock().unwrap().clone()
    }
}

impl CloudFactory for MockCloudFactory {
    fn build(&self, token: Option<&SessionToken>) -> CloudSet {
        self.builds
            .lock()
            .unwrap()
            .push(token.map(|t| t.session_token.clone()));
        self.cloud.cloud_set()
    }

    fn parameter_store(&self, token: Option<&SessionToken>) -> Arc<dyn ParameterStore> {
        self.store_builds
            .lock()
            .unwrap()
            .push(token.map(|t| t.session_token.clone()));
        self.cloud.params.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn describe_responses_are_sticky_on_the_last_entry() {
        let api = MockStackApi::new();
        api.queue_describe("web", Ok(None));
        api.queue_stack("web", "CREATE_IN_PROGRESS", &[]);
        api.queue_stack("web", "CREATE_COMPLETE", &[("Out", "1")]);

        assert!(api.describe("web").await.unwrap().is_none());
        let second = api.describe("web").await.unwrap().unwrap();
        assert!(second.status.is_in_progress());
        for _ in 0..3 {
            let last = api.describe("web").await.unwrap().unwrap();
            assert!(last.status.is_create_complete());
        }
    }

    #[tokio::test]
    async fn unscripted_describe_means_not_found() {
        let api = MockStackApi::new();
        assert!(api.describe("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn parameter_store_records_puts() {
        let store = MockParameterStore::new();
        store
            .put("DbUrl", "postgres://x", ParameterKind::String, "db", true)
            .await
            .unwrap();

        assert_eq!(store.get("DbUrl", false).await.unwrap().unwrap(), "postgres://x");
        assert_eq!(store.puts().len(), 1);
        assert!(store.puts()[0].overwrite);
    }

    #[tokio::test]
    async fn credential_provider_mints_distinct_sessions() {
        let creds = MockCredentialProvider::new();
        let first = creds.assume("arn:aws:iam::1:role/deploy").await.unwrap();
        let second = creds.assume("arn:aws:iam::1:role/deploy").await.unwrap();

        assert_ne!(first.session_token, second.session_token);
        assert_eq!(creds.assumed_roles().len(), 2);
    }
}
