//! AWS adapters for the control-plane capability traits.
//!
//! One factory loads the shared SDK configuration once; each deployment
//! principal then gets its own clients rebound to that principal's session
//! token without reloading the environment.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::types::{Capability, Parameter};
use aws_sdk_s3::primitives::ByteStream;
use chrono::DateTime;
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{
    CallerIdentity, ChangeSetState, ParameterKind, RemoteError, SessionToken, StackDescription,
    StackOutput, StackStatus, TemplateParameter,
};
use super::{ArtifactStore, CloudFactory, CloudSet, CredentialProvider, ParameterStore, StackApi};

/// Builds per-principal capability sets from one loaded SDK configuration.
pub struct AwsCloudFactory {
    config: SdkConfig,
}

impl AwsCloudFactory {
    /// Load the ambient AWS configuration pinned to `region`.
    pub async fn load(region: &str) -> Self {
        info!("Loading AWS configuration for {region}");
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self { config }
    }

    fn credentials(token: &SessionToken) -> aws_sdk_sts::config::Credentials {
        aws_sdk_sts::config::Credentials::from_keys(
            token.access_key.clone(),
            token.secret_key.clone(),
            Some(token.session_token.clone()),
        )
    }

    fn stacks(&self, token: Option<&SessionToken>) -> aws_sdk_cloudformation::Client {
        match token {
            Some(token) => {
                let config = aws_sdk_cloudformation::config::Builder::from(&self.config)
                    .credentials_provider(Self::credentials(token))
                    .build();
                aws_sdk_cloudformation::Client::from_conf(config)
            }
            None => aws_sdk_cloudformation::Client::new(&self.config),
        }
    }

    fn blobs(&self, token: Option<&SessionToken>) -> aws_sdk_s3::Client {
        match token {
            Some(token) => {
                let config = aws_sdk_s3::config::Builder::from(&self.config)
                    .credentials_provider(Self::credentials(token))
                    .build();
                aws_sdk_s3::Client::from_conf(config)
            }
            None => aws_sdk_s3::Client::new(&self.config),
        }
    }

    fn params(&self, token: Option<&SessionToken>) -> aws_sdk_ssm::Client {
        match token {
            Some(token) => {
                let config = aws_sdk_ssm::config::Builder::from(&self.config)
                    .credentials_provider(Self::credentials(token))
                    .build();
                aws_sdk_ssm::Client::from_conf(config)
            }
            None => aws_sdk_ssm::Client::new(&self.config),
        }
    }

    fn tokens(&self, token: Option<&SessionToken>) -> aws_sdk_sts::Client {
        match token {
            Some(token) => {
                let config = aws_sdk_sts::config::Builder::from(&self.config)
                    .credentials_provider(Self::credentials(token))
                    .build();
                aws_sdk_sts::Client::from_conf(config)
            }
            None => aws_sdk_sts::Client::new(&self.config),
        }
    }
}

impl CloudFactory for AwsCloudFactory {
    fn build(&self, token: Option<&SessionToken>) -> CloudSet {
        CloudSet {
            stacks: Arc::new(CloudFormationStacks {
                client: self.stacks(token),
            }),
            params: Arc::new(SsmParameterStore {
                client: self.params(token),
            }),
            artifacts: Arc::new(S3ArtifactStore {
                client: self.blobs(token),
            }),
            credentials: Arc::new(StsCredentials {
                client: self.tokens(token),
            }),
        }
    }

    fn parameter_store(&self, token: Option<&SessionToken>) -> Arc<dyn ParameterStore> {
        Arc::new(SsmParameterStore {
            client: self.params(token),
        })
    }
}

/// Stack lifecycle against CloudFormation.
pub struct CloudFormationStacks {
    client: aws_sdk_cloudformation::Client,
}

#[async_trait]
impl StackApi for CloudFormationStacks {
    async fn describe(&self, name: &str) -> Result<Option<StackDescription>, RemoteError> {
        debug!("Describing stack {name}");
        let output = match self.client.describe_stacks().stack_name(name).send().await {
            Ok(output) => output,
            Err(error) => {
                let remote = remote_error(error);
                return if remote.is_not_found() {
                    Ok(None)
                } else {
                    Err(remote)
                };
            }
        };
        let Some(stack) = output.stacks().first() else {
            return Ok(None);
        };
        let outputs = stack
            .outputs()
            .iter()
            .filter_map(|output| match (output.output_key(), output.output_value()) {
                (Some(key), Some(value)) => Some(StackOutput::new(key, value)),
                _ => None,
            })
            .collect();
        Ok(Some(StackDescription {
            name: stack.stack_name().unwrap_or(name).to_string(),
            status: StackStatus::new(
                stack
                    .stack_status()
                    .map(|status| status.as_str())
                    .unwrap_or_default(),
            ),
            status_reason: stack.stack_status_reason().map(str::to_owned),
            outputs,
        }))
    }

    async fn create(
        &self,
        name: &str,
        template_url: &str,
        parameters: &[TemplateParameter],
        requires_iam: bool,
    ) -> Result<String, RemoteError> {
        debug!("Creating stack {name} from {template_url}");
        let mut request = self
            .client
            .create_stack()
            .stack_name(name)
            .template_url(template_url)
            .set_parameters(Some(to_sdk_parameters(parameters)));
        if requires_iam {
            request = request.capabilities(Capability::CapabilityNamedIam);
        }
        let output = request.send().await.map_err(remote_error)?;
        Ok(output.stack_id().unwrap_or_default().to_string())
    }

    async fn create_change_set(
        &self,
        stack: &str,
        change_set: &str,
        template_url: &str,
        parameters: &[TemplateParameter],
        requires_iam: bool,
    ) -> Result<String, RemoteError> {
        debug!("Creating change set {change_set} for {stack}");
        let mut request = self
            .client
            .create_change_set()
            .stack_name(stack)
            .change_set_name(change_set)
            .template_url(template_url)
            .set_parameters(Some(to_sdk_parameters(parameters)));
        if requires_iam {
            request = request.capabilities(Capability::CapabilityNamedIam);
        }
        let output = request.send().await.map_err(remote_error)?;
        Ok(output.id().unwrap_or_default().to_string())
    }

    async fn describe_change_set(
        &self,
        stack: &str,
        change_set: &str,
    ) -> Result<ChangeSetState, RemoteError> {
        let output = self
            .client
            .describe_change_set()
            .stack_name(stack)
            .change_set_name(change_set)
            .send()
            .await
            .map_err(remote_error)?;
        let changes = output
            .changes()
            .iter()
            .filter_map(|change| change.resource_change())
            .map(|change| {
                format!(
                    "{} {} {}",
                    change
                        .action()
                        .map(|action| action.as_str())
                        .unwrap_or_default(),
                    change.resource_type().unwrap_or_default(),
                    change.logical_resource_id().unwrap_or_default(),
                )
            })
            .collect();
        Ok(ChangeSetState {
            status: output
                .status()
                .map(|status| status.as_str().to_string())
                .unwrap_or_default(),
            status_reason: output.status_reason().map(str::to_owned),
            stack_id: output.stack_id().map(str::to_owned),
            changes,
        })
    }

    async fn execute_change_set(
        &self,
        stack: &str,
        change_set: &str,
    ) -> Result<(), RemoteError> {
        debug!("Executing change set {change_set} for {stack}");
        self.client
            .execute_change_set()
            .stack_name(stack)
            .change_set_name(change_set)
            .send()
            .await
            .map_err(remote_error)?;
        Ok(())
    }

    async fn delete_change_set(&self, stack: &str, change_set: &str) -> Result<(), RemoteError> {
        self.client
            .delete_change_set()
            .stack_name(stack)
            .change_set_name(change_set)
            .send()
            .await
            .map_err(remote_error)?;
        Ok(())
    }
}

/// Blob storage against S3.
pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<(), RemoteError> {
        debug!("Uploading {} to s3://{bucket}/{key}", path.display());
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| RemoteError::Api(format!("Unable to read {}: {e}", path.display())))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(remote_error)?;
        Ok(())
    }
}

/// Encrypted key/value storage against SSM Parameter Store.
pub struct SsmParameterStore {
    client: aws_sdk_ssm::Client,
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get(&self, name: &str, decrypt: bool) -> Result<Option<String>, RemoteError> {
        let output = match self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(decrypt)
            .send()
            .await
        {
            Ok(output) => output,
            Err(error) => {
                let remote = remote_error(error);
                return if remote.is_not_found() {
                    Ok(None)
                } else {
                    Err(remote)
                };
            }
        };
        Ok(output
            .parameter()
            .and_then(|parameter| parameter.value())
            .map(str::to_owned))
    }

    async fn put(
        &self,
        name: &str,
        value: &str,
        kind: ParameterKind,
        description: &str,
        overwrite: bool,
    ) -> Result<(), RemoteError> {
        debug!("Writing parameter {name}");
        self.client
            .put_parameter()
            .name(name)
            .value(value)
            .r#type(parameter_type(kind))
            .description(description)
            .overwrite(overwrite)
            .send()
            .await
            .map_err(remote_error)?;
        Ok(())
    }
}

/// Token minting against STS.
pub struct StsCredentials {
    client: aws_sdk_sts::Client,
}

#[async_trait]
impl CredentialProvider for StsCredentials {
    async fn assume(&self, role: &str) -> Result<SessionToken, RemoteError> {
        debug!("Assuming role {role}");
        let output = self
            .client
            .assume_role()
            .role_arn(role)
            .role_session_name(Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(remote_error)?;
        let Some(credentials) = output.credentials else {
            return Err(RemoteError::Api(
                "The assumed role returned no credentials.".into(),
            ));
        };
        let expiration = credentials.expiration;
        Ok(SessionToken {
            access_key: credentials.access_key_id,
            secret_key: credentials.secret_access_key,
            session_token: credentials.session_token,
            expiry: DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos()),
        })
    }

    async fn identity(&self) -> Result<CallerIdentity, RemoteError> {
        let output = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(remote_error)?;
        Ok(CallerIdentity {
            arn: output.arn.unwrap_or_default(),
        })
    }
}

fn to_sdk_parameters(parameters: &[TemplateParameter]) -> Vec<Parameter> {
    parameters
        .iter()
        .map(|parameter| {
            Parameter::builder()
                .parameter_key(&parameter.parameter_key)
                .parameter_value(&parameter.parameter_value)
                .build()
        })
        .collect()
}

fn parameter_type(kind: ParameterKind) -> aws_sdk_ssm::types::ParameterType {
    match kind {
        ParameterKind::String => aws_sdk_ssm::types::ParameterType::String,
        ParameterKind::StringList => aws_sdk_ssm::types::ParameterType::StringList,
        ParameterKind::SecureString => aws_sdk_ssm::types::ParameterType::SecureString,
    }
}

/// Map an SDK failure onto the transport-neutral error surface.
///
/// The service code is checked first where one is present; the message text
/// carries the classification otherwise.
fn remote_error<E, R>(error: SdkError<E, R>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug + 'static,
{
    let code = error.code().map(str::to_owned);
    let message = match error.message() {
        Some(message) => message.to_string(),
        None => DisplayErrorContext(&error).to_string(),
    };
    match code.as_deref() {
        Some("Throttling") => RemoteError::Throttled(message),
        Some("ParameterNotFound") => RemoteError::NotFound(message),
        _ => RemoteError::from_message(message),
    }
}
