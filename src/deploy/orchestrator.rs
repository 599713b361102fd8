//! Whole-plan execution
//!
//! One run walks the plan's parameter files in order: stage the deployment
//! artifact, stage and execute the primary unit, then fan out to the stack
//! group in the matching position. Each group pass starts from a copy of
//! the primary unit's outputs. Roles are assumed up front and refreshed
//! when a long run approaches the session lifetime.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::artifact::ArtifactStager;
use crate::audit::AuditSink;
use crate::cloud::{
    object_url, ArtifactStore, CloudFactory, CloudSet, CredentialBroker, SessionToken,
};
use crate::conditions::{ConditionEvaluator, RegionGate};
use crate::config::{BoundParameter, CopyAction, DeploymentPlan, StackUnit};
use crate::error::{Error, Result};
use crate::extract::ExternalCommandExtractor;
use crate::params::{OutputParameterMapper, OutputParameterSet, ParameterResolver};
use crate::subprocess::CommandRunner;

use super::changeset::ChangeSetPlanner;
use super::poller::{Poller, PollerConfig};

/// Session tokens last an hour; refresh with enough margin for one more
/// group to finish on the old token.
const TOKEN_REFRESH: Duration = Duration::from_secs(3400);

/// What the region gate decided for one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionDecision {
    Deploy,
    ReadOnly,
    Skip,
}

/// Everything one unit execution needs.
///
/// `cloud` carries the unit's own principal; `staging` stays on the pass
/// principal, so a cross-account unit role never needs write access to the
/// artifact bucket.
struct UnitRun<'a> {
    unit: &'a StackUnit,
    name: &'a str,
    read_only: bool,
    template_url: &'a str,
    parameter_file: &'a Path,
    cloud: &'a CloudSet,
    staging: &'a Arc<dyn ArtifactStore>,
    token: Option<&'a SessionToken>,
    outputs: &'a mut OutputParameterSet,
}

/// Drives one deployment plan end to end.
///
/// The orchestrator owns the narrative: validation outcomes, gate
/// decisions, staging and role assumption all land on the audit trail as
/// they happen, and any error is recorded there before it surfaces.
pub struct DeploymentOrchestrator {
    plan: DeploymentPlan,
    factory: Arc<dyn CloudFactory>,
    broker: Arc<CredentialBroker>,
    audit: Arc<dyn AuditSink>,
    evaluator: ConditionEvaluator,
    mapper: OutputParameterMapper,
    extractor: ExternalCommandExtractor,
    stager: ArtifactStager,
    poller_config: PollerConfig,
    token_refresh: Duration,
}

impl DeploymentOrchestrator {
    pub fn new(
        plan: DeploymentPlan,
        factory: Arc<dyn CloudFactory>,
        runner: Arc<dyn CommandRunner>,
        audit: Arc<dyn AuditSink>,
        region: &str,
    ) -> Result<Self> {
        let evaluator = ConditionEvaluator::new(plan.conditions.clone(), region)?;
        let ambient = factory.build(None);
        let broker = Arc::new(CredentialBroker::new(
            ambient.credentials.clone(),
            audit.clone(),
        ));
        let mapper = OutputParameterMapper::new(factory.clone(), broker.clone());
        let extractor = ExternalCommandExtractor::new(runner, ambient.credentials, audit.clone());
        let stager = ArtifactStager::new(audit.clone());
        Ok(Self {
            plan,
            factory,
            broker,
            audit,
            evaluator,
            mapper,
            extractor,
            stager,
            poller_config: PollerConfig::default(),
            token_refresh: TOKEN_REFRESH,
        })
    }

    /// Replace the default polling timings.
    pub fn with_poller_config(mut self, config: PollerConfig) -> Self {
        self.poller_config = config;
        self
    }

    /// Replace the session refresh threshold.
    pub fn with_token_refresh(mut self, threshold: Duration) -> Self {
        self.token_refresh = threshold;
        self
    }

    /// Run the whole plan.
    ///
    /// Any error is recorded on the audit trail before it is returned.
    pub async fn execute(&self) -> Result<()> {
        let result = self.run().await;
        if let Err(e) = &result {
            self.audit
                .record("Error executing the template stack or stack group.");
            self.audit.record(&e.to_string());
        }
        result
    }

    async fn run(&self) -> Result<()> {
        match self.plan.validate_file_counts() {
            Ok(line) => self.audit.record(line),
            Err(e) => {
                let line = if self.plan.stack_groups.is_empty() {
                    "Can't have multiple parameter files without secondary stacks."
                } else {
                    "Array counts don't match."
                };
                self.audit.record(line);
                return Err(e);
            }
        }
        self.plan.validate_artifact_identity()?;

        let mut session = self.broker.assume(self.plan.role.as_deref()).await?;
        let mut minted_at = Instant::now();
        let mut cloud = self.factory.build(session.as_ref());

        let candidates = match &self.plan.artifact {
            Some(config) if self.plan.artifacts => self.stager.locate_candidates(config)?,
            _ => Vec::new(),
        };

        let Some(master_name) = self.plan.master.resolved_name() else {
            return Err(Error::Config("The primary stack requires a name.".into()));
        };

        for (index, parameter_file) in self.plan.parameter_files.iter().enumerate() {
            let filter = self
                .plan
                .stack_groups
                .get(index)
                .and_then(|group| group.repository_filter.as_deref());

            let mut master_outputs = OutputParameterSet::new();

            self.stage_artifacts(
                &cloud,
                &candidates,
                filter,
                CopyAction::Before,
                &mut master_outputs,
            )
            .await?;

            // Recorded even when the region gate skips the unit, so every
            // pass leaves a trace of the file it ran against.
            self.audit.record(&format!(
                "Stack Parameter Path: {}",
                parameter_file.display()
            ));

            let decision = self.region_decision(&self.plan.master.region)?;
            if decision == RegionDecision::Skip {
                self.audit.record(&format!(
                    "{master_name} is not required in {}.",
                    self.evaluator.region()
                ));
            } else {
                let template_url = self
                    .stage_template(&cloud, &self.plan.master, &master_name)
                    .await?;
                self.audit.record(&format!("Template URL: {template_url}"));
                self.execute_unit(UnitRun {
                    unit: &self.plan.master,
                    name: &master_name,
                    read_only: self.plan.master.read_only || decision == RegionDecision::ReadOnly,
                    template_url: &template_url,
                    parameter_file,
                    cloud: &cloud,
                    staging: &cloud.artifacts,
                    token: session.as_ref(),
                    outputs: &mut master_outputs,
                })
                .await?;
            }

            self.stage_artifacts(
                &cloud,
                &candidates,
                filter,
                CopyAction::After,
                &mut master_outputs,
            )
            .await?;

            let Some(group) = self.plan.stack_groups.get(index) else {
                continue;
            };

            if minted_at.elapsed() > self.token_refresh {
                session = self.broker.assume(self.plan.role.as_deref()).await?;
                minted_at = Instant::now();
                cloud = self.factory.build(session.as_ref());
            }

            // Each group starts from the primary unit's outputs; stacks
            // within a group see each other's contributions.
            let mut outputs = master_outputs.clone();

            for stack in &group.stacks {
                let Some(stack_name) = stack.resolved_name() else {
                    return Err(Error::Config(
                        "A stack group entry requires a name or a name prefix.".into(),
                    ));
                };
                let Some(parameter_file) = &stack.parameter_file else {
                    return Err(Error::Config(
                        "A stack group entry requires a parameter file.".into(),
                    ));
                };

                let (unit_cloud, unit_token) = match stack.role.as_deref() {
                    Some(role) => {
                        let token = self.broker.assume(Some(role)).await?;
                        (self.factory.build(token.as_ref()), token)
                    }
                    None => (cloud.clone(), session.clone()),
                };

                let decision = self.region_decision(&stack.region)?;
                if decision == RegionDecision::Skip {
                    self.audit.record(&format!(
                        "{stack_name} is not required in {}.",
                        self.evaluator.region()
                    ));
                    continue;
                }

                let template_url = self.stage_template(&cloud, stack, &stack_name).await?;
                self.execute_unit(UnitRun {
                    unit: stack,
                    name: &stack_name,
                    read_only: stack.read_only || decision == RegionDecision::ReadOnly,
                    template_url: &template_url,
                    parameter_file,
                    cloud: &unit_cloud,
                    staging: &cloud.artifacts,
                    token: unit_token.as_ref(),
                    outputs: &mut outputs,
                })
                .await?;
            }
        }

        Ok(())
    }

    /// Execute one unit: create or update its stack, then fold its outputs
    /// into the accumulated set.
    async fn execute_unit(&self, run: UnitRun<'_>) -> Result<()> {
        let UnitRun {
            unit,
            name,
            read_only,
            template_url,
            parameter_file,
            cloud,
            staging,
            token,
            outputs,
        } = run;

        let planner = ChangeSetPlanner::with_poller(
            cloud.stacks.clone(),
            self.audit.clone(),
            Poller::new(self.poller_config.clone()),
        );

        let existing = planner.find_stack(name).await?;
        let exists = existing.is_some();

        let narrative = if read_only {
            if exists {
                format!("Reading the output from {name}.")
            } else {
                format!("{name} is not required for this deployment.")
            }
        } else if exists {
            format!("Updating the CloudFormation Stack ({name}).")
        } else {
            format!("Creating the CloudFormation Stack ({name}).")
        };

        if !self.evaluator.should_execute(unit.condition.as_deref())?
            || !self.evaluator.check_value(unit.check.as_ref(), outputs)?
        {
            self.audit.record(&format!("{name} is not required."));
            return Ok(());
        }
        self.audit.record(&narrative);

        let unit_store = self.factory.parameter_store(token);

        if !read_only {
            if let Some(description) = &existing {
                if description.status.is_stuck_rollback() {
                    return Err(Error::Deploy(format!(
                        "CloudFormation Error: The stack ({name}) is stuck in {} \
                         and has to be deleted before it can be deployed again.",
                        description.status
                    )));
                }
            }

            if let (Some(expression), Some(config)) =
                (unit.artifact_override.as_deref(), self.plan.artifact.as_ref())
            {
                self.stager
                    .stage_override(staging, config, expression, outputs)
                    .await?;
            }

            let bindings: Vec<BoundParameter> = unit
                .input_parameters
                .iter()
                .map(|spec| spec.bind())
                .collect::<Result<_>>()?;
            let resolver = ParameterResolver::new(unit_store.clone());
            let parameters = resolver
                .resolve_file(parameter_file, &bindings, outputs)
                .await?;

            if exists {
                planner
                    .update(name, template_url, &parameters, self.plan.requires_iam)
                    .await?;
            } else {
                planner
                    .create(name, template_url, &parameters, self.plan.requires_iam)
                    .await?;
            }
        } else if !exists {
            // Nothing to read from; downstream checks decide whether the
            // missing outputs matter.
            return Ok(());
        }

        let described = planner.find_stack(name).await?;
        let Some(description) = described else {
            return Err(Error::Deploy(format!(
                "The stack ({name}) was not found when reading its outputs."
            )));
        };

        tracing::debug!("Output Parameters for {name}:");
        self.mapper
            .process_outputs(
                &self.evaluator,
                &description.outputs,
                &unit.output_mappings,
                &unit_store,
                outputs,
            )
            .await?;

        self.extractor
            .process(
                &self.evaluator,
                &unit.command_mappings,
                token,
                &unit_store,
                &self.mapper,
                outputs,
            )
            .await?;

        Ok(())
    }

    fn region_decision(&self, gate: &RegionGate) -> Result<RegionDecision> {
        if self.evaluator.region_gate(gate)? {
            Ok(RegionDecision::Deploy)
        } else if gate.read_only_on_mismatch {
            Ok(RegionDecision::ReadOnly)
        } else {
            Ok(RegionDecision::Skip)
        }
    }

    /// Stage the deployment artifact if the plan's copy action matches.
    async fn stage_artifacts(
        &self,
        cloud: &CloudSet,
        candidates: &[PathBuf],
        filter: Option<&str>,
        action: CopyAction,
        outputs: &mut OutputParameterSet,
    ) -> Result<()> {
        if !self.plan.artifacts {
            return Ok(());
        }
        let Some(config) = &self.plan.artifact else {
            return Ok(());
        };
        if config.copy_action != action {
            return Ok(());
        }
        self.stager
            .stage(&cloud.artifacts, config, candidates, filter, outputs)
            .await
    }

    /// Upload a unit's template under a timestamped key and return its URL.
    async fn stage_template(
        &self,
        cloud: &CloudSet,
        unit: &StackUnit,
        name: &str,
    ) -> Result<String> {
        let file_name = unit
            .template
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| {
                Error::Config(format!(
                    "Invalid template path ({}).",
                    unit.template.display()
                ))
            })?;
        let epoch = Utc::now().timestamp();
        let key = match &self.plan.template_prefix {
            Some(prefix) => format!("{prefix}/{epoch}-{name}-{file_name}"),
            None => format!("{epoch}-{name}-{file_name}"),
        };
        cloud
            .artifacts
            .put_file(&self.plan.template_bucket, &key, &unit.template)
            .await?;
        Ok(object_url(&self.plan.template_bucket, &key))
    }
}
