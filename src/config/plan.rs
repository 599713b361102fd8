//! Deployment plan data model
//!
//! A plan describes one primary stack, optional stack groups fanned out
//! behind it, the deployment artifact, and the gates and parameter wiring
//! between them. Field defaults follow the plan author's most common case:
//! artifacts on, IAM capabilities off, artifact staged before the primary
//! unit.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::cloud::ParameterKind;
use crate::conditions::{RegionGate, ValueCheck};
use crate::error::{Error, Result};

use super::binding::InputParameterSpec;

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("target/cascade")
}

fn default_artifact_kind() -> String {
    "jar".to_string()
}

/// When the deployment artifact is staged relative to the primary unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyAction {
    /// Stage before the primary unit runs; the bucket must already exist.
    #[default]
    Before,

    /// Stage after, so the primary unit can create the bucket it lands in.
    After,
}

/// Identity and destination of the deployment artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub group: String,
    pub name: String,
    pub version: String,

    /// File extension of the packaged artifact.
    #[serde(default = "default_artifact_kind")]
    pub kind: String,

    /// Local repository root; defaults to `~/.m2/repository`.
    #[serde(default)]
    pub repository: Option<PathBuf>,

    /// Bucket the artifact is staged to.
    pub bucket: String,

    #[serde(default)]
    pub prefix: Option<String>,

    /// Substring the artifact filename must contain.
    #[serde(default)]
    pub filter: Option<String>,

    #[serde(default)]
    pub copy_action: CopyAction,
}

/// Renames a stack output and optionally mirrors it to the parameter store.
///
/// Inside a command mapping's `parameters` table the same record doubles as
/// an extraction rule: `parameter_name` is then the path into the command's
/// JSON result and `default_parameter_value` the value used when the path
/// finds nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMapping {
    pub parameter_name: String,

    /// Written as the parameter store entry's description.
    pub description: String,

    #[serde(default)]
    pub condition: Option<String>,

    /// Name the value is stored under in the accumulated set; the original
    /// name when absent.
    #[serde(default)]
    pub map_parameter_name: Option<String>,

    #[serde(default)]
    pub parameter_store_field_name: Option<String>,

    #[serde(default)]
    pub parameter_store_field_type: ParameterKind,

    /// Role assumed for the store write, for cross-account mirrors.
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub default_parameter_value: Option<String>,
}

/// An external command whose JSON output feeds the accumulated set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMapping {
    pub description: String,

    pub command: String,

    /// Insert spaces around appended parameters. Turn off to splice a
    /// value into the middle of an option such as a `--filters` argument.
    #[serde(default = "default_true")]
    pub spacing: bool,

    #[serde(default)]
    pub condition: Option<String>,

    #[serde(default)]
    pub check: Option<ValueCheck>,

    #[serde(default)]
    pub region: RegionGate,

    /// Role the command runs under; the unit's credentials when absent.
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub command_parameters: Vec<InputParameterSpec>,

    /// Output name to extraction rule over the command's JSON result.
    #[serde(default)]
    pub parameters: BTreeMap<String, OutputMapping>,
}

/// One deployable stack: the primary unit or a stack group entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackUnit {
    #[serde(default)]
    pub name: Option<String>,

    /// Prefix completed with a unique id when `name` is absent.
    #[serde(default)]
    pub name_prefix: Option<String>,

    /// Path to the template file.
    pub template: PathBuf,

    /// Parameter file for stack group entries. The primary unit takes its
    /// file from the plan's `parameter_files` list instead.
    #[serde(default)]
    pub parameter_file: Option<PathBuf>,

    #[serde(default)]
    pub role: Option<String>,

    /// Use the unit only as a reference to a previous run's outputs.
    #[serde(default)]
    pub read_only: bool,

    #[serde(default)]
    pub condition: Option<String>,

    #[serde(default)]
    pub check: Option<ValueCheck>,

    #[serde(default)]
    pub region: RegionGate,

    /// Expression locating an artifact that replaces the plan-level one
    /// for this unit.
    #[serde(default)]
    pub artifact_override: Option<String>,

    #[serde(default)]
    pub input_parameters: Vec<InputParameterSpec>,

    #[serde(default)]
    pub output_mappings: Vec<OutputMapping>,

    #[serde(default)]
    pub command_mappings: Vec<CommandMapping>,
}

impl StackUnit {
    /// The deployed stack name: the explicit name, or the prefix completed
    /// with a fresh unique id.
    pub fn resolved_name(&self) -> Option<String> {
        match (&self.name, &self.name_prefix) {
            (Some(name), _) => Some(name.clone()),
            (None, Some(prefix)) => Some(format!("{prefix}-{}Stack", Uuid::new_v4())),
            (None, None) => None,
        }
    }
}

/// A set of stacks deployed after the primary unit, one group per
/// parameter file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackGroup {
    /// Filename substring selecting this group's artifact build flavor.
    #[serde(default)]
    pub repository_filter: Option<String>,

    pub stacks: Vec<StackUnit>,
}

/// The whole deployment: primary unit, stack groups, artifact, gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPlan {
    /// Working directory for the audit trail.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Role assumed before any remote call.
    #[serde(default)]
    pub role: Option<String>,

    /// Acknowledge that templates may create named IAM resources.
    #[serde(default)]
    pub requires_iam: bool,

    /// Bucket templates are staged to before execution.
    pub template_bucket: String,

    #[serde(default)]
    pub template_prefix: Option<String>,

    /// Master switch for artifact staging.
    #[serde(default = "default_true")]
    pub artifacts: bool,

    #[serde(default)]
    pub artifact: Option<ArtifactConfig>,

    /// Named boolean gates referenced by units and mappings.
    #[serde(default)]
    pub conditions: Option<BTreeMap<String, bool>>,

    /// One file per pass; each pass runs the primary unit and the stack
    /// group in the matching position.
    pub parameter_files: Vec<PathBuf>,

    pub master: StackUnit,

    #[serde(default)]
    pub stack_groups: Vec<StackGroup>,
}

impl DeploymentPlan {
    /// Structural checks independent of the runtime environment.
    pub fn validate_structure(&self) -> Result<()> {
        if self.master.name.is_none() {
            return Err(Error::Config("The primary stack requires a name.".into()));
        }
        if self.master.parameter_file.is_some() {
            return Err(Error::Config(
                "The primary stack takes its parameter files from parameter_files.".into(),
            ));
        }
        validate_unit(&self.master)?;
        for group in &self.stack_groups {
            for stack in &group.stacks {
                if stack.name.is_none() && stack.name_prefix.is_none() {
                    return Err(Error::Config(
                        "A stack group entry requires a name or a name prefix.".into(),
                    ));
                }
                if stack.parameter_file.is_none() {
                    return Err(Error::Config(
                        "A stack group entry requires a parameter file.".into(),
                    ));
                }
                validate_unit(stack)?;
            }
        }
        let overridden = std::iter::once(&self.master)
            .chain(self.stack_groups.iter().flat_map(|group| group.stacks.iter()))
            .any(|unit| unit.artifact_override.is_some());
        if overridden && self.artifact.is_none() {
            return Err(Error::Config(
                "An artifact override requires the plan artifact destination.".into(),
            ));
        }
        Ok(())
    }

    /// Check the parameter-file count against the stack-group count.
    ///
    /// Returns the narrative line the deployment run records on success.
    /// Without groups exactly one file is allowed; with groups the counts
    /// must match pairwise.
    pub fn validate_file_counts(&self) -> Result<&'static str> {
        if self.stack_groups.is_empty() {
            if self.parameter_files.len() != 1 {
                return Err(Error::Validation(
                    "Multiple Parameters without secondary stacks.".into(),
                ));
            }
            return Ok("Valid because no secondary stack exist and only one stack parameter file found.");
        }
        if self.parameter_files.len() == self.stack_groups.len() {
            Ok("Array counts match.")
        } else {
            Err(Error::Validation("Array counts don't match.".into()))
        }
    }

    /// With artifact staging on, the artifact identity must be complete.
    pub fn validate_artifact_identity(&self) -> Result<()> {
        if !self.artifacts {
            return Ok(());
        }
        let Some(artifact) = &self.artifact else {
            return Err(Error::Validation("No artifact id.".into()));
        };
        if artifact.name.is_empty() {
            return Err(Error::Validation("No artifact id.".into()));
        }
        if artifact.group.is_empty() {
            return Err(Error::Validation("No group id.".into()));
        }
        if artifact.version.is_empty() {
            return Err(Error::Validation("No version.".into()));
        }
        Ok(())
    }

    /// All load-time checks, as run by `cascade validate`.
    pub fn validate(&self) -> Result<()> {
        self.validate_structure()?;
        self.validate_file_counts()?;
        self.validate_artifact_identity()
    }
}

fn validate_unit(unit: &StackUnit) -> Result<()> {
    unit.region.validate()?;
    for spec in &unit.input_parameters {
        spec.bind()?;
    }
    for mapping in &unit.command_mappings {
        mapping.region.validate()?;
        for spec in &mapping.command_parameters {
            spec.bind()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str) -> StackUnit {
        StackUnit {
            name: Some(name.into()),
            template: PathBuf::from("stack.yaml"),
            ..Default::default()
        }
    }

    fn plan() -> DeploymentPlan {
        DeploymentPlan {
            output_dir: default_output_dir(),
            role: None,
            requires_iam: false,
            template_bucket: "templates".into(),
            template_prefix: None,
            artifacts: false,
            artifact: None,
            conditions: None,
            parameter_files: vec![PathBuf::from("params.json")],
            master: unit("primary"),
            stack_groups: Vec::new(),
        }
    }

    #[test]
    fn minimal_plan_validates() {
        plan().validate().unwrap();
    }

    #[test]
    fn master_requires_a_name() {
        let mut plan = plan();
        plan.master.name = None;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn single_file_without_groups_is_valid() {
        assert_eq!(
            plan().validate_file_counts().unwrap(),
            "Valid because no secondary stack exist and only one stack parameter file found."
        );
    }

    #[test]
    fn multiple_files_require_groups() {
        let mut plan = plan();
        plan.parameter_files.push(PathBuf::from("params2.json"));
        let err = plan.validate_file_counts().unwrap_err();
        assert!(err
            .to_string()
            .contains("Multiple Parameters without secondary stacks."));
    }

    #[test]
    fn group_and_file_counts_must_match() {
        let mut plan = plan();
        let mut entry = unit("secondary");
        entry.parameter_file = Some(PathBuf::from("secondary.json"));
        plan.stack_groups.push(StackGroup {
            repository_filter: None,
            stacks: vec![entry],
        });
        assert_eq!(plan.validate_file_counts().unwrap(), "Array counts match.");

        plan.parameter_files.push(PathBuf::from("params2.json"));
        assert!(plan.validate_file_counts().is_err());
    }

    #[test]
    fn artifact_identity_enforced_only_when_artifacts_on() {
        let mut plan = plan();
        plan.artifacts = true;
        let err = plan.validate_artifact_identity().unwrap_err();
        assert!(err.to_string().contains("No artifact id."));

        plan.artifact = Some(ArtifactConfig {
            group: "com.example".into(),
            name: "svc".into(),
            version: "1.4.2".into(),
            kind: default_artifact_kind(),
            repository: None,
            bucket: "artifacts".into(),
            prefix: None,
            filter: None,
            copy_action: CopyAction::default(),
        });
        plan.validate_artifact_identity().unwrap();

        if let Some(artifact) = plan.artifact.as_mut() {
            artifact.version = String::new();
        }
        let err = plan.validate_artifact_identity().unwrap_err();
        assert!(err.to_string().contains("No version."));
    }

    #[test]
    fn group_entries_need_name_and_parameter_file() {
        let mut plan = plan();
        plan.parameter_files = vec![PathBuf::from("a.json")];
        let mut entry = unit("secondary");
        entry.parameter_file = None;
        plan.stack_groups.push(StackGroup {
            repository_filter: None,
            stacks: vec![entry],
        });
        assert!(plan.validate_structure().is_err());

        plan.stack_groups[0].stacks[0].parameter_file = Some(PathBuf::from("b.json"));
        plan.validate_structure().unwrap();

        plan.stack_groups[0].stacks[0].name = None;
        assert!(plan.validate_structure().is_err());

        plan.stack_groups[0].stacks[0].name_prefix = Some("worker".into());
        plan.validate_structure().unwrap();
    }

    #[test]
    fn artifact_override_needs_a_destination() {
        let mut plan = plan();
        plan.master.artifact_override = Some("app-.*[.]zip".into());
        let err = plan.validate_structure().unwrap_err();
        assert!(err
            .to_string()
            .contains("An artifact override requires the plan artifact destination."));

        plan.artifact = Some(ArtifactConfig {
            group: "com.example".into(),
            name: "svc".into(),
            version: "1.4.2".into(),
            kind: default_artifact_kind(),
            repository: None,
            bucket: "artifacts".into(),
            prefix: None,
            filter: None,
            copy_action: CopyAction::default(),
        });
        plan.validate_structure().unwrap();
    }

    #[test]
    fn invalid_bindings_fail_structure_validation() {
        let mut plan = plan();
        plan.master.input_parameters.push(InputParameterSpec {
            parameter_name: Some("Env".into()),
            ..Default::default()
        });
        let err = plan.validate_structure().unwrap_err();
        assert!(err.to_string().contains("Invalid Stack Input Syntax."));
    }

    #[test]
    fn name_prefix_generates_unique_names() {
        let entry = StackUnit {
            name_prefix: Some("lambda-version".into()),
            template: PathBuf::from("stack.yaml"),
            ..Default::default()
        };
        let first = entry.resolved_name().unwrap();
        let second = entry.resolved_name().unwrap();
        assert!(first.starts_with("lambda-version-"));
        assert!(first.ends_with("Stack"));
        assert_ne!(first, second);
    }

    #[test]
    fn copy_action_defaults_to_before() {
        let artifact: ArtifactConfig = serde_yaml::from_str(
            r#"
group: com.example
name: svc
version: 1.4.2
bucket: artifacts
"#,
        )
        .unwrap();
        assert_eq!(artifact.copy_action, CopyAction::Before);
        assert_eq!(artifact.kind, "jar");
    }
}
