//! Deployment plan loading and validation
//!
//! Plans are YAML or JSON files deserialized into [`DeploymentPlan`].
//! Loading runs the structural checks immediately so that a malformed
//! plan fails before any remote call is made.

use std::path::Path;

use crate::error::{Error, Result};

pub mod binding;
pub mod plan;

pub use binding::{BoundParameter, InputBinding, InputParameterSpec};
pub use plan::{
    ArtifactConfig, CommandMapping, CopyAction, DeploymentPlan, OutputMapping, StackGroup,
    StackUnit,
};

/// Load a deployment plan from a YAML or JSON file.
///
/// Files ending in `yml` or `yaml` parse as YAML; anything else parses as
/// JSON. The plan's structural validation runs before the plan is returned.
pub async fn load_plan(path: &Path) -> Result<DeploymentPlan> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Config(format!("Unable to read plan file {}: {e}", path.display()))
    })?;

    let extension = path.extension().and_then(|s| s.to_str());
    let plan: DeploymentPlan = if extension == Some("yml") || extension == Some("yaml") {
        serde_yaml::from_str(&content).map_err(|e| {
            Error::Config(format!("Unable to parse YAML plan {}: {e}", path.display()))
        })?
    } else {
        serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Unable to parse JSON plan {}: {e}", path.display()))
        })?
    };

    plan.validate_structure()?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PLAN_YAML: &str = r#"
template_bucket: templates
artifacts: false
parameter_files:
  - params.json
master:
  name: primary
  template: stack.yaml
"#;

    fn temp_plan(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn loads_yaml_plan() {
        let file = temp_plan(".yaml", PLAN_YAML);
        let plan = load_plan(file.path()).await.unwrap();
        assert_eq!(plan.master.name.as_deref(), Some("primary"));
        assert_eq!(plan.template_bucket, "templates");
        assert!(!plan.artifacts);
    }

    #[tokio::test]
    async fn loads_json_plan() {
        let file = temp_plan(
            ".json",
            r#"{
                "template_bucket": "templates",
                "artifacts": false,
                "parameter_files": ["params.json"],
                "master": {"name": "primary", "template": "stack.yaml"}
            }"#,
        );
        let plan = load_plan(file.path()).await.unwrap();
        assert_eq!(plan.master.name.as_deref(), Some("primary"));
    }

    #[tokio::test]
    async fn missing_file_reports_path() {
        let err = load_plan(Path::new("/nonexistent/plan.yaml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unable to read plan file"));
    }

    #[tokio::test]
    async fn structural_errors_surface_at_load() {
        let file = temp_plan(
            ".yaml",
            r#"
template_bucket: templates
parameter_files:
  - params.json
master:
  template: stack.yaml
"#,
        );
        let err = load_plan(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("requires a name"));
    }

    #[tokio::test]
    async fn malformed_yaml_is_a_config_error() {
        let file = temp_plan(".yml", "template_bucket: [unclosed");
        let err = load_plan(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("Unable to parse YAML plan"));
    }
}
