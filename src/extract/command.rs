//! External command execution and result mapping
//!
//! A command mapping shells out to a CLI describe call under deliberately
//! chosen credentials, parses the JSON it prints, and maps values out of
//! the result by parameter path. Extracted values run through the same
//! mapping machinery as stack outputs, so they can be renamed, mirrored to
//! the parameter store, and consumed by later units.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::audit::AuditSink;
use crate::cloud::{CredentialProvider, ParameterStore, SessionToken};
use crate::conditions::ConditionEvaluator;
use crate::config::CommandMapping;
use crate::error::{Error, Result};
use crate::params::{OutputParameterMapper, OutputParameterSet, ParameterResolver};
use crate::subprocess::{CommandRunner, ProcessCommand};

use super::JsonPathExtractor;

/// Runs command mappings and feeds their results into the accumulated set.
pub struct ExternalCommandExtractor {
    runner: Arc<dyn CommandRunner>,
    credentials: Arc<dyn CredentialProvider>,
    audit: Arc<dyn AuditSink>,
    paths: JsonPathExtractor,
}

impl ExternalCommandExtractor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        credentials: Arc<dyn CredentialProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            runner,
            credentials,
            audit,
            paths: JsonPathExtractor::new(),
        }
    }

    /// Run every mapping whose gates pass, in order.
    ///
    /// `unit_token` carries the unit's session credentials; a mapping with
    /// its own role assumes it instead, and with neither the command runs
    /// as the ambient principal's assumed identity.
    pub async fn process(
        &self,
        evaluator: &ConditionEvaluator,
        mappings: &[CommandMapping],
        unit_token: Option<&SessionToken>,
        unit_store: &Arc<dyn ParameterStore>,
        mapper: &OutputParameterMapper,
        outputs: &mut OutputParameterSet,
    ) -> Result<()> {
        if mappings.is_empty() {
            return Ok(());
        }
        tracing::debug!("Command Output Parameter Mappings:");

        let resolver = ParameterResolver::new(unit_store.clone());
        for mapping in mappings {
            if !evaluator.passes(
                mapping.condition.as_deref(),
                mapping.check.as_ref(),
                &mapping.region,
                outputs,
            )? {
                continue;
            }
            self.run_mapping(evaluator, mapping, unit_token, &resolver, unit_store, mapper, outputs)
                .await?;
        }
        Ok(())
    }

    async fn run_mapping(
        &self,
        evaluator: &ConditionEvaluator,
        mapping: &CommandMapping,
        unit_token: Option<&SessionToken>,
        resolver: &ParameterResolver,
        unit_store: &Arc<dyn ParameterStore>,
        mapper: &OutputParameterMapper,
        outputs: &mut OutputParameterSet,
    ) -> Result<()> {
        let env = self
            .credential_env(unit_token, mapping.role.as_deref(), evaluator.region())
            .await?;

        let mut command_line = mapping.command.clone();
        for spec in &mapping.command_parameters {
            let bound = spec.bind()?;
            let value = resolver.resolve(&bound.binding, outputs).await?;
            match (&bound.name, mapping.spacing) {
                (Some(name), true) => {
                    command_line.push(' ');
                    command_line.push_str(name);
                    command_line.push(' ');
                    command_line.push_str(&value);
                }
                (Some(name), false) => {
                    command_line.push_str(name);
                    command_line.push_str(&value);
                }
                (None, true) => {
                    command_line.push(' ');
                    command_line.push_str(&value);
                }
                (None, false) => command_line.push_str(&value),
            }
        }

        // The audit shows the line before `{SPACE}` expansion, so a value
        // that smuggles a space through the argv split stays visible.
        self.audit.record(&format!("Executing: {command_line}"));
        let built = command_line.replace("{SPACE}", " ");

        let argv = shell_words::split(&built)
            .map_err(|e| Error::Command(format!("Unable to parse command: {e}")))?;
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::Command("Unable to execute command.".into()));
        };

        let mut process = ProcessCommand::new(program).args(args.iter().cloned());
        process.env = env;

        let output = match self.runner.run(process).await {
            Ok(output) => output,
            Err(e) => {
                self.audit.record(&e.to_string());
                return Err(Error::Command("Unable to execute command.".into()));
            }
        };

        // The exit code is deliberately ignored; CLI tools that page
        // results can exit nonzero after printing a usable document.
        if !output.stderr.is_empty() {
            self.audit.record(&format!("Errors: {}", output.stderr));
            return Err(Error::Command("Unable to execute command.".into()));
        }

        if mapping.parameters.is_empty() {
            return Ok(());
        }

        let document: Value = serde_json::from_str(&output.stdout)?;
        for (name, extraction) in &mapping.parameters {
            let value = self.paths.extract(
                &document,
                &extraction.parameter_name,
                extraction.default_parameter_value.as_deref(),
            )?;
            mapper
                .apply_mapping(evaluator, name, &value, extraction, unit_store, outputs)
                .await?;
        }
        Ok(())
    }

    /// Mint the environment the command runs with: access keys for the
    /// chosen principal plus the effective region.
    async fn credential_env(
        &self,
        active: Option<&SessionToken>,
        role: Option<&str>,
        region: &str,
    ) -> Result<HashMap<String, String>> {
        let token = match (active, role) {
            (_, Some(arn)) => {
                let token = self.credentials.assume(arn).await?;
                self.audit.record(&format!("Using role: {arn}"));
                token
            }
            (Some(token), None) => {
                self.audit.record("Using role from stack credentials.");
                token.clone()
            }
            (None, None) => {
                let identity = self.credentials.identity().await?;
                let token = self.credentials.assume(&identity.arn).await?;
                self.audit.record(&format!("Using role: {}", identity.arn));
                token
            }
        };

        let mut env = HashMap::new();
        env.insert("AWS_ACCESS_KEY_ID".into(), token.access_key);
        env.insert("AWS_SECRET_ACCESS_KEY".into(), token.secret_key);
        env.insert("AWS_SESSION_TOKEN".into(), token.session_token);
        env.insert("AWS_DEFAULT_REGION".into(), region.to_string());
        self.audit.record(&format!("Using region: {region}"));
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::mocks::MemoryAudit;
    use crate::cloud::mock::{MockCloud, MockCloudFactory};
    use crate::cloud::{CredentialBroker, ParameterKind};
    use crate::conditions::{RegionGate, ValueCheck};
    use crate::config::{InputParameterSpec, OutputMapping};
    use crate::subprocess::MockCommandRunner;
    use std::collections::BTreeMap;

    const GATEWAY_JSON: &str = r#"{
        "VpnGateways": [
            {"VpnGatewayId": "vgw-0a1b", "State": "available"}
        ]
    }"#;

    struct Fixture {
        extractor: ExternalCommandExtractor,
        runner: MockCommandRunner,
        cloud: MockCloud,
        mapper: OutputParameterMapper,
        audit: Arc<MemoryAudit>,
    }

    fn fixture() -> Fixture {
        let cloud = MockCloud::new();
        let runner = MockCommandRunner::new();
        let audit = Arc::new(MemoryAudit::new());
        let factory = Arc::new(MockCloudFactory::new(cloud.clone()));
        let broker = Arc::new(CredentialBroker::new(cloud.credentials.clone(), audit.clone()));
        let mapper = OutputParameterMapper::new(factory, broker);
        let extractor = ExternalCommandExtractor::new(
            Arc::new(runner.clone()),
            cloud.credentials.clone(),
            audit.clone(),
        );
        Fixture {
            extractor,
            runner,
            cloud,
            mapper,
            audit,
        }
    }

    fn evaluator(pairs: &[(&str, bool)]) -> ConditionEvaluator {
        let table = if pairs.is_empty() {
            None
        } else {
            Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect::<BTreeMap<_, _>>(),
            )
        };
        ConditionEvaluator::new(table, "us-east-1").unwrap()
    }

    fn mapping(command: &str) -> CommandMapping {
        CommandMapping {
            description: "Describe the VPN gateway".into(),
            command: command.into(),
            spacing: true,
            condition: None,
            check: None,
            region: RegionGate::default(),
            role: None,
            command_parameters: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    fn extraction(path: &str) -> OutputMapping {
        OutputMapping {
            parameter_name: path.into(),
            description: "Extracted value".into(),
            condition: None,
            map_parameter_name: None,
            parameter_store_field_name: None,
            parameter_store_field_type: ParameterKind::String,
            role: None,
            default_parameter_value: None,
        }
    }

    async fn run(
        f: &Fixture,
        evaluator: &ConditionEvaluator,
        mappings: &[CommandMapping],
        outputs: &mut OutputParameterSet,
    ) -> Result<()> {
        let store: Arc<dyn ParameterStore> = f.cloud.params.clone();
        f.extractor
            .process(evaluator, mappings, None, &store, &f.mapper, outputs)
            .await
    }

    #[tokio::test]
    async fn extracts_values_from_command_output() {
        let f = fixture();
        f.runner
            .expect("aws")
            .returns_stdout(GATEWAY_JSON)
            .finish();

        let mut m = mapping("aws ec2 describe-vpn-gateways");
        m.parameters.insert(
            "VpnGatewayId".into(),
            extraction("/VpnGateways[0]/VpnGatewayId"),
        );

        let mut outputs = OutputParameterSet::new();
        run(&f, &evaluator(&[]), &[m], &mut outputs).await.unwrap();

        assert_eq!(outputs.get("VpnGatewayId"), Some("vgw-0a1b"));
        assert!(f.audit.contains("Executing: aws ec2 describe-vpn-gateways"));
        assert!(f.audit.contains("Using region: us-east-1"));

        let calls = f.runner.call_history();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "aws");
        assert_eq!(calls[0].args, vec!["ec2", "describe-vpn-gateways"]);
        assert_eq!(
            calls[0].env.get("AWS_DEFAULT_REGION").map(String::as_str),
            Some("us-east-1")
        );
        assert!(calls[0].env.contains_key("AWS_ACCESS_KEY_ID"));
        assert!(calls[0].env.contains_key("AWS_SESSION_TOKEN"));
    }

    #[tokio::test]
    async fn ambient_runs_assume_the_caller_identity() {
        let f = fixture();
        f.runner.expect("aws").returns_stdout("{}").finish();

        let mut outputs = OutputParameterSet::new();
        run(&f, &evaluator(&[]), &[mapping("aws sts get-caller-identity")], &mut outputs)
            .await
            .unwrap();

        assert_eq!(
            f.cloud.credentials.assumed_roles(),
            vec!["arn:aws:iam::123456789012:user/mock".to_string()]
        );
        assert!(f.audit.contains("Using role: arn:aws:iam::123456789012:user/mock"));
    }

    #[tokio::test]
    async fn command_parameters_append_with_spacing_and_space_expansion() {
        let f = fixture();
        f.runner.expect("aws").returns_stdout("{}").finish();

        let mut m = mapping("aws ec2 describe-instances");
        m.command_parameters.push(InputParameterSpec {
            parameter_name: Some("--filters".into()),
            parameter_value: Some("\"Name=tag:Name,Values=api{SPACE}server\"".into()),
            ..Default::default()
        });

        let mut outputs = OutputParameterSet::new();
        run(&f, &evaluator(&[]), &[m], &mut outputs).await.unwrap();

        // The audit line keeps the placeholder; the child sees the space.
        assert!(f.audit.contains(
            "Executing: aws ec2 describe-instances --filters \"Name=tag:Name,Values=api{SPACE}server\""
        ));
        let calls = f.runner.call_history();
        assert_eq!(
            calls[0].args,
            vec![
                "ec2",
                "describe-instances",
                "--filters",
                "Name=tag:Name,Values=api server"
            ]
        );
    }

    #[tokio::test]
    async fn unspaced_parameters_splice_into_the_command() {
        let f = fixture();
        f.runner.expect("lookup").returns_stdout("{}").finish();

        let mut m = mapping("lookup --key=");
        m.spacing = false;
        m.command_parameters.push(InputParameterSpec {
            parameter_value: Some("primary".into()),
            ..Default::default()
        });

        let mut outputs = OutputParameterSet::new();
        run(&f, &evaluator(&[]), &[m], &mut outputs).await.unwrap();

        let calls = f.runner.call_history();
        assert_eq!(calls[0].args, vec!["--key=primary"]);
    }

    #[tokio::test]
    async fn matching_parameters_resolve_from_accumulated_outputs() {
        let f = fixture();
        f.runner.expect("aws").returns_stdout("{}").finish();

        let mut m = mapping("aws ec2 describe-subnets");
        m.command_parameters.push(InputParameterSpec {
            parameter_name: Some("--vpc-id".into()),
            matching_parameter_name: Some("VpcId".into()),
            ..Default::default()
        });

        let mut outputs = OutputParameterSet::new();
        outputs.insert("VpcId", "vpc-11aa");
        run(&f, &evaluator(&[]), &[m], &mut outputs).await.unwrap();

        let calls = f.runner.call_history();
        assert_eq!(
            calls[0].args,
            vec!["ec2", "describe-subnets", "--vpc-id", "vpc-11aa"]
        );
    }

    #[tokio::test]
    async fn gates_skip_the_whole_mapping() {
        let f = fixture();

        let mut gated = mapping("aws ec2 describe-vpn-gateways");
        gated.condition = Some("deployVpn".into());

        let mut checked = mapping("aws ec2 describe-subnets");
        checked.check = Some(ValueCheck {
            parameter_name: "Tier".into(),
            check_value: "production".into(),
        });

        let mut pinned = mapping("aws ec2 describe-regions");
        pinned.region.require = Some("eu-west-1".into());

        let mut outputs = OutputParameterSet::new();
        outputs.insert("Tier", "staging");
        run(
            &f,
            &evaluator(&[("deployVpn", false)]),
            &[gated, checked, pinned],
            &mut outputs,
        )
        .await
        .unwrap();

        assert!(f.runner.call_history().is_empty());
    }

    #[tokio::test]
    async fn stderr_output_fails_the_mapping() {
        let f = fixture();
        f.runner
            .expect("aws")
            .returns_stderr("AccessDenied when calling DescribeVpnGateways")
            .finish();

        let mut outputs = OutputParameterSet::new();
        let err = run(
            &f,
            &evaluator(&[]),
            &[mapping("aws ec2 describe-vpn-gateways")],
            &mut outputs,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("Unable to execute command."));
        assert!(f.audit.contains("Errors: AccessDenied"));
    }

    #[tokio::test]
    async fn spawn_failures_audit_and_fail() {
        let f = fixture();
        // No expectation registered for the program.
        let mut outputs = OutputParameterSet::new();
        let err = run(&f, &evaluator(&[]), &[mapping("missing-cli describe")], &mut outputs)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Unable to execute command."));
        assert!(f.audit.contains("No expectation found"));
    }

    #[tokio::test]
    async fn exit_code_is_ignored_when_output_parses() {
        let f = fixture();
        f.runner
            .expect("aws")
            .returns_stdout(GATEWAY_JSON)
            .returns_exit_code(255)
            .finish();

        let mut m = mapping("aws ec2 describe-vpn-gateways");
        m.parameters
            .insert("State".into(), extraction("/VpnGateways[0]/State"));

        let mut outputs = OutputParameterSet::new();
        run(&f, &evaluator(&[]), &[m], &mut outputs).await.unwrap();
        assert_eq!(outputs.get("State"), Some("available"));
    }

    #[tokio::test]
    async fn missing_paths_fall_back_to_the_extraction_default() {
        let f = fixture();
        f.runner.expect("aws").returns_stdout("{}").finish();

        let mut m = mapping("aws ec2 describe-vpn-gateways");
        let mut rule = extraction("/VpnGateways[0]/VpnGatewayId");
        rule.default_parameter_value = Some("vgw-none".into());
        rule.map_parameter_name = Some("GatewayId".into());
        m.parameters.insert("VpnGatewayId".into(), rule);

        let mut outputs = OutputParameterSet::new();
        run(&f, &evaluator(&[]), &[m], &mut outputs).await.unwrap();
        assert_eq!(outputs.get("GatewayId"), Some("vgw-none"));
        assert_eq!(outputs.get("VpnGatewayId"), None);
    }

    #[tokio::test]
    async fn extracted_values_can_mirror_to_the_store() {
        let f = fixture();
        f.runner
            .expect("aws")
            .returns_stdout(GATEWAY_JSON)
            .finish();

        let mut m = mapping("aws ec2 describe-vpn-gateways");
        let mut rule = extraction("/VpnGateways[0]/VpnGatewayId");
        rule.parameter_store_field_name = Some("/infra/vpn-gateway".into());
        m.parameters.insert("VpnGatewayId".into(), rule);

        let mut outputs = OutputParameterSet::new();
        run(&f, &evaluator(&[]), &[m], &mut outputs).await.unwrap();

        let puts = f.cloud.params.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].name, "/infra/vpn-gateway");
        assert_eq!(puts[0].value, "vgw-0a1b");
    }

    #[tokio::test]
    async fn mapping_role_runs_the_command_under_that_role() {
        let f = fixture();
        f.runner.expect("aws").returns_stdout("{}").finish();

        let mut m = mapping("aws ec2 describe-vpn-gateways");
        m.role = Some("arn:aws:iam::210987654321:role/describe".into());

        let mut outputs = OutputParameterSet::new();
        run(&f, &evaluator(&[]), &[m], &mut outputs).await.unwrap();

        assert_eq!(
            f.cloud.credentials.assumed_roles(),
            vec!["arn:aws:iam::210987654321:role/describe".to_string()]
        );
        assert!(f
            .audit
            .contains("Using role: arn:aws:iam::210987654321:role/describe"));
    }
}
