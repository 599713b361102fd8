use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, error, info};

use cascade::audit::FileAudit;
use cascade::config::load_plan;

/// Deploy sequenced CloudFormation stacks from a declarative plan
#[derive(Parser)]
#[command(name = "cascade")]
#[command(about = "Cascade - Sequenced stack deployments with output chaining", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a deployment plan end to end
    Deploy {
        /// Path to the deployment plan (YAML or JSON)
        #[arg(long)]
        plan: PathBuf,

        /// Deployment region the plan's region gates evaluate against
        #[arg(long, env = "AWS_DEFAULT_REGION", default_value = "us-east-1")]
        region: String,

        /// Directory for the audit log (overrides the plan's output_dir)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Load and validate a plan without touching the control plane
    Validate {
        /// Path to the deployment plan (YAML or JSON)
        #[arg(long)]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("Cascade started with verbosity level: {}", cli.verbose);

    let result = match cli.command {
        Commands::Deploy {
            plan,
            region,
            output_dir,
        } => run_deploy(plan, region, output_dir).await,
        Commands::Validate { plan } => run_validate(plan).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run_deploy(
    path: PathBuf,
    region: String,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let plan = load_plan(&path)
        .await
        .with_context(|| format!("Unable to load plan {}", path.display()))?;

    let output_dir = output_dir.unwrap_or_else(|| plan.output_dir.clone());
    let audit = FileAudit::create(&output_dir).with_context(|| {
        format!(
            "Unable to open the audit log under {}",
            output_dir.display()
        )
    })?;
    let shown = std::fs::canonicalize(&output_dir).unwrap_or(output_dir);
    info!("Output Directory {}.", shown.display());

    #[cfg(feature = "aws")]
    {
        use std::sync::Arc;

        use cascade::cloud::aws::AwsCloudFactory;
        use cascade::deploy::DeploymentOrchestrator;
        use cascade::subprocess::TokioCommandRunner;

        let factory = Arc::new(AwsCloudFactory::load(&region).await);
        let runner = Arc::new(TokioCommandRunner);
        let orchestrator =
            DeploymentOrchestrator::new(plan, factory, runner, Arc::new(audit), &region)
                .context("Unable to construct the deployment engine")?;
        orchestrator.execute().await.context("Deployment failed")?;
        Ok(())
    }
    #[cfg(not(feature = "aws"))]
    {
        let _ = (plan, audit, region);
        anyhow::bail!("This build carries no cloud adapters; rebuild with --features aws.")
    }
}

async fn run_validate(path: PathBuf) -> anyhow::Result<()> {
    let plan = load_plan(&path)
        .await
        .with_context(|| format!("Unable to load plan {}", path.display()))?;
    plan.validate()
        .with_context(|| format!("Plan {} failed validation", path.display()))?;
    println!("Plan {} is valid.", path.display());
    Ok(())
}
