// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kube::Client;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shipyard::config::{ExecutionContext, PropagationConfig, ProvisionConfig};
use shipyard::credentials;
use shipyard::guard::Guard;
use shipyard::helm::HelmCli;
use shipyard::outcome::Outcome;
use shipyard::propagate::{GitHubClient, PropagationRequest, Propagator, RepoRef};
use shipyard::provision::{build_plan, Orchestrator};
use shipyard::resources::PodSqlExecutor;

#[derive(Parser)]
#[command(name = "shipyard", version, about = "Bootstrap a cluster and its service credentials")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install cluster infrastructure and per-service databases and secrets
    Provision(ProvisionArgs),
    /// Make sure named secrets exist in a repository, requesting missing ones
    Propagate(PropagateArgs),
    /// Print the database name, user and secret name derived for a service
    Derive { service: String },
}

#[derive(Args)]
struct ProvisionArgs {
    /// Recreate existing resources instead of reusing them
    #[arg(long)]
    cleanup: bool,
    /// Allow recreating resources that hold data
    #[arg(long)]
    allow_data_loss: bool,
    /// Generate new service credentials even when stored ones exist
    #[arg(long)]
    rotate_credentials: bool,
}

#[derive(Args)]
struct PropagateArgs {
    /// Repository that needs the secrets (owner/name)
    #[arg(long)]
    repo: RepoRef,
    /// Secret name; repeat or separate with commas
    #[arg(long = "secret", value_delimiter = ',', required = true)]
    secrets: Vec<String>,
    #[arg(long, conflicts_with = "automated")]
    interactive: bool,
    #[arg(long)]
    automated: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match run(cli.command).await {
        Ok(Some((outcome, unresolved))) => {
            println!("{}", outcome.status_line(unresolved));
            outcome.exit_code()
        }
        Ok(None) => 0,
        Err(e) => {
            error!("{:#}", e);
            println!("{}", Outcome::Failed.status_line(0));
            Outcome::Failed.exit_code()
        }
    };
    std::process::exit(code);
}

/// Run a subcommand, returning its outcome and the number of unresolved items
async fn run(command: Command) -> Result<Option<(Outcome, usize)>> {
    match command {
        Command::Provision(args) => provision(args).await.map(Some),
        Command::Propagate(args) => propagate(args).await.map(Some),
        Command::Derive { service } => {
            let names = credentials::derive(&service)?;
            println!("{}", serde_json::to_string_pretty(&names)?);
            Ok(None)
        }
    }
}

async fn provision(args: ProvisionArgs) -> Result<(Outcome, usize)> {
    let mut config = ProvisionConfig::from_env().context("Failed to load configuration")?;
    if args.allow_data_loss {
        config.actions.allow_data_loss = true;
    }
    if args.cleanup {
        config.enable_cleanup();
    }
    if args.rotate_credentials {
        config.rotate_credentials = true;
    }
    info!(
        "Provisioning {} service(s), rotate credentials: {}, data loss allowed: {}",
        config.services.len(),
        config.rotate_credentials,
        config.actions.allow_data_loss
    );

    let client = Client::try_default()
        .await
        .context("Failed to connect to the Kubernetes cluster")?;
    info!("Connected to Kubernetes cluster");

    let sql = Arc::new(PodSqlExecutor::new(
        client.clone(),
        &config.database_namespace,
        "postgresql-0",
        "postgres",
        "POSTGRES_PASSWORD",
    ));
    let steps = build_plan(&config, &client, Arc::new(HelmCli::default()), sql)
        .await
        .context("Failed to build the provisioning plan")?;

    let orchestrator = Orchestrator::new(
        Guard::new(config.actions.allow_data_loss, config.ready_policy()),
        config.ready_policy(),
    );
    let report = orchestrator.run(&steps).await;

    for step in &report.steps {
        info!("{}", step);
    }
    let unresolved = report.unresolved();
    for step in &unresolved {
        warn!("Unresolved: {}", step);
    }
    Ok((report.outcome(), unresolved.len()))
}

async fn propagate(args: PropagateArgs) -> Result<(Outcome, usize)> {
    let mut config = PropagationConfig::from_env().context("Failed to load configuration")?;
    if args.interactive {
        config.context = ExecutionContext::Interactive;
    } else if args.automated {
        config.context = ExecutionContext::Automated;
    }

    let request = PropagationRequest::new(args.repo, &args.secrets)?;
    let github = GitHubClient::new(config.api_url.clone(), config.require_token()?)?;
    let propagator = Propagator::new(
        &github,
        config.source.clone(),
        config.poll_policy(),
        config.context,
    );

    let report = propagator.run(&request).await?;
    if let Some(failure) = report.failure() {
        error!("{}", failure);
    }
    Ok((report.outcome(), report.unresolved().len()))
}
