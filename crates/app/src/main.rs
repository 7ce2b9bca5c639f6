use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use quickstart_check::{
    api::{ApiClient, DagRunRequest},
    config::{QuickstartConfig, load_config},
    diagnostics,
    error::ScenarioError,
    harness::{ComposeStack, Orchestrator},
    poll::{self, PollOutcome, PollPolicy, RunState},
    scenario::{ScenarioDriver, Teardown},
};

#[derive(Parser, Debug)]
#[command(
    name = "quickstart-check",
    version,
    about = "Verify the Airflow docker-compose quick start end to end"
)]
struct Cli {
    /// Path to the configuration file (defaults to ./quickstart.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<Utf8PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring the stack up, run the example DAG and tear everything down
    Run(RunArgs),
    /// Unpause the DAG and create the configured run against a running stack
    Trigger,
    /// Poll the configured run and fail unless it ends in success
    Wait,
    /// Print the service health document
    Health,
    /// Print a freshly issued bearer token
    Token,
    /// Dump diagnostics for a stack kept alive with --skip-teardown
    Diagnose(DiagnoseArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Leave the stack running and print how to reach it
    #[arg(long)]
    skip_teardown: bool,
}

#[derive(Args, Debug)]
struct DiagnoseArgs {
    /// Directory the stack was started from
    #[arg(long, value_name = "DIR")]
    project_directory: Utf8PathBuf,
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load(cli.config.as_deref())?;
    match cli.command {
        Command::Run(args) => run(config, args),
        Command::Trigger => trigger(&config),
        Command::Wait => wait(&config),
        Command::Health => {
            let health = ApiClient::new(&config.api).health()?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(())
        }
        Command::Token => {
            let credential = ApiClient::new(&config.api).credential()?;
            println!("{}", credential.as_str());
            Ok(())
        }
        Command::Diagnose(args) => diagnose(&config, &args.project_directory),
    }
}

fn load(explicit_path: Option<&Utf8Path>) -> Result<QuickstartConfig> {
    load_config(explicit_path).context("failed to load quickstart-check configuration")
}

fn run(mut config: QuickstartConfig, args: RunArgs) -> Result<()> {
    config.stack.skip_teardown |= args.skip_teardown;
    let api = ApiClient::new(&config.api);
    let stack = ComposeStack::new(&config.stack);

    let report = ScenarioDriver::new(&config, &api, stack).run()?;
    match &report.teardown {
        Teardown::Removed => {}
        Teardown::Failed(reason) => warn!(%reason, "compose stack may still be running"),
        Teardown::Skipped { workdir, .. } => {
            info!(workdir = %workdir.display(), "stack left running")
        }
    }

    let verdict = report.into_result()?;
    info!(
        dag_id = %config.workflow.dag_id,
        iterations = verdict.iterations,
        "quick start verified"
    );
    Ok(())
}

fn trigger(config: &QuickstartConfig) -> Result<()> {
    let api = ApiClient::new(&config.api);
    let workflow = &config.workflow;
    api.set_dag_paused(&workflow.dag_id, false)?;
    let run = api.trigger_dag_run(
        &workflow.dag_id,
        &DagRunRequest {
            dag_run_id: workflow.dag_run_id.clone(),
            logical_date: workflow.logical_date.clone(),
        },
    )?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

fn wait(config: &QuickstartConfig) -> Result<()> {
    let api = ApiClient::new(&config.api);
    let workflow = &config.workflow;
    let outcome = poll::wait_for_terminal(
        &api,
        &workflow.dag_id,
        &workflow.dag_run_id,
        PollPolicy::from(&config.poll),
    )?;

    match outcome {
        PollOutcome::Terminal {
            state: RunState::Success,
            iterations,
        } => {
            info!(iterations, "DAG run succeeded");
            Ok(())
        }
        other => Err(ScenarioError::UnexpectedRunState {
            dag_id: workflow.dag_id.clone(),
            dag_run_id: workflow.dag_run_id.clone(),
            actual: other.last_state().map(ToString::to_string),
            iterations: other.iterations(),
        }
        .into()),
    }
}

fn diagnose(config: &QuickstartConfig, project_directory: &Utf8Path) -> Result<()> {
    let api = ApiClient::new(&config.api);
    let mut stack = ComposeStack::attach(&config.stack, project_directory.as_std_path());
    let versions = stack
        .ensure_available()
        .map_err(|err| warn!(?err, "container tooling unavailable"))
        .ok();

    let report = diagnostics::collect(
        &api,
        &stack,
        &config.workflow.dag_id,
        &config.workflow.dag_run_id,
        versions.as_ref(),
    );
    diagnostics::emit(&report, config.stack.artifacts_dir.as_deref());
    if report.failures() > 0 {
        warn!(failures = report.failures(), "some diagnostics were unavailable");
    }
    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let no_color = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!no_color)
        .try_init();
}
