use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::DateTime;
use tracing::{error, info, warn};

use crate::{
    api::{ApiClient, DagRunRequest},
    config::QuickstartConfig,
    diagnostics::{self, DiagnosticReport, banner},
    error::ScenarioError,
    harness::{Orchestrator, StackWorkdir, ToolVersions},
    poll::{self, PollPolicy, RunState, RunStatusSource},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    StackUp,
    DagEnsured,
    Triggered,
    Polling,
    Passed,
    Failed,
    Teardown,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Teardown {
    Removed,
    /// `down` itself failed; recorded but never allowed to mask the run outcome.
    Failed(String),
    Skipped { command: String, workdir: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub state: RunState,
    pub iterations: u32,
}

#[derive(Debug)]
pub struct ScenarioReport {
    pub stages: Vec<Stage>,
    pub outcome: Result<Verdict>,
    pub diagnostics: Option<DiagnosticReport>,
    pub teardown: Teardown,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The primary error of a failed run, untouched by diagnostics or teardown.
    pub fn into_result(self) -> Result<Verdict> {
        self.outcome
    }
}

/// Sequences the quick-start verification against one compose project.
pub struct ScenarioDriver<'a, O: Orchestrator> {
    config: &'a QuickstartConfig,
    api: &'a ApiClient,
    stack: O,
    stages: Vec<Stage>,
    versions: Option<ToolVersions>,
    /// Set once containers may exist; cleared when teardown has been handled.
    armed: bool,
}

impl<'a, O: Orchestrator> ScenarioDriver<'a, O> {
    pub fn new(config: &'a QuickstartConfig, api: &'a ApiClient, stack: O) -> Self {
        Self {
            config,
            api,
            stack,
            stages: Vec::new(),
            versions: None,
            armed: false,
        }
    }

    pub fn stack(&self) -> &O {
        &self.stack
    }

    /// Run the scenario. `Err` means it could not start (nothing to tear down); a started run
    /// always yields a report, whose outcome carries the primary failure.
    pub fn run(mut self) -> Result<ScenarioReport> {
        self.enter(Stage::Init);
        validate_logical_date(&self.config.workflow.logical_date)?;
        let versions = self.stack.ensure_available()?;
        info!(compose = %versions.compose, "container tooling available");
        self.versions = Some(versions);

        let workdir = StackWorkdir::create(&self.config.stack)?;
        self.stack
            .prepare(workdir.path(), self.config.stack.image_name.as_deref())
            .context("failed to prepare stack directory")?;
        self.stack
            .down()
            .context("failed to remove a previous instance of the stack")?;
        self.armed = true;

        let outcome = self.drive();
        let diagnostics = match &outcome {
            Ok(verdict) => {
                self.enter(Stage::Passed);
                info!(
                    state = %verdict.state,
                    iterations = verdict.iterations,
                    "DAG run succeeded"
                );
                None
            }
            Err(err) => {
                self.enter(Stage::Failed);
                error!(error = ?err, "scenario failed; collecting diagnostics");
                let report = self.collect_diagnostics();
                diagnostics::emit(&report, self.config.stack.artifacts_dir.as_deref());
                Some(report)
            }
        };

        self.enter(Stage::Teardown);
        let teardown = self.teardown(workdir);
        self.enter(Stage::Done);

        Ok(ScenarioReport {
            stages: std::mem::take(&mut self.stages),
            outcome,
            diagnostics,
            teardown,
        })
    }

    fn drive(&mut self) -> Result<Verdict> {
        let config = self.config;
        let workflow = &config.workflow;

        self.enter(Stage::StackUp);
        self.stack.up().context("failed to start compose stack")?;

        self.enter(Stage::DagEnsured);
        let service = &config.stack.dag_processor_service;
        self.stack
            .exec(service, &config.stack.reserialize_command)
            .with_context(|| format!("failed to reserialize DAGs in {service}"))?;

        self.enter(Stage::Triggered);
        self.api
            .set_dag_paused(&workflow.dag_id, false)
            .with_context(|| format!("failed to unpause {}", workflow.dag_id))?;
        let request = DagRunRequest {
            dag_run_id: workflow.dag_run_id.clone(),
            logical_date: workflow.logical_date.clone(),
        };
        self.api
            .trigger_dag_run(&workflow.dag_id, &request)
            .with_context(|| format!("failed to trigger {}", workflow.dag_id))?;

        self.enter(Stage::Polling);
        let details = self.api.dag_details(&workflow.dag_id)?;
        println!(
            "{}",
            banner(
                &format!(" Simplified representation of DAG {} ", workflow.dag_id),
                '='
            )
        );
        println!(
            "{}",
            serde_json::to_string_pretty(&details).unwrap_or_else(|_| details.to_string())
        );

        let policy = PollPolicy::from(&config.poll);
        let outcome =
            poll::wait_for_terminal(self.api, &workflow.dag_id, &workflow.dag_run_id, policy)?;
        let state = self.api.run_state(&workflow.dag_id, &workflow.dag_run_id)?;
        match state {
            Some(RunState::Success) => Ok(Verdict {
                state: RunState::Success,
                iterations: outcome.iterations(),
            }),
            other => Err(ScenarioError::UnexpectedRunState {
                dag_id: workflow.dag_id.clone(),
                dag_run_id: workflow.dag_run_id.clone(),
                actual: other.map(|state| state.to_string()),
                iterations: outcome.iterations(),
            }
            .into()),
        }
    }

    fn collect_diagnostics(&self) -> DiagnosticReport {
        diagnostics::collect(
            self.api,
            &self.stack,
            &self.config.workflow.dag_id,
            &self.config.workflow.dag_run_id,
            self.versions.as_ref(),
        )
    }

    fn teardown(&mut self, workdir: StackWorkdir) -> Teardown {
        self.armed = false;
        if self.config.stack.skip_teardown {
            let command = self.stack.reproduction_command();
            let workdir = workdir.persist();
            println!("Skipping docker-compose deletion");
            println!();
            println!("You can inspect your docker-compose by running commands starting with:");
            println!("{command}");
            return Teardown::Skipped { command, workdir };
        }

        match self.stack.down() {
            Ok(()) => {
                println!("Docker compose instance deleted");
                Teardown::Removed
            }
            Err(err) => {
                warn!(error = ?err, "failed to remove compose stack");
                Teardown::Failed(format!("{err:#}"))
            }
        }
    }

    fn enter(&mut self, stage: Stage) {
        info!(?stage, "scenario stage");
        self.stages.push(stage);
    }
}

impl<O: Orchestrator> Drop for ScenarioDriver<'_, O> {
    fn drop(&mut self) {
        if !self.armed || self.config.stack.skip_teardown {
            return;
        }
        warn!("scenario aborted before teardown; removing compose stack");
        if let Err(err) = self.stack.down() {
            warn!(error = ?err, "failed to remove compose stack");
        }
    }
}

fn validate_logical_date(value: &str) -> Result<(), ScenarioError> {
    DateTime::parse_from_rfc3339(value)
        .map(drop)
        .map_err(|source| ScenarioError::InvalidLogicalDate {
            value: value.to_string(),
            source,
        })
}
