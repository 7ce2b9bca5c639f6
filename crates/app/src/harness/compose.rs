use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use anyhow::{Context, Result, anyhow};
use camino::Utf8PathBuf;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Orchestrator, ServiceSnapshot, ToolVersions, materialize, shell_quote};
use crate::{config::StackConfig, diagnostics::banner, error::HarnessError};

/// `docker compose` driven through the CLI, pinned to one project name and directory.
#[derive(Debug, Clone)]
pub struct ComposeStack {
    docker: PathBuf,
    project_name: String,
    compose_source: Utf8PathBuf,
    project_dir: Option<PathBuf>,
    image_name: Option<String>,
    airflow_uid: Option<u32>,
    no_color: bool,
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Service", default)]
    service: String,
    #[serde(rename = "State", default)]
    state: String,
}

impl ComposeStack {
    pub fn new(config: &StackConfig) -> Self {
        Self {
            docker: PathBuf::from("docker"),
            project_name: config.project_name.clone(),
            compose_source: config.compose_file.clone(),
            project_dir: None,
            image_name: config.image_name.clone(),
            airflow_uid: config.airflow_uid,
            no_color: config.no_color,
        }
    }

    /// Point at a project directory prepared by an earlier run.
    pub fn attach(config: &StackConfig, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: Some(project_dir.into()),
            ..Self::new(config)
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn project_dir(&self) -> Option<&Path> {
        self.project_dir.as_deref()
    }

    fn compose_command(&self) -> Command {
        let mut cmd = Command::new(&self.docker);
        cmd.arg("compose").arg("--project-name").arg(&self.project_name);
        if let Some(dir) = &self.project_dir {
            cmd.arg("--project-directory").arg(dir).current_dir(dir);
        }
        if let Some(image) = &self.image_name {
            cmd.env("AIRFLOW_IMAGE_NAME", image);
        }
        cmd
    }

    fn run_compose<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<Output> {
        let rendered = args
            .iter()
            .map(|arg| arg.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        debug!(project = %self.project_name, args = %rendered, "docker compose");

        let output = self
            .compose_command()
            .args(args)
            .output()
            .with_context(|| format!("failed to execute docker compose {rendered}"))?;

        if output.status.success() {
            return Ok(output);
        }

        Err(HarnessError::Compose {
            args: rendered,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into())
    }

    fn docker_text(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.docker)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute docker {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "docker {} failed (code {:?}): {}",
                args.join(" "),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn inspect(&self, container: &str) -> Result<Value> {
        let raw = self.docker_text(&["inspect", container])?;
        let parsed: Value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid docker inspect output for {container}"))?;
        match parsed {
            Value::Array(mut items) if !items.is_empty() => Ok(items.swap_remove(0)),
            other => Ok(other),
        }
    }
}

impl Orchestrator for ComposeStack {
    fn ensure_available(&mut self) -> Result<ToolVersions> {
        let docker = which::which(&self.docker).map_err(|err| HarnessError::OrchestratorUnavailable {
            reason: format!("docker binary not found: {err}"),
        })?;
        self.docker = docker;

        let compose = self
            .docker_text(&["compose", "version"])
            .map_err(|err| HarnessError::OrchestratorUnavailable {
                reason: format!("{err:#}"),
            })?;
        let docker = self.docker_text(&["version"]).unwrap_or_else(|err| {
            warn!(?err, "docker version unavailable");
            format!("<unavailable: {err:#}>")
        });

        Ok(ToolVersions {
            docker: docker.trim().to_string(),
            compose: compose.trim().to_string(),
        })
    }

    fn prepare(&mut self, workdir: &Path, image_name: Option<&str>) -> Result<()> {
        let layout = materialize(workdir, self.compose_source.as_std_path(), self.airflow_uid)?;
        println!("{}", banner(" .env file content ", '='));
        println!("{}", layout.dot_env_contents);

        self.project_dir = Some(workdir.to_path_buf());
        if let Some(image) = image_name {
            self.image_name = Some(image.to_string());
        }
        Ok(())
    }

    fn up(&self) -> Result<()> {
        let mut args = vec!["up", "--detach", "--wait"];
        if self.no_color {
            args.push("--no-color");
        }
        info!(project = %self.project_name, "starting compose stack");
        let output = self.run_compose(&args)?;
        debug!(stderr = %String::from_utf8_lossy(&output.stderr), "compose up finished");
        Ok(())
    }

    fn down(&self) -> Result<()> {
        info!(project = %self.project_name, "removing compose stack");
        self.run_compose(&["down", "--remove-orphans", "--volumes"])?;
        Ok(())
    }

    fn exec(&self, service: &str, command: &[String]) -> Result<String> {
        let mut args: Vec<&str> = vec!["exec", "-T", service];
        args.extend(command.iter().map(String::as_str));
        let output = self.run_compose(&args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn ps(&self) -> Result<Vec<ServiceSnapshot>> {
        let output = self.run_compose(&["ps", "--all", "--format", "json"])?;
        let entries = parse_ps(&String::from_utf8_lossy(&output.stdout))?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let (state, config) = match self.inspect(&entry.name) {
                    Ok(detail) => (
                        detail.get("State").cloned().unwrap_or(Value::Null),
                        detail.get("Config").cloned().unwrap_or(Value::Null),
                    ),
                    Err(err) => {
                        warn!(container = %entry.name, ?err, "docker inspect failed");
                        (Value::String(entry.state.clone()), Value::Null)
                    }
                };
                ServiceSnapshot {
                    name: entry.name,
                    service: entry.service,
                    state,
                    config,
                }
            })
            .collect())
    }

    fn logs(&self, service: &str) -> Result<String> {
        let output = self.run_compose(&["logs", "--no-color", service])?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    fn config(&self) -> Result<Value> {
        let output = self.run_compose(&["config", "--format", "json"])?;
        serde_json::from_slice(&output.stdout).context("invalid docker compose config output")
    }

    fn reproduction_command(&self) -> String {
        let docker = self.docker.to_string_lossy();
        let mut words = vec![
            docker.as_ref(),
            "compose",
            "--project-name",
            self.project_name.as_str(),
        ];
        let dir = self
            .project_dir
            .as_ref()
            .map(|dir| dir.to_string_lossy().into_owned());
        if let Some(dir) = &dir {
            words.push("--project-directory");
            words.push(dir.as_str());
        }
        words
            .into_iter()
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// `ps --format json` prints a JSON array on older compose releases and one object per line on
/// newer ones.
fn parse_ps(raw: &str) -> Result<Vec<PsEntry>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("invalid docker compose ps output");
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("invalid docker compose ps line"))
        .collect()
}
