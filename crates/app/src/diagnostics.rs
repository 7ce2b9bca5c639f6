//! Best-effort failure dump. Every section records its own failure instead of aborting, so the
//! error that triggered the dump is never replaced by one raised while gathering evidence.

use std::fmt::Write as _;

use anyhow::Result;
use camino::Utf8Path;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    api::ApiClient,
    error::{ApiError, Method},
    harness::{Orchestrator, ToolVersions, write_text},
};

pub const BANNER_WIDTH: usize = 72;

/// Center `title` in a line of `fill` characters, [`BANNER_WIDTH`] wide.
pub fn banner(title: &str, fill: char) -> String {
    let len = title.chars().count();
    if len >= BANNER_WIDTH {
        return title.to_string();
    }
    let pad = BANNER_WIDTH - len;
    let left = pad / 2;
    let right = pad - left;
    let mut line = String::with_capacity(BANNER_WIDTH);
    line.extend(std::iter::repeat_n(fill, left));
    line.push_str(title);
    line.extend(std::iter::repeat_n(fill, right));
    line
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Heading {
    /// `HTTP: GET <path>` line for API captures.
    Http { method: Method, path: String },
    Banner { title: String, fill: char },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: Heading,
    /// `None` for a bare banner that only separates the sections after it.
    pub body: Option<Result<String, String>>,
}

impl Section {
    fn http(method: Method, path: impl Into<String>, body: Result<Value, ApiError>) -> Self {
        let path = path.into();
        let body = body.map(|value| pretty(&value)).map_err(|err| {
            warn!(%method, %path, %err, "diagnostic request failed");
            err.to_string()
        });
        Self {
            heading: Heading::Http { method, path },
            body: Some(body),
        }
    }

    fn banner(title: impl Into<String>, fill: char, body: Result<String>) -> Self {
        let title = title.into();
        let body = body.map_err(|err| {
            warn!(title = %title.trim(), ?err, "diagnostic capture failed");
            format!("{err:#}")
        });
        Self {
            heading: Heading::Banner { title, fill },
            body: Some(body),
        }
    }

    fn heading_only(title: impl Into<String>, fill: char) -> Self {
        Self {
            heading: Heading::Banner {
                title: title.into(),
                fill,
            },
            body: None,
        }
    }

    pub fn title(&self) -> String {
        match &self.heading {
            Heading::Http { method, path } => format!("HTTP: {method} {path}"),
            Heading::Banner { title, .. } => title.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub sections: Vec<Section>,
}

impl DiagnosticReport {
    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.title() == title)
    }

    /// Sections whose capture failed.
    pub fn failures(&self) -> usize {
        self.sections
            .iter()
            .filter(|section| matches!(section.body, Some(Err(_))))
            .count()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            match &section.heading {
                Heading::Http { method, path } => {
                    let _ = writeln!(out, "HTTP: {method} {path}");
                }
                Heading::Banner { title, fill } => {
                    let _ = writeln!(out, "{}", banner(title, *fill));
                }
            }
            match &section.body {
                Some(Ok(text)) => {
                    let _ = writeln!(out, "{}", text.trim_end());
                }
                Some(Err(reason)) => {
                    let _ = writeln!(out, "<unavailable: {reason}>");
                }
                None => {}
            }
        }
        out
    }
}

/// Gather API and stack evidence for a failed run.
pub fn collect(
    api: &ApiClient,
    stack: &dyn Orchestrator,
    dag_id: &str,
    dag_run_id: &str,
    versions: Option<&ToolVersions>,
) -> DiagnosticReport {
    let mut sections = vec![
        Section::http(Method::Get, "monitor/health", api.health()),
        Section::http(
            Method::Get,
            format!("dags/{dag_id}/dagRuns"),
            api.dag_runs(dag_id),
        ),
        Section::http(
            Method::Get,
            format!("dags/{dag_id}/dagRuns/{dag_run_id}/taskInstances"),
            api.task_instances(dag_id, dag_run_id),
        ),
    ];

    let (docker_version, compose_version) = match versions {
        Some(versions) => (Ok(versions.docker.clone()), Ok(versions.compose.clone())),
        None => {
            let missing = || -> Result<String> {
                Err(anyhow::anyhow!("versions were not captured"))
            };
            (missing(), missing())
        }
    };
    sections.push(Section::banner(" Docker Version ", '=', docker_version));
    sections.push(Section::banner(
        " Docker Compose Version ",
        '=',
        compose_version,
    ));
    sections.push(Section::banner(
        " Compose Config ",
        '=',
        stack.config().map(|config| pretty(&config)),
    ));

    match stack.ps() {
        Ok(services) => {
            for service in services {
                sections.push(Section::heading_only(
                    format!(" Service: {} ", service.name),
                    '-',
                ));
                sections.push(Section::banner(
                    " Service State ",
                    '.',
                    Ok(pretty(&service.state)),
                ));
                sections.push(Section::banner(
                    " Service Config ",
                    '.',
                    Ok(pretty(&service.config)),
                ));
                sections.push(Section::banner(
                    " Service Logs ",
                    '.',
                    stack.logs(&service.service),
                ));
            }
        }
        Err(err) => sections.push(Section::banner(" Services ", '=', Err(err))),
    }

    DiagnosticReport { sections }
}

/// Print the report and, when configured, keep a copy under `artifacts_dir`.
pub fn emit(report: &DiagnosticReport, artifacts_dir: Option<&Utf8Path>) {
    let rendered = report.render();
    println!("{rendered}");

    if let Some(dir) = artifacts_dir {
        let path = dir.join("diagnostics.txt");
        match write_text(path.as_std_path(), &rendered) {
            Ok(()) => info!(%path, "diagnostics written"),
            Err(err) => warn!(%path, ?err, "failed to write diagnostics"),
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
