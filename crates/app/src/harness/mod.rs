use std::{
    fs,
    path::Path,
    process::{Command, Stdio},
};

use anyhow::{Context, Result};
use serde_json::Value;

pub mod compose;
pub use compose::ComposeStack;
pub mod workdir;
pub use workdir::{PreparedLayout, StackWorkdir, materialize};

/// Version text of the container tooling, captured before the stack starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolVersions {
    pub docker: String,
    pub compose: String,
}

/// One compose service container as seen by `ps`, enriched with inspect data.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSnapshot {
    pub name: String,
    pub service: String,
    pub state: Value,
    pub config: Value,
}

/// The container orchestration collaborator the scenario drives.
pub trait Orchestrator {
    /// Verify the tooling is installed and report its versions.
    fn ensure_available(&mut self) -> Result<ToolVersions>;
    /// Materialize the working directory the stack runs from.
    fn prepare(&mut self, workdir: &Path, image_name: Option<&str>) -> Result<()>;
    fn up(&self) -> Result<()>;
    /// Stop the stack, removing orphaned services and volumes.
    fn down(&self) -> Result<()>;
    fn exec(&self, service: &str, command: &[String]) -> Result<String>;
    fn ps(&self) -> Result<Vec<ServiceSnapshot>>;
    fn logs(&self, service: &str) -> Result<String>;
    fn config(&self) -> Result<Value>;
    /// Shell command a human can run to inspect a stack left behind.
    fn reproduction_command(&self) -> String;
}

/// Quick check to see if the Docker CLI and daemon are reachable.
pub fn docker_available() -> bool {
    Command::new("docker")
        .arg("info")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// POSIX shell quoting: safe words pass through, everything else is single-quoted.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r#"'"'"'"#))
    }
}

pub(crate) fn write_text(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
