use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use tempfile::TempDir;
use tracing::info;

use super::write_text;
use crate::config::StackConfig;

/// Subdirectories the quick-start compose file bind-mounts.
pub const STACK_SUBDIRS: [&str; 3] = ["dags", "logs", "plugins"];
pub const COMPOSE_FILE_NAME: &str = "docker-compose.yaml";

/// Working directory the compose project runs from.
#[derive(Debug)]
pub enum StackWorkdir {
    Temp(TempDir),
    Fixed(PathBuf),
}

impl StackWorkdir {
    pub fn create(config: &StackConfig) -> Result<Self> {
        match &config.workdir {
            Some(dir) => {
                fs::create_dir_all(dir).with_context(|| format!("failed to create {dir}"))?;
                Ok(Self::Fixed(dir.clone().into_std_path_buf()))
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("airflow-quick-start")
                    .tempdir()
                    .context("failed to create temporary stack directory")?;
                Ok(Self::Temp(dir))
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Temp(dir) => dir.path(),
            Self::Fixed(dir) => dir,
        }
    }

    /// Keep the directory on disk past the end of the scenario.
    pub fn persist(self) -> PathBuf {
        match self {
            Self::Temp(dir) => dir.keep(),
            Self::Fixed(dir) => dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedLayout {
    pub compose_file: PathBuf,
    pub dot_env: PathBuf,
    pub dot_env_contents: String,
}

/// Copy the compose definition, create the bind-mount directories and write `.env`.
pub fn materialize(
    workdir: &Path,
    compose_source: &Path,
    airflow_uid: Option<u32>,
) -> Result<PreparedLayout> {
    if !compose_source.is_file() {
        bail!("compose file not found at {}", compose_source.display());
    }

    let compose_file = workdir.join(COMPOSE_FILE_NAME);
    fs::copy(compose_source, &compose_file).with_context(|| {
        format!(
            "failed to copy {} -> {}",
            compose_source.display(),
            compose_file.display()
        )
    })?;

    for subdir in STACK_SUBDIRS {
        let dir = workdir.join(subdir);
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let dot_env = workdir.join(".env");
    let uid = airflow_uid.unwrap_or_else(current_uid);
    let dot_env_contents = format!("AIRFLOW_UID={uid}\n");
    write_text(&dot_env, &dot_env_contents)?;
    info!(path = %dot_env.display(), uid, "wrote stack .env");

    Ok(PreparedLayout {
        compose_file,
        dot_env,
        dot_env_contents,
    })
}

#[cfg(unix)]
fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    50_000
}
