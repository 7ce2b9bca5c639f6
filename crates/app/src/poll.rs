use std::{fmt, str::FromStr, thread, time::Duration};

use serde_json::Value;
use tracing::info;

use crate::{api::ApiClient, config::PollConfig, error::ApiError};

/// DAG run state as reported by the service. Only `success` and `failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Queued,
    Running,
    Success,
    Failed,
    Other(String),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Success | RunState::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Failed => "failed",
            RunState::Other(raw) => raw,
        }
    }
}

impl FromStr for RunState {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(match raw {
            "queued" => RunState::Queued,
            "running" => RunState::Running,
            "success" => RunState::Success,
            "failed" => RunState::Failed,
            other => RunState::Other(other.to_string()),
        })
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can report the current state of a DAG run.
pub trait RunStatusSource {
    /// `Ok(None)` when the run document carries no `state` string.
    fn run_state(&self, dag_id: &str, dag_run_id: &str) -> Result<Option<RunState>, ApiError>;
}

impl RunStatusSource for ApiClient {
    fn run_state(&self, dag_id: &str, dag_run_id: &str) -> Result<Option<RunState>, ApiError> {
        let run = self.dag_run(dag_id, dag_run_id)?;
        Ok(state_of(&run))
    }
}

pub fn state_of(run: &Value) -> Option<RunState> {
    run.get("state")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_iterations: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollConfig::default())
    }
}

impl From<&PollConfig> for PollPolicy {
    fn from(config: &PollConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            interval: config.interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Terminal {
        state: RunState,
        iterations: u32,
    },
    /// Budget spent without a terminal state; the caller decides what that means.
    Exhausted {
        last_state: Option<RunState>,
        iterations: u32,
    },
}

impl PollOutcome {
    pub fn iterations(&self) -> u32 {
        match self {
            PollOutcome::Terminal { iterations, .. } | PollOutcome::Exhausted { iterations, .. } => {
                *iterations
            }
        }
    }

    pub fn last_state(&self) -> Option<&RunState> {
        match self {
            PollOutcome::Terminal { state, .. } => Some(state),
            PollOutcome::Exhausted { last_state, .. } => last_state.as_ref(),
        }
    }
}

/// Bounded busy-poll: at most `max_iterations` queries, `interval` apart, stopping at the first
/// terminal state. Query errors propagate immediately.
pub fn wait_for_terminal(
    source: &impl RunStatusSource,
    dag_id: &str,
    dag_run_id: &str,
    policy: PollPolicy,
) -> Result<PollOutcome, ApiError> {
    let mut last_state = None;
    for iteration in 1..=policy.max_iterations {
        if iteration > 1 {
            thread::sleep(policy.interval);
        }
        let state = source.run_state(dag_id, dag_run_id)?;
        info!(
            iteration,
            max = policy.max_iterations,
            dag_state = state.as_ref().map(RunState::as_str).unwrap_or("<none>"),
            "waiting for DAG run"
        );
        match state {
            Some(state) if state.is_terminal() => {
                return Ok(PollOutcome::Terminal {
                    state,
                    iterations: iteration,
                });
            }
            other => last_state = other,
        }
    }

    Ok(PollOutcome::Exhausted {
        last_state,
        iterations: policy.max_iterations,
    })
}
