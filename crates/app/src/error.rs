use std::fmt;

use thiserror::Error;

/// HTTP verbs used against the workflow service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        };
        f.write_str(verb)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to get access token from {url} (status {status}): {detail}")]
    Authentication {
        url: String,
        status: u16,
        detail: String,
    },
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Request {
        method: Method,
        url: String,
        status: u16,
        body: String,
    },
    #[error("{method} {url} failed: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    #[error("invalid JSON from {method} {url}: {source}")]
    Decode {
        method: Method,
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Authentication { status, .. } | ApiError::Request { status, .. } => {
                Some(*status)
            }
            ApiError::Transport { .. } | ApiError::Decode { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("`docker compose` not available ({reason}). Make sure the compose plugin is installed")]
    OrchestratorUnavailable { reason: String },
    #[error("docker compose {args} failed (code {code:?}): {stderr}")]
    Compose {
        args: String,
        code: Option<i32>,
        stderr: String,
    },
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(
        "DAG run {dag_id}/{dag_run_id} ended in state {} after {iterations} poll(s), expected success",
        .actual.as_deref().unwrap_or("<none>")
    )]
    UnexpectedRunState {
        dag_id: String,
        dag_run_id: String,
        actual: Option<String>,
        iterations: u32,
    },
    #[error("logical date {value:?} is not RFC 3339: {source}")]
    InvalidLogicalDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}
