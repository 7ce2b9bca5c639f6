use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;
use ureq::{Agent, http::Response};

use crate::{
    auth::{Credential, obtain_credential},
    config::ApiConfig,
    error::{ApiError, Method},
};

/// Body of `POST dags/{dag_id}/dagRuns`.
#[derive(Debug, Clone, Serialize)]
pub struct DagRunRequest {
    pub dag_run_id: String,
    pub logical_date: String,
}

/// Authenticated client for the versioned REST API. Every call re-authenticates so a long poll
/// never trips over an expired token.
#[derive(Clone)]
pub struct ApiClient {
    agent: Agent,
    base_url: String,
    api_prefix: String,
    username: String,
    password: String,
}

/// Agent that surfaces 4xx/5xx as responses so callers can report status and body.
pub fn build_agent(config: &ApiConfig) -> Agent {
    let agent_config = Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(config.request_timeout()))
        .build();
    Agent::new_with_config(agent_config)
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            agent: build_agent(config),
            base_url: config.base_url(),
            api_prefix: config.api_prefix.trim_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credential(&self) -> Result<Credential, ApiError> {
        obtain_credential(&self.agent, &self.base_url, &self.username, &self.password)
    }

    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.api_prefix,
            path.trim_start_matches('/')
        )
    }

    /// Issue one authenticated call; any non-2xx status is an [`ApiError::Request`].
    pub fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let credential = self.credential()?;
        let url = self.url_for(path);
        let bearer = credential.bearer();
        debug!(%method, %url, "api request");

        let transport = |err: ureq::Error| ApiError::Transport {
            method,
            url: url.clone(),
            source: Box::new(err),
        };

        let response = match method {
            Method::Get => self
                .agent
                .get(&url)
                .header("Authorization", &bearer)
                .header("Content-Type", "application/json")
                .call(),
            Method::Post => self
                .agent
                .post(&url)
                .header("Authorization", &bearer)
                .send_json(body.unwrap_or(&Value::Null)),
            Method::Patch => self
                .agent
                .patch(&url)
                .header("Authorization", &bearer)
                .send_json(body.unwrap_or(&Value::Null)),
        }
        .map_err(transport)?;

        read_json(method, &url, response)
    }

    pub fn set_dag_paused(&self, dag_id: &str, paused: bool) -> Result<Value, ApiError> {
        self.request(
            Method::Patch,
            &format!("dags/{dag_id}"),
            Some(&json!({ "is_paused": paused })),
        )
    }

    pub fn trigger_dag_run(&self, dag_id: &str, run: &DagRunRequest) -> Result<Value, ApiError> {
        let body = json!({
            "dag_run_id": run.dag_run_id,
            "logical_date": run.logical_date,
        });
        self.request(Method::Post, &format!("dags/{dag_id}/dagRuns"), Some(&body))
    }

    pub fn dag_details(&self, dag_id: &str) -> Result<Value, ApiError> {
        self.request(Method::Get, &format!("dags/{dag_id}/details"), None)
    }

    pub fn dag_run(&self, dag_id: &str, dag_run_id: &str) -> Result<Value, ApiError> {
        self.request(
            Method::Get,
            &format!("dags/{dag_id}/dagRuns/{dag_run_id}"),
            None,
        )
    }

    pub fn dag_runs(&self, dag_id: &str) -> Result<Value, ApiError> {
        self.request(Method::Get, &format!("dags/{dag_id}/dagRuns"), None)
    }

    pub fn task_instances(&self, dag_id: &str, dag_run_id: &str) -> Result<Value, ApiError> {
        self.request(
            Method::Get,
            &format!("dags/{dag_id}/dagRuns/{dag_run_id}/taskInstances"),
            None,
        )
    }

    pub fn health(&self) -> Result<Value, ApiError> {
        self.request(Method::Get, "monitor/health", None)
    }
}

fn read_json(method: Method, url: &str, response: Response<ureq::Body>) -> Result<Value, ApiError> {
    let status = response.status();
    let raw = response
        .into_body()
        .read_to_string()
        .map_err(|err| ApiError::Transport {
            method,
            url: url.to_string(),
            source: Box::new(err),
        })?;

    if !status.is_success() {
        return Err(ApiError::Request {
            method,
            url: url.to_string(),
            status: status.as_u16(),
            body: raw,
        });
    }

    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&raw).map_err(|source| ApiError::Decode {
        method,
        url: url.to_string(),
        source,
    })
}
