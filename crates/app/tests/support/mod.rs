#![allow(dead_code)]

use std::{collections::VecDeque, net::SocketAddr, path::Path, sync::Arc};

use anyhow::{Result, bail};
use axum::{
    Json, Router,
    extract::{Path as UrlPath, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    routing::{get, post},
};
use camino::Utf8PathBuf;
use parking_lot::Mutex;
use quickstart_check::{
    config::QuickstartConfig,
    error::HarnessError,
    harness::{Orchestrator, ServiceSnapshot, ToolVersions},
};
use serde_json::{Value, json};
use tokio::{net::TcpListener, task::JoinHandle};

/// How `/auth/token` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenMode {
    #[default]
    Issue,
    Missing,
    Empty,
    Reject,
}

#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub token_mode: TokenMode,
    /// States handed out by `GET dagRuns/{id}`, one per query; the last one repeats.
    pub run_states: Vec<&'static str>,
    pub trigger_status: Option<StatusCode>,
    /// Status for the health and task-instance endpoints the failure dump reads.
    pub diagnostics_status: Option<StatusCode>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            token_mode: TokenMode::Issue,
            run_states: vec!["success"],
            trigger_status: None,
            diagnostics_status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub method: &'static str,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

struct MockState {
    token_mode: TokenMode,
    trigger_status: Option<StatusCode>,
    diagnostics_status: Option<StatusCode>,
    run_states: Mutex<VecDeque<&'static str>>,
    token_requests: Mutex<usize>,
    issued: Mutex<Vec<String>>,
    requests: Mutex<Vec<Recorded>>,
}

type Reply = Result<Json<Value>, (StatusCode, String)>;

/// In-process stand-in for the workflow service REST API.
pub struct MockAirflow {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockAirflow {
    pub async fn start(behavior: MockBehavior) -> Result<Self> {
        let state = Arc::new(MockState {
            token_mode: behavior.token_mode,
            trigger_status: behavior.trigger_status,
            diagnostics_status: behavior.diagnostics_status,
            run_states: Mutex::new(behavior.run_states.into_iter().collect()),
            token_requests: Mutex::new(0),
            issued: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        });
        let router = Router::new()
            .route("/auth/token", post(issue_token))
            .route("/api/v2/dags/{dag_id}", axum::routing::patch(patch_dag))
            .route("/api/v2/dags/{dag_id}/details", get(dag_details))
            .route(
                "/api/v2/dags/{dag_id}/dagRuns",
                get(list_runs).post(trigger_run),
            )
            .route("/api/v2/dags/{dag_id}/dagRuns/{run_id}", get(get_run))
            .route(
                "/api/v2/dags/{dag_id}/dagRuns/{run_id}/taskInstances",
                get(task_instances),
            )
            .route("/api/v2/monitor/health", get(health))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service()).await;
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn host_port(&self) -> String {
        self.addr.to_string()
    }

    /// Defaults pointed at this mock, polling without delay.
    pub fn config(&self) -> QuickstartConfig {
        let mut config = QuickstartConfig::default();
        config.api.host_port = self.host_port();
        config.poll.interval_ms = 0;
        config
    }

    pub fn token_requests(&self) -> usize {
        *self.state.token_requests.lock()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }
}

impl Drop for MockAirflow {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn issue_token(State(state): State<Arc<MockState>>) -> (StatusCode, Json<Value>) {
    *state.token_requests.lock() += 1;
    match state.token_mode {
        TokenMode::Reject => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Invalid credentials" })),
        ),
        TokenMode::Missing => (StatusCode::CREATED, Json(json!({ "token_type": "bearer" }))),
        TokenMode::Empty => (StatusCode::CREATED, Json(json!({ "access_token": "" }))),
        TokenMode::Issue => {
            let mut issued = state.issued.lock();
            let token = format!("token-{}", issued.len() + 1);
            issued.push(token.clone());
            (
                StatusCode::CREATED,
                Json(json!({ "access_token": token, "token_type": "bearer" })),
            )
        }
    }
}

fn authorize(
    state: &MockState,
    method: &'static str,
    path: String,
    headers: &HeaderMap,
    body: Option<Value>,
) -> Result<(), (StatusCode, String)> {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.requests.lock().push(Recorded {
        method,
        path,
        authorization: authorization.clone(),
        body,
    });

    let issued = state.issued.lock();
    match authorization
        .as_deref()
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        Some(token) if issued.iter().any(|known| known == token) => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            r#"{"detail":"Not authenticated"}"#.into(),
        )),
    }
}

async fn patch_dag(
    State(state): State<Arc<MockState>>,
    UrlPath(dag_id): UrlPath<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    authorize(
        &state,
        "PATCH",
        format!("dags/{dag_id}"),
        &headers,
        Some(body.clone()),
    )?;
    Ok(Json(json!({ "dag_id": dag_id, "is_paused": body["is_paused"] })))
}

async fn dag_details(
    State(state): State<Arc<MockState>>,
    UrlPath(dag_id): UrlPath<String>,
    headers: HeaderMap,
) -> Reply {
    authorize(&state, "GET", format!("dags/{dag_id}/details"), &headers, None)?;
    Ok(Json(json!({
        "dag_id": dag_id,
        "fileloc": "/opt/airflow/dags/example_bash_operator.py",
        "tags": ["example"],
    })))
}

async fn list_runs(
    State(state): State<Arc<MockState>>,
    UrlPath(dag_id): UrlPath<String>,
    headers: HeaderMap,
) -> Reply {
    authorize(&state, "GET", format!("dags/{dag_id}/dagRuns"), &headers, None)?;
    Ok(Json(json!({ "dag_runs": [], "total_entries": 0 })))
}

async fn trigger_run(
    State(state): State<Arc<MockState>>,
    UrlPath(dag_id): UrlPath<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    authorize(
        &state,
        "POST",
        format!("dags/{dag_id}/dagRuns"),
        &headers,
        Some(body.clone()),
    )?;
    if let Some(status) = state.trigger_status {
        return Err((status, "boom".into()));
    }
    Ok(Json(json!({
        "dag_id": dag_id,
        "dag_run_id": body["dag_run_id"],
        "logical_date": body["logical_date"],
        "state": "queued",
    })))
}

async fn get_run(
    State(state): State<Arc<MockState>>,
    UrlPath((dag_id, run_id)): UrlPath<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    authorize(
        &state,
        "GET",
        format!("dags/{dag_id}/dagRuns/{run_id}"),
        &headers,
        None,
    )?;
    let mut states = state.run_states.lock();
    let current = if states.len() > 1 {
        states.pop_front()
    } else {
        states.front().copied()
    };
    let mut run = json!({ "dag_id": dag_id, "dag_run_id": run_id });
    if let Some(current) = current {
        run["state"] = json!(current);
    }
    Ok(Json(run))
}

async fn task_instances(
    State(state): State<Arc<MockState>>,
    UrlPath((dag_id, run_id)): UrlPath<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    authorize(
        &state,
        "GET",
        format!("dags/{dag_id}/dagRuns/{run_id}/taskInstances"),
        &headers,
        None,
    )?;
    if let Some(status) = state.diagnostics_status {
        return Err((status, "task instances unavailable".into()));
    }
    Ok(Json(json!({
        "task_instances": [{ "task_id": "runme_0", "state": "success" }],
        "total_entries": 1,
    })))
}

async fn health(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    authorize(&state, "GET", "monitor/health".into(), &headers, None)?;
    if let Some(status) = state.diagnostics_status {
        return Err((status, "health unavailable".into()));
    }
    Ok(Json(json!({
        "metadatabase": { "status": "healthy" },
        "scheduler": { "status": "healthy" },
    })))
}

/// Run blocking client code off the async runtime that serves the mock.
pub async fn blocking<T: Send + 'static>(work: impl FnOnce() -> T + Send + 'static) -> T {
    tokio::task::spawn_blocking(work)
        .await
        .expect("blocking task panicked")
}

pub fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("utf-8 temp path")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsureAvailable,
    Prepare,
    Up,
    Down,
    Exec(String, Vec<String>),
    Ps,
    Logs(String),
    Config,
}

/// Orchestrator double that records every call instead of touching docker.
#[derive(Debug, Clone, Default)]
pub struct FakeOrchestrator {
    calls: Arc<Mutex<Vec<Call>>>,
    unavailable: bool,
    up_fails: bool,
    inspection_fails: bool,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn failing_up(mut self) -> Self {
        self.up_fails = true;
        self
    }

    /// `config` and `logs` fail, as they would against a half-removed project.
    pub fn failing_inspection(mut self) -> Self {
        self.inspection_fails = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// `down` invocations once `up` has been issued.
    pub fn downs_after_up(&self) -> usize {
        let calls = self.calls();
        match calls.iter().position(|call| *call == Call::Up) {
            Some(index) => calls[index + 1..]
                .iter()
                .filter(|call| **call == Call::Down)
                .count(),
            None => 0,
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl Orchestrator for FakeOrchestrator {
    fn ensure_available(&mut self) -> Result<ToolVersions> {
        self.record(Call::EnsureAvailable);
        if self.unavailable {
            return Err(HarnessError::OrchestratorUnavailable {
                reason: "docker binary not found".into(),
            }
            .into());
        }
        Ok(ToolVersions {
            docker: "Docker version 27.3.1".into(),
            compose: "Docker Compose version v2.29.7".into(),
        })
    }

    fn prepare(&mut self, _workdir: &Path, _image_name: Option<&str>) -> Result<()> {
        self.record(Call::Prepare);
        Ok(())
    }

    fn up(&self) -> Result<()> {
        self.record(Call::Up);
        if self.up_fails {
            bail!(HarnessError::Compose {
                args: "up --detach --wait".into(),
                code: Some(1),
                stderr: "container quick-start-airflow-init-1 exited (1)".into(),
            });
        }
        Ok(())
    }

    fn down(&self) -> Result<()> {
        self.record(Call::Down);
        Ok(())
    }

    fn exec(&self, service: &str, command: &[String]) -> Result<String> {
        self.record(Call::Exec(service.to_string(), command.to_vec()));
        Ok(String::new())
    }

    fn ps(&self) -> Result<Vec<ServiceSnapshot>> {
        self.record(Call::Ps);
        Ok(vec![ServiceSnapshot {
            name: "quick-start-airflow-scheduler-1".into(),
            service: "airflow-scheduler".into(),
            state: json!({ "Status": "running" }),
            config: json!({ "Image": "apache/airflow:3.0.0" }),
        }])
    }

    fn logs(&self, service: &str) -> Result<String> {
        self.record(Call::Logs(service.to_string()));
        if self.inspection_fails {
            bail!("no container found for service {service}");
        }
        Ok(format!("{service} | started\n"))
    }

    fn config(&self) -> Result<Value> {
        self.record(Call::Config);
        if self.inspection_fails {
            bail!(HarnessError::Compose {
                args: "config --format json".into(),
                code: Some(14),
                stderr: "no configuration file provided".into(),
            });
        }
        Ok(json!({ "name": "quick-start" }))
    }

    fn reproduction_command(&self) -> String {
        "docker compose --project-name quick-start".into()
    }
}
