//! End-to-end verification of the Airflow docker-compose quick start: bring the stack up,
//! trigger the example DAG through the REST API, wait for a terminal state and tear down.

pub mod api;
pub mod auth;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod harness;
pub mod poll;
pub mod scenario;

pub use api::{ApiClient, DagRunRequest};
pub use config::{QuickstartConfig, load_config};
pub use error::{ApiError, HarnessError, Method, ScenarioError};
pub use scenario::{ScenarioDriver, ScenarioReport, Stage, Teardown};
