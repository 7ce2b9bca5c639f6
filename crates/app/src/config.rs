use std::{collections::BTreeMap, time::Duration};

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

pub static APP_NAME: &str = "quickstart-check";
static DEFAULT_CONFIG: Lazy<QuickstartConfig> = Lazy::new(QuickstartConfig::default);

/// Environment variables understood by the compose quick start itself, mapped onto config keys.
const STACK_ENV: &[(&str, &str, &str)] = &[
    ("HOST_PORT", "api", "host_port"),
    ("_AIRFLOW_WWW_USER_USERNAME", "api", "username"),
    ("_AIRFLOW_WWW_USER_PASSWORD", "api", "password"),
    ("AIRFLOW_IMAGE_NAME", "stack", "image_name"),
    ("NO_COLOR", "stack", "no_color"),
    ("SKIP_DOCKER_COMPOSE_DELETION", "stack", "skip_teardown"),
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuickstartConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub stack: StackConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host_port")]
    pub host_port: String,
    #[serde(default = "default_credential")]
    pub username: String,
    #[serde(default = "default_credential")]
    pub password: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host_port: default_host_port(),
            username: default_credential(),
            password: default_credential(),
            api_prefix: default_api_prefix(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ApiConfig {
    /// Scheme + authority of the target service, e.g. `http://localhost:8080`.
    pub fn base_url(&self) -> String {
        let host = self.host_port.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_host_port() -> String {
    "localhost:8080".into()
}

fn default_credential() -> String {
    "airflow".into()
}

fn default_api_prefix() -> String {
    "api/v2".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Compose definition copied into the working directory before `up`.
    #[serde(default = "default_compose_file")]
    pub compose_file: Utf8PathBuf,
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default, deserialize_with = "non_empty")]
    pub image_name: Option<String>,
    #[serde(default, deserialize_with = "presence_flag")]
    pub no_color: bool,
    #[serde(default, deserialize_with = "presence_flag")]
    pub skip_teardown: bool,
    /// Fixed working directory; a fresh temporary directory is used when unset.
    #[serde(default)]
    pub workdir: Option<Utf8PathBuf>,
    /// Where the failure diagnostics are written in addition to stdout.
    #[serde(default)]
    pub artifacts_dir: Option<Utf8PathBuf>,
    /// Overrides the UID written to `.env`; the current user is used when unset.
    #[serde(default)]
    pub airflow_uid: Option<u32>,
    #[serde(default = "default_dag_processor_service")]
    pub dag_processor_service: String,
    #[serde(default = "default_reserialize_command")]
    pub reserialize_command: Vec<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            compose_file: default_compose_file(),
            project_name: default_project_name(),
            image_name: None,
            no_color: false,
            skip_teardown: false,
            workdir: None,
            artifacts_dir: None,
            airflow_uid: None,
            dag_processor_service: default_dag_processor_service(),
            reserialize_command: default_reserialize_command(),
        }
    }
}

fn default_compose_file() -> Utf8PathBuf {
    Utf8PathBuf::from("docker-compose.yaml")
}

fn default_project_name() -> String {
    "quick-start".into()
}

fn default_dag_processor_service() -> String {
    "airflow-dag-processor".into()
}

fn default_reserialize_command() -> Vec<String> {
    vec!["airflow".into(), "dags".into(), "reserialize".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_dag_id")]
    pub dag_id: String,
    #[serde(default = "default_dag_run_id")]
    pub dag_run_id: String,
    #[serde(default = "default_logical_date")]
    pub logical_date: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            dag_id: default_dag_id(),
            dag_run_id: default_dag_run_id(),
            logical_date: default_logical_date(),
        }
    }
}

fn default_dag_id() -> String {
    "example_bash_operator".into()
}

fn default_dag_run_id() -> String {
    "test_dag_run_id".into()
}

fn default_logical_date() -> String {
    "2020-06-11T18:00:00+00:00".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_max_iterations() -> u32 {
    400
}

fn default_interval_ms() -> u64 {
    1_000
}

impl QuickstartConfig {
    /// Layered sources: defaults < TOML file < stack env vars < `QUICKSTART_*` overrides.
    pub fn figment(explicit_path: Option<&Utf8Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(DEFAULT_CONFIG.clone()));

        if let Some(path) = explicit_path {
            figment = figment.merge(Toml::file(path));
        } else if let Some(path) = resolve_default_config_path() {
            debug!(%path, "using discovered config file");
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(stack_env())
            .merge(Env::prefixed("QUICKSTART_").split("__"))
    }
}

/// Load the configuration once at startup.
pub fn load_config(explicit_path: Option<&Utf8Path>) -> Result<QuickstartConfig, figment::Error> {
    QuickstartConfig::figment(explicit_path).extract()
}

/// The quick-start variables, taken verbatim so values like `007` or `false` keep their text.
fn stack_env() -> Serialized<BTreeMap<&'static str, BTreeMap<&'static str, String>>> {
    let mut sections: BTreeMap<_, BTreeMap<_, _>> = BTreeMap::new();
    for (name, section, key) in STACK_ENV {
        if let Ok(raw) = std::env::var(name) {
            sections.entry(*section).or_default().insert(*key, raw);
        }
    }
    Serialized::defaults(sections)
}

fn resolve_default_config_path() -> Option<Utf8PathBuf> {
    let local = Utf8PathBuf::from("quickstart.toml");
    if local.exists() {
        return Some(local);
    }

    if let Some(dirs) = ProjectDirs::from("org", "Airflow", APP_NAME)
        && let Ok(path) = Utf8PathBuf::from_path_buf(dirs.config_dir().join("quickstart.toml"))
        && path.exists()
    {
        return Some(path);
    }

    None
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// Environment flags count as set when they hold any non-empty text, `false` included; TOML
/// booleans pass through.
fn presence_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        None => false,
        Some(Flag::Bool(value)) => value,
        Some(Flag::Int(_)) => true,
        Some(Flag::Text(value)) => !value.is_empty(),
    })
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|value| !value.is_empty()))
}
