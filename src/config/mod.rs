pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Read timeout for upstream calls, in seconds.
    pub timeout: u64,
    pub connect_timeout_secs: u64,
    pub http_pool_max_idle_per_host: usize,
    pub http_pool_idle_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_max_blocking_threads: Option<usize>,
    pub base_path: String,
    /// Per-file cap for `/file-context` uploads, in bytes.
    pub max_upload_bytes: usize,
    /// Most files one `/file-context` request may carry.
    pub max_upload_files: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_base_path() -> String {
    "/api".to_string()
}
fn default_max_upload_bytes() -> usize {
    30 * 1024 * 1024
}
fn default_max_upload_files() -> usize {
    20
}

#[derive(Debug, Deserialize)]
struct ServerConfigWire {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    runtime_worker_threads: Option<RuntimeThreadsSetting>,
    #[serde(default)]
    runtime_max_blocking_threads: Option<RuntimeThreadsSetting>,
    #[serde(default = "default_base_path")]
    base_path: String,
    #[serde(default = "default_max_upload_bytes")]
    max_upload_bytes: usize,
    #[serde(default = "default_max_upload_files")]
    max_upload_files: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuntimeThreadsSetting {
    Fixed(usize),
    Auto(()),
}

fn runtime_threads_or_default(
    setting: Option<&RuntimeThreadsSetting>,
    default: Option<usize>,
) -> Option<usize> {
    match setting {
        None => default,
        Some(RuntimeThreadsSetting::Fixed(threads)) => Some(*threads),
        Some(RuntimeThreadsSetting::Auto(())) => None,
    }
}

impl<'de> Deserialize<'de> for ServerConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = ServerConfigWire::deserialize(deserializer)?;
        Ok(Self {
            port: wire.port,
            host: wire.host,
            timeout: wire.timeout,
            connect_timeout_secs: wire.connect_timeout_secs,
            http_pool_max_idle_per_host: wire.http_pool_max_idle_per_host,
            http_pool_idle_timeout_secs: wire.http_pool_idle_timeout_secs,
            // missing => default
            runtime_worker_threads: runtime_threads_or_default(
                wire.runtime_worker_threads.as_ref(),
                None,
            ),
            runtime_max_blocking_threads: runtime_threads_or_default(
                wire.runtime_max_blocking_threads.as_ref(),
                Some(8),
            ),
            base_path: wire.base_path,
            max_upload_bytes: wire.max_upload_bytes,
            max_upload_files: wire.max_upload_files,
        })
    }
}

impl ServerConfig {
    /// Whole-body cap for `/file-context`: every file at its limit plus room
    /// for multipart framing.
    #[must_use]
    pub fn upload_body_limit(&self) -> usize {
        const MULTIPART_OVERHEAD: usize = 1024 * 1024;
        self.max_upload_bytes
            .saturating_mul(self.max_upload_files)
            .saturating_add(MULTIPART_OVERHEAD)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            connect_timeout_secs: default_connect_timeout_secs(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
            runtime_max_blocking_threads: Some(8),
            base_path: default_base_path(),
            max_upload_bytes: default_max_upload_bytes(),
            max_upload_files: default_max_upload_files(),
        }
    }
}

/// Upstream endpoint locations. Credentials never live here; they come from
/// the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai_base_url: String,
    pub openrouter_base_url: String,
    /// Prefix up to and including `/models`; `/{model}:streamGenerateContent` is appended.
    pub gemini_base_url: String,
    pub dashscope_url: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            gemini_base_url: "https://aiplatform.googleapis.com/v1/publishers/google/models"
                .to_string(),
            dashscope_url: "https://dashscope-intl.aliyuncs.com/api/v1/services/aigc/multimodal-generation/generation"
                .to_string(),
        }
    }
}

/// Model choice and hints for one side (primary or fallback) of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTarget {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_fallbacks: Option<bool>,
}

impl RouteTarget {
    fn model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            reasoning_effort: None,
            thinking_level: None,
            provider_order: Vec::new(),
            allow_fallbacks: None,
        }
    }

    fn effort(mut self, effort: &str) -> Self {
        self.reasoning_effort = Some(effort.to_string());
        self
    }

    fn thinking(mut self, level: &str) -> Self {
        self.thinking_level = Some(level.to_string());
        self
    }

    fn order(mut self, providers: &[&str], allow_fallbacks: bool) -> Self {
        self.provider_order = providers.iter().map(|p| (*p).to_string()).collect();
        self.allow_fallbacks = Some(allow_fallbacks);
        self
    }
}

/// Primary and fallback targets for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRoute {
    pub primary: RouteTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<RouteTarget>,
}

/// Per-operation routing table. The provider on each side is fixed per
/// operation; models and hints are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub step: OperationRoute,
    pub help: OperationRoute,
    pub check: OperationRoute,
    pub coordinates: OperationRoute,
    pub image_analysis: OperationRoute,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let guidance = OperationRoute {
            primary: RouteTarget::model("gpt-5-mini-2025-08-07").effort("low"),
            fallback: Some(RouteTarget::model("openai/gpt-5-mini").effort("low")),
        };
        Self {
            step: guidance.clone(),
            help: guidance,
            check: OperationRoute {
                primary: RouteTarget::model("gemini-3-flash-preview").thinking("MINIMAL"),
                fallback: Some(
                    RouteTarget::model("google/gemini-3-flash-preview")
                        .order(&["Google AI Studio"], true)
                        .effort("minimal"),
                ),
            },
            coordinates: OperationRoute {
                primary: RouteTarget::model("qwen3-vl-flash"),
                fallback: Some(
                    RouteTarget::model("qwen/qwen3-vl-30b-a3b-instruct").order(&["Fireworks"], true),
                ),
            },
            image_analysis: OperationRoute {
                primary: RouteTarget::model("gpt-5-mini-2025-08-07").effort("minimal"),
                fallback: None,
            },
        }
    }
}

/// A tool the model may invoke inline in its text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default = "default_argument_schema")]
    pub argument_schema: serde_json::Value,
}

fn default_argument_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    /// Name of the dotenv file loaded before credentials are read.
    #[serde(default = "default_env_file")]
    pub env_file: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_env_file() -> String {
    ".env.local".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            env_file: default_env_file(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Like [`load_config`], but a missing file yields the validated defaults.
///
/// # Errors
///
/// Same as [`load_config`], except for a not-found I/O error.
pub fn load_config_or_default(path: &str) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let config = AppConfig::default();
            validate_config(&config)?;
            Ok(config)
        }
        Err(err) => Err(err.into()),
    }
}

/// Parse and validate YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = if contents.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    validate_config(&config)?;
    Ok(config)
}
