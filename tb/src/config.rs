//! TutorBus configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::ResponderType;

/// Main TutorBus configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Channel names
    pub topics: TopicsConfig,

    /// Responder worker pools
    pub consumer: ConsumerConfig,

    /// Reply correlation
    pub correlation: CorrelationConfig,

    /// Cost aggregation
    pub cost: CostConfig,

    /// Language routing
    pub router: RouterConfig,

    /// Answer-generation engines
    pub llm: LlmConfig,
}

/// Outcome of [`Config::validate`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Config {
    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .tutorbus.yml
        let local_config = PathBuf::from(".tutorbus.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/tutorbus/tutorbus.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tutorbus").join("tutorbus.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load only the log level, before logging is initialised
    ///
    /// Any failure yields None; the full load later reports it properly.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            return Some(level);
        }
        Self::load_file_chain(config_path).ok().and_then(|c| c.log_level)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply the environment variables the deployment scripts set
    pub fn apply_env_overrides(&mut self) {
        debug!("Config::apply_env_overrides: called");
        if let Ok(engine) = std::env::var("PREFERRED_ENGINE")
            && !engine.trim().is_empty()
        {
            self.llm.preferred = engine.trim().to_lowercase();
        }
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.llm.ollama.base_url = url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.llm.ollama.model = model;
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            self.llm.gemini.model = model;
        }
        if let Ok(timeout) = std::env::var("REQUEST_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.llm.request_timeout_secs = secs,
                Err(e) => warn!(%timeout, error = %e, "Ignoring invalid REQUEST_TIMEOUT"),
            }
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = Some(level);
        }

        let prices = [
            ("GEMINI_INPUT_COST_PER_1K_TOKENS", &mut self.llm.gemini.input_cost_per_1k),
            ("GEMINI_OUTPUT_COST_PER_1K_TOKENS", &mut self.llm.gemini.output_cost_per_1k),
            ("OLLAMA_INPUT_COST_PER_1K_TOKENS", &mut self.llm.ollama.input_cost_per_1k),
            ("OLLAMA_OUTPUT_COST_PER_1K_TOKENS", &mut self.llm.ollama.output_cost_per_1k),
        ];
        for (var, field) in prices {
            if let Ok(value) = std::env::var(var) {
                match value.trim().parse::<f64>() {
                    Ok(price) if price.is_finite() && price >= 0.0 => *field = price,
                    Ok(_) => warn!(%var, %value, "Ignoring negative or non-finite price"),
                    Err(e) => warn!(%var, %value, error = %e, "Ignoring invalid price"),
                }
            }
        }
    }

    /// Check the configuration for errors (fatal) and warnings (informational)
    pub fn validate(&self) -> ValidationReport {
        debug!("Config::validate: called");
        let mut report = ValidationReport::default();

        let topics = [
            ("chinese-teacher", &self.topics.chinese_teacher),
            ("english-teacher", &self.topics.english_teacher),
            ("responses", &self.topics.responses),
            ("cost-monitor", &self.topics.cost_monitor),
        ];
        for (name, value) in &topics {
            if value.trim().is_empty() {
                report.errors.push(format!("topics.{name} is empty"));
            }
        }
        for (i, (name_a, a)) in topics.iter().enumerate() {
            for (name_b, b) in topics.iter().skip(i + 1) {
                if a == b && !a.is_empty() {
                    report
                        .errors
                        .push(format!("topics.{name_a} and topics.{name_b} share channel '{a}'"));
                }
            }
        }

        if !matches!(self.llm.preferred.as_str(), "auto" | "gemini" | "ollama") {
            report.errors.push(format!(
                "Unknown preferred engine '{}'. Supported: auto, gemini, ollama",
                self.llm.preferred
            ));
        }

        if std::env::var(&self.llm.gemini.api_key_env).map_or(true, |k| k.trim().is_empty()) {
            report.warnings.push(format!(
                "{} not set - Gemini engine will not work",
                self.llm.gemini.api_key_env
            ));
        }

        if self.correlation.check_interval_ms == 0 {
            report.errors.push("correlation.check-interval-ms must be positive".to_string());
        }

        report
    }
}

/// Channel names on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    #[serde(rename = "chinese-teacher")]
    pub chinese_teacher: String,

    #[serde(rename = "english-teacher")]
    pub english_teacher: String,

    /// Shared reply channel
    pub responses: String,

    /// Shared telemetry channel
    #[serde(rename = "cost-monitor")]
    pub cost_monitor: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            chinese_teacher: "chinese_teacher".to_string(),
            english_teacher: "english_teacher".to_string(),
            responses: "responses".to_string(),
            cost_monitor: "cost_monitor".to_string(),
        }
    }
}

impl TopicsConfig {
    /// Input channel of a responder pool
    pub fn for_responder(&self, responder: ResponderType) -> &str {
        match responder {
            ResponderType::ChineseTeacher => &self.chinese_teacher,
            ResponderType::EnglishTeacher => &self.english_teacher,
        }
    }
}

/// Responder worker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Bounded wait per poll
    #[serde(rename = "poll-timeout-ms", default = "default_consumer_poll_ms")]
    pub poll_timeout_ms: u64,

    /// Sleep after a transport error before polling again
    #[serde(rename = "error-backoff-ms", default = "default_backoff_ms")]
    pub error_backoff_ms: u64,

    /// How long stop waits for each worker
    #[serde(rename = "shutdown-grace-secs", default = "default_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_consumer_poll_ms() -> u64 {
    debug!("default_consumer_poll_ms: called");
    1000
}

fn default_backoff_ms() -> u64 {
    debug!("default_backoff_ms: called");
    1000
}

fn default_grace_secs() -> u64 {
    debug!("default_grace_secs: called");
    5
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_consumer_poll_ms(),
            error_backoff_ms: default_backoff_ms(),
            shutdown_grace_secs: default_grace_secs(),
        }
    }
}

impl ConsumerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Reply correlation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Default wait for a reply
    #[serde(rename = "default-timeout-secs", default = "default_reply_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Cadence at which a waiting caller re-checks for shutdown
    #[serde(rename = "check-interval-ms", default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Bounded wait per poll of the reply channel
    #[serde(rename = "poll-timeout-ms", default = "default_reply_poll_ms")]
    pub poll_timeout_ms: u64,

    #[serde(rename = "error-backoff-ms", default = "default_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Consumer group of the reply listener
    #[serde(rename = "group-id", default = "default_reply_group")]
    pub group_id: String,

    #[serde(rename = "shutdown-grace-secs", default = "default_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_reply_timeout_secs() -> u64 {
    debug!("default_reply_timeout_secs: called");
    30
}

fn default_check_interval_ms() -> u64 {
    debug!("default_check_interval_ms: called");
    250
}

fn default_reply_poll_ms() -> u64 {
    debug!("default_reply_poll_ms: called");
    100
}

fn default_reply_group() -> String {
    debug!("default_reply_group: called");
    "cli_response_group".to_string()
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_reply_timeout_secs(),
            check_interval_ms: default_check_interval_ms(),
            poll_timeout_ms: default_reply_poll_ms(),
            error_backoff_ms: default_backoff_ms(),
            group_id: default_reply_group(),
            shutdown_grace_secs: default_grace_secs(),
        }
    }
}

impl CorrelationConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Cost aggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(rename = "poll-timeout-ms", default = "default_consumer_poll_ms")]
    pub poll_timeout_ms: u64,

    #[serde(rename = "error-backoff-ms", default = "default_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Consumer group of the telemetry listener
    #[serde(rename = "group-id", default = "default_cost_group")]
    pub group_id: String,

    #[serde(rename = "shutdown-grace-secs", default = "default_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_cost_group() -> String {
    debug!("default_cost_group: called");
    "cost_monitor_group".to_string()
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_consumer_poll_ms(),
            error_backoff_ms: default_backoff_ms(),
            group_id: default_cost_group(),
            shutdown_grace_secs: default_grace_secs(),
        }
    }
}

impl CostConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Which language detector the router uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Unicode script vote
    Script,
    /// Ideograph rule only
    None,
}

/// Language routing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub detector: DetectorKind,

    #[serde(rename = "min-confidence")]
    pub min_confidence: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::Script,
            min_confidence: 0.5,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// auto, gemini or ollama
    pub preferred: String,

    /// HTTP request timeout in seconds
    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    pub gemini: GeminiConfig,

    pub ollama: OllamaConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            preferred: "auto".to_string(),
            request_timeout_secs: 30,
            gemini: GeminiConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Gemini REST engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    #[serde(rename = "base-url")]
    pub base_url: String,

    #[serde(rename = "input-cost-per-1k")]
    pub input_cost_per_1k: f64,

    #[serde(rename = "output-cost-per-1k")]
    pub output_cost_per_1k: f64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            input_cost_per_1k: 0.000125,
            output_cost_per_1k: 0.000375,
        }
    }
}

impl GeminiConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.trim().is_empty())
    }
}

/// Local Ollama engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub model: String,

    #[serde(rename = "base-url")]
    pub base_url: String,

    #[serde(rename = "input-cost-per-1k")]
    pub input_cost_per_1k: f64,

    #[serde(rename = "output-cost-per-1k")]
    pub output_cost_per_1k: f64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            base_url: "http://localhost:11434".to_string(),
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
        }
    }
}
