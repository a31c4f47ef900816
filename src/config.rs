//! Configuration
//!
//! The instrumentation block mirrors the gateway policy options:
//! - `remove_ids_regex` / `remove_ids` control path sanitization
//! - `backend` selects the emission style and its connection parameters
//!
//! [`AppConfig::load`] reads an optional `gateway-metrics.toml` followed by
//! `GATEWAY__`-prefixed environment variables, e.g.
//! `GATEWAY__INSTRUMENTATION__BACKEND__STYLE=line`.

use std::time::Duration;

use serde::Deserialize;
use validator::Validate;

use crate::error::ConfigError;

/// Matches UUIDs and bare integers.
pub const DEFAULT_REMOVE_IDS_REGEX: &str =
    "([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})|([0-9]+)";

pub const DEFAULT_STATSD_PORT: u16 = 8125;
pub const DEFAULT_LINE_PORT: u16 = 8086;
pub const DEFAULT_PREFIX: &str = "apigateway";

/// Which backend dialect metric points are built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStyle {
    /// One tagged timing per request over statsd.
    #[default]
    Tagged,
    /// Counters and a timing keyed by dotted names over plain statsd.
    Hierarchical,
    /// Buffered line-protocol points flushed over HTTP.
    #[serde(alias = "buffered", alias = "influx")]
    Line,
}

/// Tag encoding used by the tagged statsd style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagScheme {
    /// `name:value|ms|#key:value,...`
    #[default]
    Datadog,
    /// `name;key=value;...:value|ms`
    Graphite,
}

/// Backend connection block.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BackendConfig {
    #[serde(default)]
    pub style: BackendStyle,
    #[serde(default = "default_host")]
    pub host: String,
    /// Falls back to 8125 for statsd styles, 8086 for line protocol.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub scheme: TagScheme,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    #[serde(default = "default_application")]
    pub application: String,
    /// Maximum points per batch before a flush is forced.
    #[serde(default = "default_buffer_size", alias = "bufferSize")]
    #[validate(range(min = 1, max = 100000))]
    pub buffer_size: usize,
    /// Maximum age of the oldest buffered point, in milliseconds.
    #[serde(default = "default_delay")]
    #[validate(range(min = 1))]
    pub delay: u64,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl BackendConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.style {
            BackendStyle::Tagged | BackendStyle::Hierarchical => DEFAULT_STATSD_PORT,
            BackendStyle::Line => DEFAULT_LINE_PORT,
        })
    }

    /// Resolved metric prefix; an explicit empty string disables it.
    pub fn prefix(&self) -> Option<&str> {
        match (&self.prefix, self.style) {
            (Some(prefix), _) if prefix.is_empty() => None,
            (Some(prefix), _) => Some(prefix.as_str()),
            (None, BackendStyle::Tagged) => Some(DEFAULT_PREFIX),
            (None, _) => None,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            style: BackendStyle::default(),
            host: default_host(),
            port: None,
            prefix: None,
            scheme: TagScheme::default(),
            measurement: default_measurement(),
            application: default_application(),
            buffer_size: default_buffer_size(),
            delay: default_delay(),
            database: default_database(),
            username: None,
            password: None,
        }
    }
}

/// Options for one instrumentation layer. Immutable once the layer is built.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InstrumentationConfig {
    #[serde(default = "default_remove_ids_regex", alias = "removeIdsRegex")]
    pub remove_ids_regex: String,
    #[serde(default, alias = "removeIds")]
    pub remove_ids: bool,
    #[serde(default, alias = "statsd_config", alias = "statsdConfig")]
    #[validate]
    pub backend: BackendConfig,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            remove_ids_regex: default_remove_ids_regex(),
            remove_ids: false,
            backend: BackendConfig::default(),
        }
    }
}

/// Settings for the demo gateway binary.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    #[validate]
    pub instrumentation: InstrumentationConfig,
}

impl AppConfig {
    /// Load from `gateway-metrics.toml` (optional) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("gateway-metrics").required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = settings.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }
}

fn default_remove_ids_regex() -> String {
    DEFAULT_REMOVE_IDS_REGEX.to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_measurement() -> String {
    "requests".to_string()
}

fn default_application() -> String {
    "default".to_string()
}

fn default_buffer_size() -> usize {
    100
}

fn default_delay() -> u64 {
    5000
}

fn default_database() -> String {
    "default".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_environment() -> String {
    "development".to_string()
}
