//! Sentinel Configuration - site identity, broker, database and detector tuning
//!
//! Every field has a default so a bare deployment runs from environment
//! variables alone, the way the plant containers are configured.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;
use crate::baseline::{
    ThreeSigmaPolicy, ZScorePolicy, DEFAULT_ANOMALY_LIST_SIZE, DEFAULT_FLOOR_LIMIT,
    DEFAULT_MODEL_WINDOW_SIZE, DEFAULT_Z_SCORE_THRESHOLD,
};
use crate::sink::WriteOptions;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "SENTINEL_CONFIG";

/// Config file picked up from the working directory when no path is given.
pub const LOCAL_CONFIG_FILE: &str = "sentinel.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one sentinel deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Line / machine / sensor identity, also the MQTT topic
    #[serde(default)]
    pub site: SiteConfig,

    /// MQTT broker connection
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// InfluxDB v2 write target
    #[serde(default)]
    pub influx: InfluxConfig,

    /// Streaming baseline tuning
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Status HTTP server
    #[serde(default)]
    pub server: ServerConfig,
}

impl SentinelConfig {
    /// Build the startup configuration.
    ///
    /// `explicit` (from `--config`) wins over `$SENTINEL_CONFIG`; an explicit
    /// file that cannot be read is an error. Without one, `./sentinel.toml` is
    /// used when present, otherwise built-in defaults. Environment overrides
    /// are applied last, then the result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                let config = Self::from_file(&path)?;
                info!(path = %path.display(), "Loaded config file");
                config
            }
            None => {
                let local = PathBuf::from(LOCAL_CONFIG_FILE);
                if local.exists() {
                    let config = Self::from_file(&local)?;
                    info!("Loaded config from ./{LOCAL_CONFIG_FILE}");
                    config
                } else {
                    info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
                    Self::default()
                }
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file without environment overrides.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        // Two-pass: unknown keys are warnings only
        for w in super::validation::validate_unknown_keys(&contents) {
            warn!("{}", w);
        }

        toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// A variable that is set but does not parse is an error naming it.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvLookup(&lookup);

        env.string("LINE_NAME", &mut self.site.line_name);
        env.string("MACHINE_NAME", &mut self.site.machine_name);
        env.string("SENSOR_NAME", &mut self.site.sensor_name);

        env.optional_string("MQTT_USERNAME", &mut self.mqtt.username);
        env.optional_string("MQTT_PASSWORD", &mut self.mqtt.password);
        env.string("MQTT_HOST", &mut self.mqtt.host);
        env.parsed("MQTT_PORT", &mut self.mqtt.port)?;
        env.parsed("MQTT_QOS", &mut self.mqtt.qos)?;

        env.string("INFLUX_HOST", &mut self.influx.host);
        env.parsed("INFLUX_PORT", &mut self.influx.port)?;
        env.string("INFLUX_PROCESS_DB", &mut self.influx.bucket);
        env.parsed("INFLUX_BATCH_SIZE", &mut self.influx.batch_size)?;
        env.parsed("INFLUX_FLUSH_INTERVAL", &mut self.influx.flush_interval_ms)?;
        env.parsed("INFLUX_JITTER_INTERVAL", &mut self.influx.jitter_interval_ms)?;
        env.string("INFLUX_ORG", &mut self.influx.org);
        env.string("INFLUX_TOKEN", &mut self.influx.token);

        env.parsed("MODEL_WINDOW_SIZE", &mut self.detector.model_window_size)?;
        env.parsed("ANOMALY_LIST_SIZE", &mut self.detector.anomaly_list_size)?;
        env.parsed("THRESH_STD_LIMIT", &mut self.detector.thresh_std_limit)?;
        env.parsed("Z_SCORE_THRESHOLD", &mut self.detector.z_score_threshold)?;

        env.string("SENTINEL_SERVER_ADDR", &mut self.server.addr);
        Ok(())
    }

    /// Check every section, reporting all problems together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        for (name, value) in [
            ("site.line_name", &self.site.line_name),
            ("site.machine_name", &self.site.machine_name),
            ("site.sensor_name", &self.site.sensor_name),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{name} must not be empty"));
            }
        }

        if self.mqtt.host.trim().is_empty() {
            errors.push("mqtt.host must not be empty".to_string());
        }
        if self.mqtt.qos > 2 {
            errors.push(format!("mqtt.qos = {} must be 0, 1 or 2", self.mqtt.qos));
        }

        if self.influx.host.trim().is_empty() {
            errors.push("influx.host must not be empty".to_string());
        }
        if self.influx.batch_size == 0 {
            errors.push("influx.batch_size must be > 0".to_string());
        }
        if self.influx.flush_interval_ms == 0 {
            errors.push("influx.flush_interval_ms must be > 0".to_string());
        }

        let d = &self.detector;
        if d.model_window_size == 0 {
            errors.push("detector.model_window_size must be > 0".to_string());
        }
        if d.anomaly_list_size == 0 {
            errors.push("detector.anomaly_list_size must be > 0".to_string());
        }
        if !d.thresh_std_limit.is_finite() || d.thresh_std_limit < 0.0 {
            errors.push(format!(
                "detector.thresh_std_limit = {} must be a finite value >= 0",
                d.thresh_std_limit
            ));
        }
        if !d.z_score_threshold.is_finite() || d.z_score_threshold <= 0.0 {
            errors.push(format!(
                "detector.z_score_threshold = {} must be a finite value > 0",
                d.z_score_threshold
            ));
        }

        if self.server.addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "server.addr = '{}' is not a socket address",
                self.server.addr
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

struct EnvLookup<'a, F>(&'a F);

impl<F> EnvLookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str, target: &mut String) {
        if let Some(value) = (self.0)(name) {
            *target = value;
        }
    }

    fn optional_string(&self, name: &str, target: &mut Option<String>) {
        if let Some(value) = (self.0)(name) {
            *target = Some(value);
        }
    }

    fn parsed<T>(&self, name: &str, target: &mut T) -> Result<(), ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = (self.0)(name) {
            *target = raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
                var: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[source] toml::ser::Error),

    #[error("Env variable {var}='{value}' is invalid: {reason}")]
    Env {
        var: String,
        value: String,
        reason: String,
    },

    #[error("Config validation failed:\n{}", bullet_list(.0))]
    Validation(Vec<String>),
}

fn bullet_list(errors: &[String]) -> String {
    errors.iter().map(|e| format!("  - {e}\n")).collect()
}

// ============================================================================
// Site
// ============================================================================

/// Identity of the monitored sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_line_name")]
    pub line_name: String,

    #[serde(default = "default_machine_name")]
    pub machine_name: String,

    #[serde(default = "default_sensor_name")]
    pub sensor_name: String,
}

fn default_line_name() -> String {
    defaults::DEFAULT_LINE_NAME.to_string()
}
fn default_machine_name() -> String {
    defaults::DEFAULT_MACHINE_NAME.to_string()
}
fn default_sensor_name() -> String {
    defaults::DEFAULT_SENSOR_NAME.to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            line_name: default_line_name(),
            machine_name: default_machine_name(),
            sensor_name: default_sensor_name(),
        }
    }
}

impl SiteConfig {
    /// `<line>/<machine>/<sensor>`
    pub fn topic(&self) -> String {
        format!("{}/{}/{}", self.line_name, self.machine_name, self.sensor_name)
    }
}

// ============================================================================
// MQTT
// ============================================================================

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// 0, 1 or 2.
    #[serde(default = "default_mqtt_qos")]
    pub qos: u8,

    /// Defaults to `plant-sentinel-<sensor>` when unset.
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_mqtt_host() -> String {
    defaults::DEFAULT_MQTT_HOST.to_string()
}
fn default_mqtt_port() -> u16 {
    defaults::DEFAULT_MQTT_PORT
}
fn default_mqtt_qos() -> u8 {
    defaults::DEFAULT_MQTT_QOS
}
fn default_keep_alive() -> u64 {
    defaults::DEFAULT_MQTT_KEEP_ALIVE_SECS
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            qos: default_mqtt_qos(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
        }
    }
}

// credentials stay out of logs
impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("qos", &self.qos)
            .field("client_id", &self.client_id)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .finish()
    }
}

// ============================================================================
// InfluxDB
// ============================================================================

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluxConfig {
    #[serde(default = "default_influx_host")]
    pub host: String,

    #[serde(default = "default_influx_port")]
    pub port: u16,

    /// Target bucket (`INFLUX_PROCESS_DB`).
    #[serde(default = "default_influx_bucket")]
    pub bucket: String,

    #[serde(default = "default_influx_org")]
    pub org: String,

    #[serde(default)]
    pub token: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_jitter_interval")]
    pub jitter_interval_ms: u64,
}

fn default_influx_host() -> String {
    defaults::DEFAULT_INFLUX_HOST.to_string()
}
fn default_influx_port() -> u16 {
    defaults::DEFAULT_INFLUX_PORT
}
fn default_influx_bucket() -> String {
    defaults::DEFAULT_INFLUX_BUCKET.to_string()
}
fn default_influx_org() -> String {
    defaults::DEFAULT_INFLUX_ORG.to_string()
}
fn default_batch_size() -> usize {
    defaults::DEFAULT_INFLUX_BATCH_SIZE
}
fn default_flush_interval() -> u64 {
    defaults::DEFAULT_INFLUX_FLUSH_INTERVAL_MS
}
fn default_jitter_interval() -> u64 {
    defaults::DEFAULT_INFLUX_JITTER_INTERVAL_MS
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: default_influx_host(),
            port: default_influx_port(),
            bucket: default_influx_bucket(),
            org: default_influx_org(),
            token: String::new(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval(),
            jitter_interval_ms: default_jitter_interval(),
        }
    }
}

impl InfluxConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            jitter_interval: Duration::from_millis(self.jitter_interval_ms),
            retry_interval: Duration::from_millis(defaults::INFLUX_RETRY_INTERVAL_MS),
            channel_capacity: defaults::INFLUX_QUEUE_CAPACITY,
            ..WriteOptions::default()
        }
    }
}

impl std::fmt::Debug for InfluxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bucket", &self.bucket)
            .field("org", &self.org)
            .field("token", &if self.token.is_empty() { "" } else { "***" })
            .field("batch_size", &self.batch_size)
            .field("flush_interval_ms", &self.flush_interval_ms)
            .field("jitter_interval_ms", &self.jitter_interval_ms)
            .finish()
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Streaming baseline tuning shared by every model of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Readings per model window (N).
    #[serde(default = "default_model_window_size")]
    pub model_window_size: usize,

    /// Outcomes kept for the anomaly ratio (K).
    #[serde(default = "default_anomaly_list_size")]
    pub anomaly_list_size: usize,

    /// Minimum half-width of the 3-sigma band.
    #[serde(default = "default_thresh_std_limit")]
    pub thresh_std_limit: f64,

    /// |z| above which a vibration reading is anomalous.
    #[serde(default = "default_z_score_threshold")]
    pub z_score_threshold: f64,
}

fn default_model_window_size() -> usize {
    DEFAULT_MODEL_WINDOW_SIZE
}
fn default_anomaly_list_size() -> usize {
    DEFAULT_ANOMALY_LIST_SIZE
}
fn default_thresh_std_limit() -> f64 {
    DEFAULT_FLOOR_LIMIT
}
fn default_z_score_threshold() -> f64 {
    DEFAULT_Z_SCORE_THRESHOLD
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_window_size: default_model_window_size(),
            anomaly_list_size: default_anomaly_list_size(),
            thresh_std_limit: default_thresh_std_limit(),
            z_score_threshold: default_z_score_threshold(),
        }
    }
}

impl DetectorConfig {
    pub fn three_sigma_policy(&self) -> ThreeSigmaPolicy {
        ThreeSigmaPolicy::new(self.thresh_std_limit)
    }

    pub fn z_score_policy(&self) -> ZScorePolicy {
        ZScorePolicy::new(self.z_score_threshold)
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_addr")]
    pub addr: String,

    /// Serve the status API.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_server_addr() -> String {
    defaults::DEFAULT_SERVER_ADDR.to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            enabled: true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SentinelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector.model_window_size, 100);
        assert_eq!(config.detector.anomaly_list_size, 100);
        assert_eq!(config.detector.thresh_std_limit, 20.0);
        assert_eq!(config.detector.z_score_threshold, 2.0);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: SentinelConfig = toml::from_str(
            r#"
[site]
line_name = "Press"

[detector]
model_window_size = 50
"#,
        )
        .unwrap();
        assert_eq!(config.site.line_name, "Press");
        assert_eq!(config.site.machine_name, defaults::DEFAULT_MACHINE_NAME);
        assert_eq!(config.detector.model_window_size, 50);
        assert_eq!(config.detector.anomaly_list_size, 100);
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn env_overrides_use_deployment_names() {
        let mut config = SentinelConfig::default();
        config
            .apply_overrides_from(lookup(&[
                ("LINE_NAME", "L2"),
                ("MACHINE_NAME", "Crimper"),
                ("SENSOR_NAME", "Valve7"),
                ("MQTT_PORT", "8883"),
                ("MQTT_PASSWORD", "secret"),
                ("INFLUX_PROCESS_DB", "valves"),
                ("MODEL_WINDOW_SIZE", "20"),
                ("THRESH_STD_LIMIT", "10"),
                ("Z_SCORE_THRESHOLD", "2.5"),
            ]))
            .unwrap();
        assert_eq!(config.site.topic(), "L2/Crimper/Valve7");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.password.as_deref(), Some("secret"));
        assert_eq!(config.influx.bucket, "valves");
        assert_eq!(config.detector.model_window_size, 20);
        assert_eq!(config.detector.thresh_std_limit, 10.0);
        assert_eq!(config.detector.z_score_threshold, 2.5);
    }

    #[test]
    fn unparsable_override_names_the_variable() {
        let mut config = SentinelConfig::default();
        let err = config
            .apply_overrides_from(lookup(&[("MQTT_PORT", "eighteen")]))
            .unwrap_err();
        match err {
            ConfigError::Env { var, value, .. } => {
                assert_eq!(var, "MQTT_PORT");
                assert_eq!(value, "eighteen");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut config = SentinelConfig::default();
        config.detector.model_window_size = 0;
        config.detector.anomaly_list_size = 0;
        config.detector.thresh_std_limit = -1.0;
        config.detector.z_score_threshold = f64::NAN;
        config.mqtt.qos = 3;
        config.site.sensor_name = " ".to_string();
        config.influx.batch_size = 0;

        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 7, "{errors:?}"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn zero_floor_is_allowed() {
        let mut config = SentinelConfig::default();
        config.detector.thresh_std_limit = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_output_masks_secrets() {
        let mut config = SentinelConfig::default();
        config.mqtt.password = Some("hunter2".to_string());
        config.influx.token = "tok-123".to_string();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("tok-123"));
    }

    #[test]
    fn influx_url_and_write_options() {
        let mut config = SentinelConfig::default();
        config.influx.host = "influxdb".to_string();
        config.influx.batch_size = 500;
        config.influx.flush_interval_ms = 2_000;
        assert_eq!(config.influx.url(), "http://influxdb:8086");
        let options = config.influx.write_options();
        assert_eq!(options.batch_size, 500);
        assert_eq!(options.flush_interval, Duration::from_millis(2_000));
        assert_eq!(options.max_retries, 3);
    }

    #[test]
    fn toml_round_trips_through_serializer() {
        let config = SentinelConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: SentinelConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
