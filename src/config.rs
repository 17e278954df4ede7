use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::error::ConfigError;
use crate::types::plan::FailurePolicy;

pub const CONFIG_PATH_ENV: &str = "SCREEN_AGENT_CONFIG";
pub const PLANNER_URL_ENV: &str = "SCREEN_AGENT_PLANNER_URL";
pub const PLANNER_KEY_ENV: &str = "SCREEN_AGENT_PLANNER_KEY";
pub const PLANNER_MODEL_ENV: &str = "SCREEN_AGENT_PLANNER_MODEL";
pub const PLANNER_RETRIES_ENV: &str = "SCREEN_AGENT_PLANNER_RETRIES";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    /// How long `capture_once` waits for a first frame.
    pub grace_ms: u64,
    pub poll_interval_ms: u64,
    pub stream_period_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 2400,
            density_dpi: 420,
            grace_ms: 250,
            poll_interval_ms: 10,
            stream_period_ms: 1000,
        }
    }
}

impl CaptureConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stream_period(&self) -> Duration {
        Duration::from_millis(self.stream_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub timeout_ms: u64,
    pub dedup_iou: f64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            dedup_iou: 0.5,
        }
    }
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessibilityConfig {
    pub max_depth: usize,
    pub debounce_ms: u64,
}

impl Default for AccessibilityConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
            debounce_ms: 150,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub gesture_timeout_ms: u64,
    pub tap_duration_ms: u64,
    /// Upper bound on nodes visited when searching the live tree.
    pub search_limit: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            gesture_timeout_ms: 10_000,
            tap_duration_ms: 50,
            search_limit: 2_000,
        }
    }
}

impl ExecutorConfig {
    pub fn gesture_timeout(&self) -> Duration {
        Duration::from_millis(self.gesture_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub command_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 30_000,
            settle_delay_ms: 300,
            failure_policy: FailurePolicy::ByCommandKind,
        }
    }
}

impl PlanConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub capture_dir: String,
    pub jpeg_quality: u8,
    pub retention_days: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capture_dir: "captures".to_string(),
            jpeg_quality: 85,
            retention_days: 7,
        }
    }
}

impl StorageConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_ms: u64,
    pub max_retries: u32,                // 总尝试次数，含第一次
    pub send_screenshot: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "qwen-vl-plus".to_string(),
            temperature: 0.2,
            timeout_ms: 30_000,
            max_retries: 3,
            send_screenshot: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub capture: CaptureConfig,
    pub ocr: OcrConfig,
    pub accessibility: AccessibilityConfig,
    pub executor: ExecutorConfig,
    pub plan: PlanConfig,
    pub storage: StorageConfig,
    pub planner: PlannerConfig,
}

impl AgentConfig {
    /// Defaults, then the YAML file named by `SCREEN_AGENT_CONFIG`, then
    /// individual environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "loaded config file");
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Applies `SCREEN_AGENT_*` overrides through `lookup`. Unparsable values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get(PLANNER_URL_ENV) {
            self.planner.endpoint = Some(v);
        }
        if let Some(v) = get(PLANNER_KEY_ENV) {
            self.planner.api_key = Some(v);
        }
        if let Some(v) = get(PLANNER_MODEL_ENV) {
            self.planner.model = v;
        }
        if let Some(v) = get(PLANNER_RETRIES_ENV).and_then(|v| v.parse().ok()) {
            self.planner.max_retries = v;
        }
        if let Some(v) = get("SCREEN_AGENT_CAPTURE_DIR") {
            self.storage.capture_dir = v;
        }
        if let Some(v) = get("SCREEN_AGENT_JPEG_QUALITY").and_then(|v| v.parse().ok()) {
            self.storage.jpeg_quality = v;
        }
        if let Some(v) = get("SCREEN_AGENT_RETENTION_DAYS").and_then(|v| v.parse().ok()) {
            self.storage.retention_days = v;
        }
        if let Some(v) = get("SCREEN_AGENT_COMMAND_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.plan.command_timeout_ms = v;
        }
        if let Some(v) = get("SCREEN_AGENT_SETTLE_MS").and_then(|v| v.parse().ok()) {
            self.plan.settle_delay_ms = v;
        }
        if let Some(v) = get("SCREEN_AGENT_FAILURE_POLICY") {
            match serde_yaml::from_str::<FailurePolicy>(&v) {
                Ok(policy) => self.plan.failure_policy = policy,
                Err(e) => debug!(value = %v, error = %e, "ignoring unknown failure policy"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(invalid("capture.width/height", "screen size must be non-zero"));
        }
        if self.capture.density_dpi == 0 {
            return Err(invalid("capture.density_dpi", "must be non-zero"));
        }
        if self.capture.stream_period_ms == 0 {
            return Err(invalid("capture.stream_period_ms", "must be non-zero"));
        }
        if !(1..=100).contains(&self.storage.jpeg_quality) {
            return Err(invalid(
                "storage.jpeg_quality",
                format!("{} is outside 1..=100", self.storage.jpeg_quality),
            ));
        }
        if self.storage.capture_dir.trim().is_empty() {
            return Err(invalid("storage.capture_dir", "must not be empty"));
        }
        if self.plan.command_timeout_ms == 0 {
            return Err(invalid("plan.command_timeout_ms", "must be non-zero"));
        }
        if self.executor.gesture_timeout_ms == 0 {
            return Err(invalid("executor.gesture_timeout_ms", "must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.ocr.dedup_iou) {
            return Err(invalid("ocr.dedup_iou", "must be within 0.0..=1.0"));
        }
        if self.planner.max_retries == 0 {
            return Err(invalid("planner.max_retries", "at least one attempt is required"));
        }
        if let Some(endpoint) = &self.planner.endpoint {
            url::Url::parse(endpoint)
                .map_err(|e| invalid("planner.endpoint", format!("{}: {}", endpoint, e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.capture.grace(), Duration::from_millis(250));
        assert_eq!(config.plan.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.storage.jpeg_quality, 85);
        assert_eq!(config.storage.retention(), Duration::from_secs(7 * 86_400));
        assert_eq!(config.plan.failure_policy, FailurePolicy::ByCommandKind);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = AgentConfig::from_yaml_str(
            "plan:\n  settle_delay_ms: 120\n  failure_policy: continue_on_any\nstorage:\n  jpeg_quality: 70\n",
        )
        .unwrap();
        assert_eq!(config.plan.settle_delay_ms, 120);
        assert_eq!(config.plan.failure_policy, FailurePolicy::ContinueOnAny);
        assert_eq!(config.plan.command_timeout_ms, 30_000);
        assert_eq!(config.storage.jpeg_quality, 70);
        assert_eq!(config.storage.capture_dir, "captures");
    }

    #[test]
    fn yaml_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "capture:\n  width: 720\n  height: 1600").unwrap();
        let config = AgentConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!((config.capture.width, config.capture.height), (720, 1600));

        let missing = AgentConfig::from_yaml_file("/definitely/not/here.yaml");
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn env_overrides_apply_over_file_values() {
        let vars: HashMap<&str, &str> = [
            (PLANNER_URL_ENV, "http://localhost:8080/plan"),
            ("SCREEN_AGENT_JPEG_QUALITY", "60"),
            ("SCREEN_AGENT_SETTLE_MS", "not-a-number"),
            ("SCREEN_AGENT_FAILURE_POLICY", "abort_on_any"),
            (PLANNER_RETRIES_ENV, "5"),
        ]
        .into_iter()
        .collect();
        let mut config = AgentConfig::default();
        config.apply_env_with(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.planner.endpoint.as_deref(), Some("http://localhost:8080/plan"));
        assert_eq!(config.storage.jpeg_quality, 60);
        assert_eq!(config.plan.settle_delay_ms, 300);
        assert_eq!(config.plan.failure_policy, FailurePolicy::AbortOnAny);
        assert_eq!(config.planner.max_retries, 5);
        config.validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AgentConfig::default();
        config.storage.jpeg_quality = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "storage.jpeg_quality", .. })
        ));

        let mut config = AgentConfig::default();
        config.planner.endpoint = Some("not a url".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "planner.endpoint", .. })
        ));

        let mut config = AgentConfig::default();
        config.capture.width = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.planner.max_retries = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "planner.max_retries", .. })
        ));
    }
}
