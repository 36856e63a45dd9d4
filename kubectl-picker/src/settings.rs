use k8s_openapi::serde_json;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutputMode {
    #[default]
    StreamBuffer,
    ExternalTerminal,
}

/// Immutable configuration snapshot. Every field has a default so the picker
/// can pass a partial table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ttl_seconds: u64,
    pub auto_refresh: bool,
    pub auto_refresh_interval_seconds: u64,
    pub log_output_mode: LogOutputMode,
    pub log_follow_mode: bool,
    pub log_buffer_max_lines: usize,
    pub kubectl_binary: String,
    pub log_tail_lines: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ttl_seconds: 30,
            auto_refresh: false,
            auto_refresh_interval_seconds: 30,
            log_output_mode: LogOutputMode::StreamBuffer,
            log_follow_mode: true,
            log_buffer_max_lines: 10_000,
            kubectl_binary: "kubectl".to_string(),
            log_tail_lines: None,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        Ok(settings.normalized())
    }

    /// Clamps values that would make the buffer or timer degenerate.
    pub fn normalized(mut self) -> Self {
        self.log_buffer_max_lines = self.log_buffer_max_lines.max(1);
        self.auto_refresh_interval_seconds = self.auto_refresh_interval_seconds.max(1);
        if self.kubectl_binary.trim().is_empty() {
            self.kubectl_binary = Settings::default().kubectl_binary;
        }
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn auto_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.auto_refresh_interval_seconds.max(1))
    }
}

/// Holder that hands out `Arc` snapshots and swaps the whole object on setup.
#[derive(Debug, Default)]
pub struct SettingsHandle {
    current: RwLock<Arc<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings.normalized())),
        }
    }

    pub fn load(&self) -> Arc<Settings> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, settings: Settings) -> Arc<Settings> {
        let next = Arc::new(settings.normalized());
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = next.clone();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings = Settings::from_json(r#"{"ttl_seconds": 5, "log_output_mode": "external_terminal"}"#)
            .unwrap();
        assert_eq!(settings.ttl(), Duration::from_secs(5));
        assert_eq!(settings.log_output_mode, LogOutputMode::ExternalTerminal);
        assert!(settings.log_follow_mode);
        assert_eq!(settings.log_buffer_max_lines, 10_000);
    }

    #[test]
    fn test_degenerate_values_are_clamped() {
        let settings = Settings::from_json(
            r#"{"log_buffer_max_lines": 0, "auto_refresh_interval_seconds": 0, "kubectl_binary": ""}"#,
        )
        .unwrap();
        assert_eq!(settings.log_buffer_max_lines, 1);
        assert_eq!(settings.auto_refresh_interval(), Duration::from_secs(1));
        assert_eq!(settings.kubectl_binary, "kubectl");
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let err = Settings::from_json("{ttl_seconds: 1}").unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn test_replace_swaps_whole_snapshot() {
        let handle = SettingsHandle::new(Settings::default());
        let before = handle.load();
        handle.replace(Settings {
            ttl_seconds: 1,
            ..Settings::default()
        });
        assert_eq!(before.ttl_seconds, 30);
        assert_eq!(handle.load().ttl_seconds, 1);
    }
}
