//! Layered settings: compiled defaults, then `~/.switchboard/settings.json`
//! (or an explicit file), then `SWITCHBOARD_*` environment overrides.
//!
//! Merge rules: objects merge per key, arrays and primitives are replaced,
//! and nulls in the file keep the default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn, Level};

use switchboard_core::assistant::Assistant;
use switchboard_engine::DispatchConfig;
use switchboard_telemetry::{parse_level, TelemetryConfig};

pub const MEMORY_DB: &str = ":memory:";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    pub max_turns: u32,
    pub call_timeout_secs: u64,
    pub remote_timeout_secs: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        let defaults = DispatchConfig::default();
        Self {
            max_turns: defaults.max_turns,
            call_timeout_secs: defaults.call_timeout.as_secs(),
            remote_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-module levels, e.g. `{"switchboard_engine": "debug"}`.
    pub modules: std::collections::BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            modules: Default::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// File path, or `:memory:`. Defaults to `~/.switchboard/switchboard.db`.
    pub path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    pub dispatch: DispatchSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    /// Put the orchestration controller in charge of new runs.
    pub orchestrate: bool,
    /// Assistant made active when orchestration is off.
    pub default_assistant: Option<String>,
    pub assistants: Vec<Assistant>,
}

impl Default for SwitchboardSettings {
    fn default() -> Self {
        Self {
            dispatch: DispatchSettings::default(),
            logging: LoggingSettings::default(),
            database: DatabaseSettings::default(),
            orchestrate: true,
            default_assistant: None,
            assistants: Vec::new(),
        }
    }
}

impl SwitchboardSettings {
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_turns: self.dispatch.max_turns,
            call_timeout: Duration::from_secs(self.dispatch.call_timeout_secs),
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.remote_timeout_secs)
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        let log_level = parse_level(&self.logging.level).unwrap_or_else(|| {
            warn!(level = %self.logging.level, "unknown log level, using info");
            Level::INFO
        });
        let module_levels = self
            .logging
            .modules
            .iter()
            .filter_map(|(module, level)| match parse_level(level) {
                Some(l) => Some((module.clone(), l)),
                None => {
                    warn!(%module, %level, "unknown module log level, ignoring");
                    None
                }
            })
            .collect();
        TelemetryConfig {
            log_level,
            module_levels,
            json: self.logging.json,
        }
    }

    /// The database file, or `None` for an in-memory store.
    pub fn database_path(&self) -> Option<PathBuf> {
        match self.database.path.as_deref() {
            Some(MEMORY_DB) => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(switchboard_dir().join("switchboard.db")),
        }
    }
}

fn switchboard_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".switchboard")
}

pub fn settings_path() -> PathBuf {
    switchboard_dir().join("settings.json")
}

/// Load from `path` (or the default location) and apply env overrides.
pub fn load_settings(path: Option<&Path>) -> Result<SwitchboardSettings, SettingsError> {
    let mut settings = match path {
        Some(path) => load_settings_from_path(path)?,
        None => load_settings_from_path(&settings_path())?,
    };
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

/// Defaults merged with the file at `path`. A missing file yields defaults.
pub fn load_settings_from_path(path: &Path) -> Result<SwitchboardSettings, SettingsError> {
    let defaults = serde_json::to_value(SwitchboardSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let user: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SWITCHBOARD_*` overrides read through `lookup`. Invalid values are
/// logged and ignored.
pub fn apply_overrides(
    settings: &mut SwitchboardSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let read_range = |key: &str, min: u64, max: u64| -> Option<u64> {
        let raw = lookup(key)?;
        let parsed = parse_u64_range(&raw, min, max);
        if parsed.is_none() {
            warn!(key, value = %raw, min, max, "invalid numeric env var, ignoring");
        }
        parsed
    };

    if let Some(v) = read_range("SWITCHBOARD_MAX_TURNS", 1, 1000) {
        settings.dispatch.max_turns = v as u32;
    }
    if let Some(v) = read_range("SWITCHBOARD_CALL_TIMEOUT_SECS", 1, 3600) {
        settings.dispatch.call_timeout_secs = v;
    }
    if let Some(v) = read_range("SWITCHBOARD_REMOTE_TIMEOUT_SECS", 1, 3600) {
        settings.dispatch.remote_timeout_secs = v;
    }

    if let Some(level) = lookup("SWITCHBOARD_LOG_LEVEL").filter(|v| !v.is_empty()) {
        if parse_level(&level).is_some() {
            settings.logging.level = level;
        } else {
            warn!(
                key = "SWITCHBOARD_LOG_LEVEL",
                value = %level,
                "invalid log level env var, ignoring"
            );
        }
    }
    if let Some(raw) = lookup("SWITCHBOARD_LOG_JSON") {
        match parse_bool(&raw) {
            Some(v) => settings.logging.json = v,
            None => warn!(
                key = "SWITCHBOARD_LOG_JSON",
                value = %raw,
                "invalid boolean env var, ignoring"
            ),
        }
    }
    if let Some(path) = lookup("SWITCHBOARD_DB").filter(|v| !v.is_empty()) {
        settings.database.path = Some(path);
    }
}

/// Accepts `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}
