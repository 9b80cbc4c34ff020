use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "switchboard_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

/// Handle returned by [`init_telemetry`].
#[derive(Debug)]
pub struct TelemetryGuard {
    directives: String,
    from_env: bool,
}

impl TelemetryGuard {
    /// The filter directives in effect.
    pub fn directives(&self) -> &str {
        &self.directives
    }

    /// Whether RUST_LOG took precedence over the configured levels.
    pub fn from_env(&self) -> bool {
        self.from_env
    }
}

/// Filter string built from the configured level and module overrides.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Parse a level name as accepted in settings ("info", "DEBUG", ...).
pub fn parse_level(s: &str) -> Option<Level> {
    s.trim().parse().ok()
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let configured = filter_directives(&config);
    let (env_filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(&configured), false),
    };
    let directives = if from_env {
        env_filter.to_string()
    } else {
        configured
    };

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
    {
        eprintln!("switchboard-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard {
        directives,
        from_env,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_bare_level() {
        assert_eq!(filter_directives(&TelemetryConfig::default()), "info");
    }

    #[test]
    fn module_overrides_are_appended() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("switchboard_engine".into(), Level::DEBUG),
                ("switchboard_store".into(), Level::TRACE),
            ],
            json: true,
        };
        assert_eq!(
            filter_directives(&config),
            "warn,switchboard_engine=debug,switchboard_store=trace"
        );
    }

    #[test]
    fn parse_level_accepts_any_case() {
        assert_eq!(parse_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_level(" warn "), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }
}
