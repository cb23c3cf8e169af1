//! Settings loader for the HLP executor.
//!
//! Reads `config.toml` from the data directory (`~/.hlp/` in production) and
//! deserializes it into [`ExecutorSettings`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use hlp_types::config::ExecutorSettings;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "HLP_DATA_DIR";

/// Resolve the data directory.
///
/// Priority:
/// 1. `HLP_DATA_DIR`
/// 2. `~/.hlp`
/// 3. `./.hlp` when no home directory is known
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".hlp"))
        .unwrap_or_else(|| PathBuf::from(".hlp"))
}

/// Load settings from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`ExecutorSettings::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed settings with [`enforce_floors`] applied.
pub async fn load_settings(data_dir: &Path) -> ExecutorSettings {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return ExecutorSettings::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return ExecutorSettings::default();
        }
    };

    match toml::from_str::<ExecutorSettings>(&content) {
        Ok(settings) => enforce_floors(settings),
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            ExecutorSettings::default()
        }
    }
}

/// Raise values that would stall the executor to their minimum.
///
/// A zero worker-slot count, breaker threshold or per-tier attempt budget is
/// treated as 1; the jitter factor is clamped to `[0, 1]`.
pub fn enforce_floors(mut settings: ExecutorSettings) -> ExecutorSettings {
    settings.executor.max_in_flight = settings.executor.max_in_flight.max(1);
    settings.executor.event_capacity = settings.executor.event_capacity.max(1);
    settings.circuit_breaker.failure_threshold = settings.circuit_breaker.failure_threshold.max(1);
    settings.circuit_breaker.success_threshold = settings.circuit_breaker.success_threshold.max(1);
    settings.retention.max_count = settings.retention.max_count.max(1);

    let tiers = &mut settings.retry.tiers;
    for tier in [&mut tiers.low, &mut tiers.medium, &mut tiers.high, &mut tiers.critical] {
        tier.max_attempts = tier.max_attempts.max(1);
    }

    let jitter = settings.retry.jitter_factor;
    settings.retry.jitter_factor = if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
    } else {
        0.0
    };
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlp_types::config::BackoffStrategy;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_settings_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let settings = load_settings(tmp.path()).await;
        assert_eq!(settings, ExecutorSettings::default());
    }

    #[tokio::test]
    async fn load_settings_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[executor]
max_in_flight = 8
auto_rollback = false

[retry]
strategy = "linear"
base_delay_ms = 500

[circuit_breaker]
cool_down_ms = 10000

[retention]
max_age_days = 1
"#,
        )
        .await
        .unwrap();

        let settings = load_settings(tmp.path()).await;
        assert_eq!(settings.executor.max_in_flight, 8);
        assert!(!settings.executor.auto_rollback);
        assert_eq!(settings.retry.strategy, BackoffStrategy::Linear);
        assert_eq!(settings.retry.base_delay_ms, 500);
        assert_eq!(settings.circuit_breaker.cool_down_ms, 10_000);
        assert_eq!(settings.retention.max_age_days, 1);
    }

    #[tokio::test]
    async fn load_settings_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let settings = load_settings(tmp.path()).await;
        assert_eq!(settings, ExecutorSettings::default());
    }

    #[tokio::test]
    async fn load_settings_applies_floors() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[executor]
max_in_flight = 0

[retry]
jitter_factor = 3.5

[retry.tiers.critical]
max_attempts = 0
delay_multiplier = 0.5
"#,
        )
        .await
        .unwrap();

        let settings = load_settings(tmp.path()).await;
        assert_eq!(settings.executor.max_in_flight, 1);
        assert_eq!(settings.retry.jitter_factor, 1.0);
        assert_eq!(settings.retry.tiers.critical.max_attempts, 1);
    }

    #[test]
    fn enforce_floors_keeps_sane_values() {
        let settings = ExecutorSettings::default();
        assert_eq!(enforce_floors(settings.clone()), settings);
    }

    #[test]
    fn resolve_data_dir_is_never_empty() {
        let dir = resolve_data_dir();
        assert!(!dir.as_os_str().is_empty());
    }
}
