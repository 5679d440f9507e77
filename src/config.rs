//! Application-level configuration loading: session defaults, reaper cadence and data paths.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::sequencer::SequenceMode;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SHELTER_RACE_CONFIG_PATH";
/// Default location of the shelter/POI reference data.
const DEFAULT_REFERENCE_DATA_PATH: &str = "config/reference.json";
/// Lower bound for the heartbeat staleness threshold.
const MIN_HEARTBEAT_STALENESS: time::Duration = time::Duration::seconds(30);

#[derive(Debug, Clone, PartialEq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Session lifetime when the creator does not pick one.
    pub default_ttl_minutes: u32,
    /// Lobby capacity when the creator does not pick one.
    pub default_max_players: usize,
    /// Geofence radius when the creator does not pick one.
    pub default_max_distance_km: f64,
    /// Sequence length cap per player.
    pub questions_per_player: usize,
    /// Relative numeric tolerance for answers.
    pub relative_tolerance: f64,
    /// Default sequencing mode.
    pub sequence_mode: SequenceMode,
    /// Seconds between reap passes.
    pub reaper_interval_secs: u64,
    /// Seconds a finished or closed session stays readable.
    pub retention_secs: u64,
    /// Upper bound on waiting for a session lock.
    pub lock_timeout_ms: u64,
    /// Shelter/POI reference data file.
    pub reference_data_path: PathBuf,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        Self::load_from(&resolve_config_path())
    }

    /// Load the configuration stored at `path`.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => match Self::try_from(raw) {
                    Ok(app_config) => {
                        info!(
                            path = %path.display(),
                            ttl_minutes = app_config.default_ttl_minutes,
                            max_players = app_config.default_max_players,
                            max_distance_km = app_config.default_max_distance_km,
                            "loaded session defaults from config"
                        );
                        app_config
                    }
                    Err(reason) => {
                        warn!(
                            path = %path.display(),
                            reason = %reason,
                            "config values rejected; falling back to defaults"
                        );
                        Self::default()
                    }
                },
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Default session lifetime.
    pub fn default_ttl(&self) -> time::Duration {
        time::Duration::minutes(i64::from(self.default_ttl_minutes))
    }

    /// Retention window for finished and closed sessions.
    pub fn retention(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.retention_secs).unwrap_or(i64::MAX))
    }

    /// Interval between reap passes.
    pub fn reaper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reaper_interval_secs)
    }

    /// Upper bound on waiting for a session lock.
    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Heartbeat age after which a player of a session living `ttl` is considered inactive.
pub fn heartbeat_staleness(ttl: time::Duration) -> time::Duration {
    (ttl / 10_i32).max(MIN_HEARTBEAT_STALENESS)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_ttl_minutes: 90,
            default_max_players: 6,
            default_max_distance_km: 1.0,
            questions_per_player: 5,
            relative_tolerance: 0.0,
            sequence_mode: SequenceMode::Shared,
            reaper_interval_secs: 15,
            retention_secs: 300,
            lock_timeout_ms: 2000,
            reference_data_path: PathBuf::from(DEFAULT_REFERENCE_DATA_PATH),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file; absent keys keep their defaults.
struct RawConfig {
    default_ttl_minutes: Option<u32>,
    default_max_players: Option<usize>,
    default_max_distance_km: Option<f64>,
    questions_per_player: Option<usize>,
    relative_tolerance: Option<f64>,
    sequence_mode: Option<SequenceMode>,
    reaper_interval_secs: Option<u64>,
    retention_secs: Option<u64>,
    lock_timeout_ms: Option<u64>,
    reference_data_path: Option<PathBuf>,
}

impl TryFrom<RawConfig> for AppConfig {
    type Error = String;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let defaults = Self::default();
        let config = Self {
            default_ttl_minutes: raw.default_ttl_minutes.unwrap_or(defaults.default_ttl_minutes),
            default_max_players: raw.default_max_players.unwrap_or(defaults.default_max_players),
            default_max_distance_km: raw
                .default_max_distance_km
                .unwrap_or(defaults.default_max_distance_km),
            questions_per_player: raw
                .questions_per_player
                .unwrap_or(defaults.questions_per_player),
            relative_tolerance: raw.relative_tolerance.unwrap_or(defaults.relative_tolerance),
            sequence_mode: raw.sequence_mode.unwrap_or(defaults.sequence_mode),
            reaper_interval_secs: raw
                .reaper_interval_secs
                .unwrap_or(defaults.reaper_interval_secs),
            retention_secs: raw.retention_secs.unwrap_or(defaults.retention_secs),
            lock_timeout_ms: raw.lock_timeout_ms.unwrap_or(defaults.lock_timeout_ms),
            reference_data_path: raw
                .reference_data_path
                .unwrap_or(defaults.reference_data_path),
        };

        if config.default_ttl_minutes == 0 {
            return Err("default_ttl_minutes must be positive".into());
        }
        if config.default_max_players < 2 {
            return Err("default_max_players must be at least 2".into());
        }
        if !config.default_max_distance_km.is_finite() || config.default_max_distance_km <= 0.0 {
            return Err("default_max_distance_km must be positive".into());
        }
        if config.questions_per_player == 0 {
            return Err("questions_per_player must be positive".into());
        }
        if !(0.0..1.0).contains(&config.relative_tolerance) {
            return Err("relative_tolerance must be within [0, 1)".into());
        }
        if config.reaper_interval_secs == 0 || config.lock_timeout_ms == 0 {
            return Err("reaper_interval_secs and lock_timeout_ms must be positive".into());
        }
        Ok(config)
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("shelter-race-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = AppConfig::load_from(Path::new("/definitely/not/here.json"));
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.default_ttl(), time::Duration::minutes(90));
    }

    #[test]
    fn file_overrides_only_the_keys_it_sets() {
        let path = write_temp(r#"{ "default_max_players": 4, "default_max_distance_km": 0.5 }"#);
        let config = AppConfig::load_from(&path);
        fs::remove_file(&path).ok();

        assert_eq!(config.default_max_players, 4);
        assert_eq!(config.default_max_distance_km, 0.5);
        assert_eq!(config.default_ttl_minutes, 90);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        for contents in [r#"{ "default_max_players": 1 }"#, "not json"] {
            let path = write_temp(contents);
            let config = AppConfig::load_from(&path);
            fs::remove_file(&path).ok();
            assert_eq!(config, AppConfig::default());
        }
    }

    #[test]
    fn staleness_is_a_tenth_of_ttl_with_a_floor() {
        assert_eq!(
            heartbeat_staleness(time::Duration::minutes(90)),
            time::Duration::minutes(9)
        );
        assert_eq!(
            heartbeat_staleness(time::Duration::minutes(1)),
            time::Duration::seconds(30)
        );
    }
}
