use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading or validating a [`SchedulerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("tick_period_millis must be at least 1")]
    TickPeriod,
    #[error("view_distance_chunks must be at least 1, got {0}")]
    ViewDistance(i32),
    #[error("keep_alive_delay_millis must be positive, got {0}")]
    KeepAliveDelay(i64),
    #[error("keep_alive_kick_millis ({kick}) must exceed keep_alive_delay_millis ({delay})")]
    KeepAliveKick { delay: i64, kick: i64 },
    #[error("worker_threads must be at least 1")]
    WorkerThreads,
}

/// Which partition strategy the scheduler builds at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// One partition per world.
    #[default]
    PerWorld,
    /// Partitions are clusters of adjacent loaded chunks, across worlds.
    ChunkGroup,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::PerWorld => write!(f, "per_world"),
            StrategyKind::ChunkGroup => write!(f, "chunk_group"),
        }
    }
}

/// Scheduler configuration. Every field has a default, so a YAML file only
/// needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Nominal tick period.
    pub tick_period_millis: u64,
    /// Silence after which a keep-alive probe is sent.
    pub keep_alive_delay_millis: i64,
    /// Silence after which an observer is disconnected.
    pub keep_alive_kick_millis: i64,
    /// Radius of the square each viewer sees, in chunks.
    pub view_distance_chunks: i32,
    pub partition_strategy: StrategyKind,
    /// Size of the worker pool partition strategies fan out to.
    pub worker_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_period_millis: 50,
            keep_alive_delay_millis: 10_000,
            keep_alive_kick_millis: 30_000,
            view_distance_chunks: 8,
            partition_strategy: StrategyKind::PerWorld,
            worker_threads: 4,
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period_millis == 0 {
            return Err(ConfigError::TickPeriod);
        }
        if self.view_distance_chunks < 1 {
            return Err(ConfigError::ViewDistance(self.view_distance_chunks));
        }
        if self.keep_alive_delay_millis <= 0 {
            return Err(ConfigError::KeepAliveDelay(self.keep_alive_delay_millis));
        }
        if self.keep_alive_kick_millis <= self.keep_alive_delay_millis {
            return Err(ConfigError::KeepAliveKick {
                delay: self.keep_alive_delay_millis,
                kick: self.keep_alive_kick_millis,
            });
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::WorkerThreads);
        }
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick_period_millis, 50);
        assert_eq!(config.keep_alive_delay_millis, 10_000);
        assert_eq!(config.keep_alive_kick_millis, 30_000);
        assert_eq!(config.partition_strategy, StrategyKind::PerWorld);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = SchedulerConfig::from_yaml_str(
            "view_distance_chunks: 3\npartition_strategy: chunk_group\n",
        )
        .unwrap();
        assert_eq!(config.view_distance_chunks, 3);
        assert_eq!(config.partition_strategy, StrategyKind::ChunkGroup);
        assert_eq!(config.tick_period_millis, 50);
    }

    #[test]
    fn non_positive_view_distance_fails_fast() {
        let err = SchedulerConfig::from_yaml_str("view_distance_chunks: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ViewDistance(0)));
    }

    #[test]
    fn kick_must_exceed_delay() {
        let config = SchedulerConfig {
            keep_alive_kick_millis: 10_000,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::KeepAliveKick { .. })
        ));
    }

    #[test]
    fn unknown_keys_and_strategies_are_rejected() {
        assert!(matches!(
            SchedulerConfig::from_yaml_str("tick_rate: 20\n"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(
            SchedulerConfig::from_yaml_str("partition_strategy: per_thread\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn load_round_trips_through_a_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let config = SchedulerConfig {
            worker_threads: 2,
            ..SchedulerConfig::default()
        };
        std::fs::write(tmp.path(), config.to_yaml().unwrap()).unwrap();
        assert_eq!(SchedulerConfig::load(tmp.path()).unwrap(), config);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SchedulerConfig::load(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
