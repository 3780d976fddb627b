//! Engine configuration: consolidation thresholds, collaborator timeouts, worker pool size.

use anyhow::Result;
use std::env;
use std::time::Duration;

/// Settings for [`SessionCoordinator`](crate::SessionCoordinator) and the components it drives.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TAVERN_MICRO_THRESHOLD: pending messages that trigger a MICRO summary.
    pub micro_threshold: usize,
    /// TAVERN_MACRO_THRESHOLD: unfolded MICRO nodes that trigger a MACRO merge.
    pub macro_threshold: usize,
    /// TAVERN_COLLABORATOR_TIMEOUT_SECS: limit for one summarizer or embedder call.
    pub collaborator_timeout: Duration,
    /// TAVERN_SNAPSHOT_TIMEOUT_SECS: limit for one snapshot commit.
    pub snapshot_timeout: Duration,
    /// TAVERN_MAX_WORKERS: conversation jobs running at the same time.
    pub max_workers: usize,
    /// TAVERN_SAGA_ENABLED: write a saga chapter after each MACRO node.
    pub saga_enabled: bool,
    /// TAVERN_WORKER_IDLE_SECS: a conversation worker with an empty queue for this long exits.
    pub worker_idle_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            micro_threshold: 5,
            macro_threshold: 10,
            collaborator_timeout: Duration::from_secs(60),
            snapshot_timeout: Duration::from_secs(10),
            max_workers: 4,
            saga_enabled: true,
            worker_idle_timeout: Duration::from_secs(300),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} is not a valid value: {}", key, raw)),
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    /// Load from environment variables; unset keys keep their defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            micro_threshold: env_parse("TAVERN_MICRO_THRESHOLD")?
                .unwrap_or(defaults.micro_threshold),
            macro_threshold: env_parse("TAVERN_MACRO_THRESHOLD")?
                .unwrap_or(defaults.macro_threshold),
            collaborator_timeout: env_parse("TAVERN_COLLABORATOR_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.collaborator_timeout),
            snapshot_timeout: env_parse("TAVERN_SNAPSHOT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.snapshot_timeout),
            max_workers: env_parse("TAVERN_MAX_WORKERS")?.unwrap_or(defaults.max_workers),
            saga_enabled: env_parse("TAVERN_SAGA_ENABLED")?.unwrap_or(defaults.saga_enabled),
            worker_idle_timeout: env_parse("TAVERN_WORKER_IDLE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.worker_idle_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.micro_threshold == 0 {
            anyhow::bail!("TAVERN_MICRO_THRESHOLD must be at least 1");
        }
        if self.macro_threshold == 0 {
            anyhow::bail!("TAVERN_MACRO_THRESHOLD must be at least 1");
        }
        if self.max_workers == 0 {
            anyhow::bail!("TAVERN_MAX_WORKERS must be at least 1");
        }
        if self.collaborator_timeout.is_zero()
            || self.snapshot_timeout.is_zero()
            || self.worker_idle_timeout.is_zero()
        {
            anyhow::bail!("timeouts must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.micro_threshold, 5);
        assert_eq!(config.macro_threshold, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let config = EngineConfig {
            micro_threshold: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
