use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use fleetsplit_id::ScopeName;
use fleetsplit_reconcile::BackoffPolicy;

/// Settings shared by every controller the process runs.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Workers pulling keys off each controller's queue.
    pub workers: usize,
    pub backoff: BackoffPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub scopes: Vec<ScopeName>,
    pub seed_file: Option<PathBuf>,
    pub shutdown_timeout: Duration,
    pub controller: ControllerSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_level = lookup("FLEETSPLIT_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let workers: usize = lookup("FLEETSPLIT_WORKERS")
            .unwrap_or_else(|| "2".to_string())
            .parse()?;
        if workers == 0 {
            bail!("FLEETSPLIT_WORKERS must be at least 1");
        }

        let base_ms: u64 = lookup("FLEETSPLIT_BACKOFF_BASE_MS")
            .unwrap_or_else(|| "100".to_string())
            .parse()?;
        let max_ms: u64 = lookup("FLEETSPLIT_BACKOFF_MAX_MS")
            .unwrap_or_else(|| "30000".to_string())
            .parse()?;
        if max_ms < base_ms {
            bail!("FLEETSPLIT_BACKOFF_MAX_MS ({max_ms}) is below FLEETSPLIT_BACKOFF_BASE_MS ({base_ms})");
        }

        let scopes = lookup("FLEETSPLIT_SCOPES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ScopeName::parse)
            .collect::<Result<Vec<_>, _>>()?;

        let seed_file = lookup("FLEETSPLIT_SEED_FILE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let shutdown_secs: u64 = lookup("FLEETSPLIT_SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|| "10".to_string())
            .parse()?;

        Ok(Self {
            log_level,
            scopes,
            seed_file,
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            controller: ControllerSettings {
                workers,
                backoff: BackoffPolicy {
                    base: Duration::from_millis(base_ms),
                    max: Duration::from_millis(max_ms),
                    ..BackoffPolicy::default()
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.log_level, "info");
        assert!(config.scopes.is_empty());
        assert!(config.seed_file.is_none());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.controller.workers, 2);
        assert_eq!(config.controller.backoff.base, Duration::from_millis(100));
        assert_eq!(config.controller.backoff.max, Duration::from_secs(30));
    }

    #[test]
    fn test_scopes_are_trimmed_and_validated() {
        let config = config(&[("FLEETSPLIT_SCOPES", " team-a, ,team-b ")]).unwrap();
        let scopes: Vec<&str> = config.scopes.iter().map(|s| s.as_str()).collect();
        assert_eq!(scopes, vec!["team-a", "team-b"]);

        assert!(self::config(&[("FLEETSPLIT_SCOPES", "Team_A")]).is_err());
    }

    #[test]
    fn test_rejects_bad_numbers() {
        assert!(config(&[("FLEETSPLIT_WORKERS", "0")]).is_err());
        assert!(config(&[("FLEETSPLIT_WORKERS", "many")]).is_err());
        assert!(config(&[
            ("FLEETSPLIT_BACKOFF_BASE_MS", "500"),
            ("FLEETSPLIT_BACKOFF_MAX_MS", "100"),
        ])
        .is_err());
    }
}
