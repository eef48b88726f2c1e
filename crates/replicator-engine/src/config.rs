// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;

use crate::retry::{RetryConfig, RetryStrategy};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path of the SQLite database file
    pub database_path: PathBuf,
    /// Retry policy applied to activities
    pub activity_retry: RetryConfig,
    /// Capacity of the progress event broadcast channel
    pub progress_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(".data/replicator.db"),
            activity_retry: RetryConfig::default(),
            progress_channel_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `REPLICATOR_DATABASE_PATH`: SQLite file (default: .data/replicator.db)
    /// - `REPLICATOR_ACTIVITY_MAX_RETRIES`: Retries per activity (default: 5)
    /// - `REPLICATOR_ACTIVITY_RETRY_DELAY_MS`: Base backoff delay (default: 1000)
    /// - `REPLICATOR_PROGRESS_CHANNEL_CAPACITY`: Progress stream buffer (default: 1024)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_path = std::env::var("REPLICATOR_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let max_retries: u32 = std::env::var("REPLICATOR_ACTIVITY_MAX_RETRIES")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "REPLICATOR_ACTIVITY_MAX_RETRIES",
                    "must be a non-negative integer",
                )
            })?;

        let delay_ms: u64 = std::env::var("REPLICATOR_ACTIVITY_RETRY_DELAY_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "REPLICATOR_ACTIVITY_RETRY_DELAY_MS",
                    "must be a non-negative integer",
                )
            })?;

        let progress_channel_capacity: usize =
            std::env::var("REPLICATOR_PROGRESS_CHANNEL_CAPACITY")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()
                .ok()
                .filter(|capacity| *capacity > 0)
                .ok_or(ConfigError::Invalid(
                    "REPLICATOR_PROGRESS_CHANNEL_CAPACITY",
                    "must be a positive integer",
                ))?;

        Ok(Self {
            database_path,
            activity_retry: RetryConfig::new(
                max_retries,
                delay_ms,
                RetryStrategy::ExponentialBackoff,
            ),
            progress_channel_capacity,
        })
    }

    /// Set the SQLite database path.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Set the activity retry policy.
    pub fn with_activity_retry(mut self, retry: RetryConfig) -> Self {
        self.activity_retry = retry;
        self
    }

    /// Set the progress channel capacity (minimum 1).
    pub fn with_progress_channel_capacity(mut self, capacity: usize) -> Self {
        self.progress_channel_capacity = capacity.max(1);
        self
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 4] = [
        "REPLICATOR_DATABASE_PATH",
        "REPLICATOR_ACTIVITY_MAX_RETRIES",
        "REPLICATOR_ACTIVITY_RETRY_DELAY_MS",
        "REPLICATOR_PROGRESS_CHANNEL_CAPACITY",
    ];

    fn with_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _lock = ENV_MUTEX.lock().unwrap();
        let saved: Vec<_> = VARS.iter().map(|k| (*k, env::var(k).ok())).collect();
        // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
        unsafe {
            for key in VARS {
                env::remove_var(key);
            }
            for (key, value) in vars {
                env::set_var(key, value);
            }
        }
        let result = f();
        // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
        unsafe {
            for (key, value) in saved {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
        result
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let config = with_env(&[], EngineConfig::from_env).unwrap();
        assert_eq!(config.database_path, PathBuf::from(".data/replicator.db"));
        assert_eq!(config.activity_retry.max_retries, 5);
        assert_eq!(config.activity_retry.delay_ms, 1000);
        assert_eq!(config.progress_channel_capacity, 1024);
    }

    #[test]
    fn test_config_from_env_with_overrides() {
        let config = with_env(
            &[
                ("REPLICATOR_DATABASE_PATH", "/tmp/r.db"),
                ("REPLICATOR_ACTIVITY_MAX_RETRIES", "2"),
                ("REPLICATOR_ACTIVITY_RETRY_DELAY_MS", "10"),
                ("REPLICATOR_PROGRESS_CHANNEL_CAPACITY", "8"),
            ],
            EngineConfig::from_env,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/r.db"));
        assert_eq!(config.activity_retry.max_retries, 2);
        assert_eq!(config.activity_retry.delay_ms, 10);
        assert_eq!(config.progress_channel_capacity, 8);
    }

    #[test]
    fn test_config_from_env_invalid_values() {
        let err = with_env(
            &[("REPLICATOR_ACTIVITY_MAX_RETRIES", "many")],
            EngineConfig::from_env,
        )
        .unwrap_err();
        assert!(err.to_string().contains("REPLICATOR_ACTIVITY_MAX_RETRIES"));

        let err = with_env(
            &[("REPLICATOR_PROGRESS_CHANNEL_CAPACITY", "0")],
            EngineConfig::from_env,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("REPLICATOR_PROGRESS_CHANNEL_CAPACITY", _)
        ));
    }

    #[test]
    fn test_builder_setters() {
        let config = EngineConfig::default()
            .with_database_path("x.db")
            .with_activity_retry(RetryConfig::no_retries())
            .with_progress_channel_capacity(0);
        assert_eq!(config.database_path, PathBuf::from("x.db"));
        assert_eq!(config.activity_retry.max_retries, 0);
        assert_eq!(config.progress_channel_capacity, 1);
    }
}
