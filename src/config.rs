//! Runtime configuration for the offline core.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::app_error::{AppError, AppResult};

pub const ENV_DB_PATH: &str = "JOBSITE_DB_PATH";
pub const ENV_MAP_SIZE: &str = "JOBSITE_MAP_SIZE";
pub const ENV_MAX_COLLECTIONS: &str = "JOBSITE_MAX_COLLECTIONS";
pub const ENV_MAX_SYNC_RETRIES: &str = "JOBSITE_MAX_SYNC_RETRIES";
pub const ENV_DRAIN_BATCH_SIZE: &str = "JOBSITE_DRAIN_BATCH_SIZE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreConfig {
    /// Base path; the LMDB environment lives in `<db_path>.lmdb`.
    pub db_path: String,
    pub map_size_bytes: usize,
    pub max_collections: u32,
    /// Queue items that failed this many times are left for manual attention.
    pub max_sync_retries: u32,
    pub drain_batch_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: "jobsite_core".to_string(),
            map_size_bytes: 256 * 1024 * 1024,
            max_collections: 64,
            max_sync_retries: 5,
            drain_batch_size: 50,
        }
    }
}

impl CoreConfig {
    pub fn with_db_path(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Reads overrides from `JOBSITE_*` environment variables on top of the defaults.
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        let config = Self {
            db_path: env::var(ENV_DB_PATH).unwrap_or(defaults.db_path),
            map_size_bytes: parse_env(ENV_MAP_SIZE, defaults.map_size_bytes)?,
            max_collections: parse_env(ENV_MAX_COLLECTIONS, defaults.max_collections)?,
            max_sync_retries: parse_env(ENV_MAX_SYNC_RETRIES, defaults.max_sync_retries)?,
            drain_batch_size: parse_env(ENV_DRAIN_BATCH_SIZE, defaults.drain_batch_size)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> AppResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AppError::Config(format!("invalid configuration JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.db_path.trim().is_empty() {
            return Err(AppError::Config("db_path must not be empty".to_string()));
        }
        if self.map_size_bytes == 0 {
            return Err(AppError::Config("map_size_bytes must be positive".to_string()));
        }
        if self.max_collections == 0 {
            return Err(AppError::Config("max_collections must be positive".to_string()));
        }
        if self.drain_batch_size == 0 {
            return Err(AppError::Config("drain_batch_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn lmdb_dir(&self) -> PathBuf {
        PathBuf::from(format!("{}.lmdb", self.db_path))
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> AppResult<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("invalid value for {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
