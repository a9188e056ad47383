use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SyncError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub statuses: StatusConfig,
    #[serde(default)]
    pub zone: ZoneConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshConfig {
    pub interval_minutes: u64,
    /// Cold-start downloads ignore stories older than this.
    pub cold_start_months: u32,
    pub hash_batch_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusConfig {
    pub chunk_size: usize,
    pub throttled_chunk_size: usize,
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneConfig {
    pub zone_name: String,
    pub max_records_per_request: usize,
    pub compression_level: i32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.newsblur.com".to_string(),
            username: None,
            request_timeout_seconds: 30,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            cold_start_months: 3,
            hash_batch_limit: 100,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            throttled_chunk_size: 1,
            max_in_flight: 8,
        }
    }
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            zone_name: "Articles".to_string(),
            max_records_per_request: 400,
            compression_level: 3,
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    /// Oldest publication date a cold-start download still applies.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(self.cold_start_months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl SyncConfig {
    /// Directory holding the configuration and the persisted account state.
    pub fn config_dir() -> Result<PathBuf, SyncError> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            SyncError::InvalidParameter("no configuration directory on this platform".into())
        })?;
        Ok(config_dir.join("feedsync"))
    }

    pub fn config_file_path() -> Result<PathBuf, SyncError> {
        let dir = Self::config_dir()?;
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join("config.json"))
    }

    /// Loads the configuration, or writes and returns the defaults.
    pub fn load() -> Self {
        match Self::config_file_path().and_then(|path| Self::load_from_file(&path)) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "failed to load configuration, using defaults");
                let default_config = Self::default();
                if let Err(save_err) = default_config.save() {
                    warn!(error = %save_err, "failed to save default configuration");
                }
                default_config
            }
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path)?;
        let config: SyncConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), SyncError> {
        self.save_to_file(&Self::config_file_path()?)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), SyncError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.statuses.chunk_size == 0 || self.statuses.throttled_chunk_size == 0 {
            return Err(SyncError::InvalidParameter("status chunk sizes must be positive".into()));
        }
        if self.statuses.max_in_flight == 0 {
            return Err(SyncError::InvalidParameter("max_in_flight must be positive".into()));
        }
        if self.refresh.hash_batch_limit == 0 {
            return Err(SyncError::InvalidParameter("hash_batch_limit must be positive".into()));
        }
        if self.zone.max_records_per_request == 0 {
            return Err(SyncError::InvalidParameter(
                "max_records_per_request must be positive".into(),
            ));
        }
        Ok(())
    }
}
