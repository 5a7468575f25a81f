/// Service configuration.
///
/// Loaded from a TOML file (default `aqmon.toml`). Every section and every
/// key is optional; omitted values take the defaults below. Secrets do not
/// belong in the file: `DATABASE_URL` and `PUSH_WEBHOOK_URL` from the
/// environment (or `.env`) override whatever the file says.
///
/// ```toml
/// [service]
/// source = "cnemc"
/// min_reporting_stations = 10
///
/// [aggregation]
/// o3_min_samples = 6
///
/// [push]
/// webhook_url = "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=..."
/// ```

use crate::analysis::AggregationRules;
use crate::ingest::{cnemc, moji, ConcentrationUnit, SourceKind};
use crate::model::ConfigError;
use crate::stations;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "aqmon.toml";

// ============================================================================
// TOML Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub service: ServiceSection,
    pub aggregation: AggregationRules,
    pub cnemc: CnemcConfig,
    pub moji: MojiConfig,
    pub archive: ArchiveConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    /// File holding the tag of the last pushed hour.
    pub marker_path: PathBuf,
    /// Directory rendered reports are written to.
    pub output_dir: PathBuf,
    pub log_file: Option<String>,
    pub log_level: String,
    /// Offset of local report time from UTC.
    pub utc_offset_hours: i32,
    pub source: SourceKind,
    /// Stations that must report PM2.5 at the report hour for the report
    /// to be sent.
    pub min_reporting_stations: usize,
    /// Station highlighted in the text summary.
    pub focus_station: Option<String>,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            marker_path: PathBuf::from("datetime.tag"),
            output_dir: PathBuf::from("output"),
            log_file: None,
            log_level: "info".to_string(),
            utc_offset_hours: 8,
            source: SourceKind::Cnemc,
            min_reporting_stations: 10,
            focus_station: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CnemcConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub unit: ConcentrationUnit,
}

impl Default for CnemcConfig {
    fn default() -> Self {
        Self {
            base_url: cnemc::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            unit: ConcentrationUnit::Canonical,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MojiConfig {
    pub api_host: String,
    pub timeout_secs: u64,
}

impl Default for MojiConfig {
    fn default() -> Self {
        Self {
            api_host: moji::DEFAULT_API_HOST.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub database_url: Option<String>,
    /// Store every fetched reading in the archive.
    pub store_fetched: bool,
    /// Replay offset used when `source = "archive"`.
    pub replay_days_offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl ServiceConfig {
    /// Parses configuration text without touching the environment.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, applies environment overrides and validates. A missing
    /// file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
            toml::from_str(&content).map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?
        } else {
            ServiceConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overrides secrets from `lookup` (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.archive.database_url = Some(url);
        }
        if let Some(url) = lookup("PUSH_WEBHOOK_URL").filter(|v| !v.is_empty()) {
            self.push.webhook_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aggregation.validate()?;
        if !(-12..=14).contains(&self.service.utc_offset_hours) {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_hours {} is outside -12..=14",
                self.service.utc_offset_hours
            )));
        }
        if let Some(code) = &self.service.focus_station {
            if stations::find_station(code).is_none() {
                return Err(ConfigError::Invalid(format!("focus_station '{}' is not registered", code)));
            }
        }
        if self.archive.replay_days_offset < 0 {
            return Err(ConfigError::Invalid("replay_days_offset must not be negative".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
