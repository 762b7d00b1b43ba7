//! Analysis configuration
//!
//! Resolution order, highest priority first:
//! 1. Environment variables (`ADGRAPH_*`)
//! 2. TOML config file
//! 3. Compiled defaults

use crate::database::{
    Database, FLAG_ADCS_ENABLED, FLAG_CITRIX_RDP_SUPPORT, FLAG_NTLM_POST_PROCESSING, FLAG_TIERING_ENABLED,
};
use crate::errors::{AnalysisError, Result};
use crate::parallel_executor::ParallelConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub const ENV_PREFIX: &str = "ADGRAPH_";

/// Feature flag values written to the relational store on first run.
/// Flags already present in the store are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagSeed {
    pub tiering_enabled: Option<bool>,
    pub adcs_enabled: Option<bool>,
    pub ntlm_post_processing: Option<bool>,
    pub citrix_rdp_support: Option<bool>,
}

impl FlagSeed {
    fn entries(&self) -> [(&'static str, Option<bool>); 4] {
        [
            (FLAG_TIERING_ENABLED, self.tiering_enabled),
            (FLAG_ADCS_ENABLED, self.adcs_enabled),
            (FLAG_NTLM_POST_PROCESSING, self.ntlm_post_processing),
            (FLAG_CITRIX_RDP_SUPPORT, self.citrix_rdp_support),
        ]
    }

    /// Seeds unset flags; returns how many were written
    pub fn apply(&self, database: &Database) -> Result<usize> {
        let mut seeded = 0;
        for (key, value) in self.entries() {
            if let Some(enabled) = value {
                if database.seed_feature_flag(key, enabled)? {
                    info!("Seeded feature flag {} = {}", key, enabled);
                    seeded += 1;
                }
            }
        }
        Ok(seeded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Directory for daily rolling log files; console only when unset
    pub log_dir: Option<PathBuf>,
    pub database_path: PathBuf,
    /// Worker pool size
    pub max_concurrency: usize,
    /// Timeout for each unit of work inside a pass
    pub pass_timeout_secs: u64,
    /// Deadline for the whole run
    pub analysis_timeout_secs: Option<u64>,
    pub batch_size: usize,
    pub disable_analysis: bool,
    pub flags: FlagSeed,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            database_path: PathBuf::from("adgraph.db"),
            max_concurrency: 5,
            pass_timeout_secs: 300,
            analysis_timeout_secs: None,
            batch_size: 100,
            disable_analysis: false,
            flags: FlagSeed::default(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AnalysisError::ConfigError(format!("{}{} has an invalid value '{}'", ENV_PREFIX, key, value)))
}

impl AnalysisConfig {
    /// Defaults, then the optional file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::ConfigError(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Applies overrides from `lookup`, keyed by the variable name without the prefix
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("LOG_LEVEL") {
            self.log_level = value;
        }
        if let Some(value) = lookup("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("DATABASE_PATH") {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("MAX_CONCURRENCY") {
            self.max_concurrency = parse_env("MAX_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("PASS_TIMEOUT_SECS") {
            self.pass_timeout_secs = parse_env("PASS_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("ANALYSIS_TIMEOUT_SECS") {
            self.analysis_timeout_secs = Some(parse_env("ANALYSIS_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("BATCH_SIZE") {
            self.batch_size = parse_env("BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("DISABLE_ANALYSIS") {
            self.disable_analysis = parse_env("DISABLE_ANALYSIS", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(AnalysisError::ConfigError("max_concurrency must be greater than 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(AnalysisError::ConfigError("batch_size must be greater than 0".to_string()));
        }
        if self.pass_timeout_secs == 0 {
            return Err(AnalysisError::ConfigError("pass_timeout_secs must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn parallel_config(&self) -> ParallelConfig {
        ParallelConfig {
            max_concurrency: self.max_concurrency,
            operation_timeout: Duration::from_secs(self.pass_timeout_secs),
            batch_size: self.batch_size,
        }
    }

    pub fn analysis_timeout(&self) -> Option<Duration> {
        self.analysis_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.database_path, PathBuf::from("adgraph.db"));
        assert_eq!(config.max_concurrency, 5);
        assert_eq!(config.pass_timeout_secs, 300);
        assert_eq!(config.batch_size, 100);
        assert!(config.log_dir.is_none());
        assert!(config.analysis_timeout_secs.is_none());
        assert!(!config.disable_analysis);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalysisConfig::from_toml(
            r#"
            max_concurrency = 8
            analysis_timeout_secs = 600

            [flags]
            adcs_enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.analysis_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.flags.adcs_enabled, Some(true));
        assert_eq!(config.flags.tiering_enabled, None);
    }

    #[test]
    fn test_invalid_toml() {
        let err = AnalysisConfig::from_toml("max_concurrency = \"many\"").unwrap_err();
        assert!(matches!(err, AnalysisError::ConfigError(_) | AnalysisError::ParseError(_)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [("BATCH_SIZE", "25"), ("LOG_LEVEL", "debug"), ("DISABLE_ANALYSIS", "true")]
            .into_iter()
            .collect();
        let mut config = AnalysisConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.log_level, "debug");
        assert!(config.disable_analysis);
        assert_eq!(config.parallel_config().batch_size, 25);
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut config = AnalysisConfig::default();
        let result = config.apply_overrides(|key| (key == "MAX_CONCURRENCY").then(|| "lots".to_string()));
        assert!(matches!(result, Err(AnalysisError::ConfigError(_))));
    }

    #[test]
    fn test_validate() {
        let config = AnalysisConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_flag_seed_does_not_overwrite() {
        let database = Database::open_in_memory().unwrap();
        database.set_feature_flag(FLAG_ADCS_ENABLED, false).unwrap();

        let seed = FlagSeed {
            adcs_enabled: Some(true),
            ntlm_post_processing: Some(true),
            ..Default::default()
        };
        assert_eq!(seed.apply(&database).unwrap(), 1);

        let flags = database.feature_flags().unwrap();
        assert!(!flags.adcs_enabled);
        assert!(flags.ntlm_post_processing);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adgraph.toml");
        std::fs::write(&path, "batch_size = 10\nlog_level = \"warn\"\n").unwrap();
        let config = AnalysisConfig::from_file(&path).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.log_level, "warn");
        assert!(AnalysisConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
