//! Settlement configuration from `CARDRECON_*` environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info;

use cardrecon_core::Partner;

use crate::invocation::{BenignFailure, RetryPolicy, default_benign_failures};
use crate::jobs::JobExecutorConfig;
use crate::partner_errors::PartnerErrorTable;

pub const ENV_MAX_WORKERS: &str = "CARDRECON_MAX_WORKERS";
pub const ENV_POLL_INTERVAL_MS: &str = "CARDRECON_POLL_INTERVAL_MS";
pub const ENV_JOB_INTERVAL_SECS: &str = "CARDRECON_JOB_INTERVAL_SECS";
pub const ENV_RETRY_INTERVAL_SECS: &str = "CARDRECON_RETRY_INTERVAL_SECS";
pub const ENV_MAX_RETRIES: &str = "CARDRECON_MAX_RETRIES";
pub const ENV_INITIAL_RETRY_DELAY_MS: &str = "CARDRECON_INITIAL_RETRY_DELAY_MS";
pub const ENV_PARTNER_ERROR_TABLE: &str = "CARDRECON_PARTNER_ERROR_TABLE";
pub const ENV_SKIP_MALFORMED_RECORDS: &str = "CARDRECON_SKIP_MALFORMED_RECORDS";
pub const ENV_PARTNERS: &str = "CARDRECON_PARTNERS";
pub const ENV_REAL_TIME_PARTNERS: &str = "CARDRECON_REAL_TIME_PARTNERS";
pub const ENV_BENIGN_FAILURES: &str = "CARDRECON_BENIGN_FAILURES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid table {path}: {source}")]
    Table {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementConfig {
    pub max_workers: usize,
    pub poll_interval: Duration,
    /// Time between regular settlement runs of one partner.
    pub job_interval: Duration,
    /// Time before re-running a settlement job after a retryable failure.
    pub retry_interval: Duration,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    /// JSON partner error table; the built-in table when unset.
    pub partner_error_table: Option<PathBuf>,
    pub skip_malformed_records: bool,
    /// Partners with a scheduled settlement job.
    pub partners: Vec<Partner>,
    /// Partners taking statement credits through their API; the others get
    /// batch files.
    pub real_time_partners: Vec<Partner>,
    /// JSON list of expected partner failures logged quietly; the built-in
    /// list when unset.
    pub benign_failures: Option<PathBuf>,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval: Duration::from_millis(500),
            job_interval: Duration::from_secs(3600),
            retry_interval: Duration::from_secs(300),
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(500),
            partner_error_table: None,
            skip_malformed_records: false,
            partners: Partner::ALL.to_vec(),
            real_time_partners: vec![Partner::A, Partner::C],
            benign_failures: None,
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            max_workers: parse(&lookup, ENV_MAX_WORKERS)?.unwrap_or(defaults.max_workers),
            poll_interval: parse(&lookup, ENV_POLL_INTERVAL_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            job_interval: parse(&lookup, ENV_JOB_INTERVAL_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_interval),
            retry_interval: parse(&lookup, ENV_RETRY_INTERVAL_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_interval),
            max_retries: parse(&lookup, ENV_MAX_RETRIES)?.unwrap_or(defaults.max_retries),
            initial_retry_delay: parse(&lookup, ENV_INITIAL_RETRY_DELAY_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_retry_delay),
            partner_error_table: lookup(ENV_PARTNER_ERROR_TABLE)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            skip_malformed_records: parse(&lookup, ENV_SKIP_MALFORMED_RECORDS)?
                .unwrap_or(defaults.skip_malformed_records),
            partners: parse_partners(&lookup, ENV_PARTNERS)?.unwrap_or(defaults.partners),
            real_time_partners: parse_partners(&lookup, ENV_REAL_TIME_PARTNERS)?
                .unwrap_or(defaults.real_time_partners),
            benign_failures: lookup(ENV_BENIGN_FAILURES)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        };

        if config.max_workers == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_MAX_WORKERS,
                value: "0".to_string(),
            });
        }
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_retry_delay)
    }

    pub fn executor_config(&self) -> JobExecutorConfig {
        JobExecutorConfig::default()
            .with_name("settlement")
            .with_max_workers(self.max_workers)
            .with_poll_interval(self.poll_interval)
    }

    /// The configured partner error table, or the built-in one.
    pub fn load_partner_error_table(&self) -> Result<PartnerErrorTable, ConfigError> {
        let Some(path) = &self.partner_error_table else {
            return Ok(PartnerErrorTable::built_in());
        };
        let table: PartnerErrorTable = read_json(path)?;
        info!(path = %path.display(), version = table.version, entries = table.entries.len(), "loaded partner error table");
        Ok(table)
    }

    /// The configured benign-failure list, or the built-in one.
    pub fn load_benign_failures(&self) -> Result<Vec<BenignFailure>, ConfigError> {
        let Some(path) = &self.benign_failures else {
            return Ok(default_benign_failures());
        };
        let failures: Vec<BenignFailure> = read_json(path)?;
        info!(path = %path.display(), entries = failures.len(), "loaded benign partner failures");
        Ok(failures)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&json).map_err(|source| ConfigError::Table {
        path: path.to_path_buf(),
        source,
    })
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_partners<F>(lookup: &F, key: &'static str) -> Result<Option<Vec<Partner>>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| {
            code.parse::<Partner>().map_err(|_| ConfigError::Invalid {
                key,
                value: raw.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = SettlementConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SettlementConfig::default());
        assert_eq!(config.retry_policy(), RetryPolicy::new(3, Duration::from_millis(500)));
    }

    #[test]
    fn variables_override_defaults() {
        let config = SettlementConfig::from_lookup(lookup(&[
            (ENV_MAX_WORKERS, "8"),
            (ENV_MAX_RETRIES, " 5 "),
            (ENV_INITIAL_RETRY_DELAY_MS, "250"),
            (ENV_SKIP_MALFORMED_RECORDS, "true"),
            (ENV_PARTNERS, "pna, PND"),
        ]))
        .unwrap();

        assert_eq!(config.max_workers, 8);
        assert_eq!(config.retry_policy().max_retries, 5);
        assert_eq!(config.initial_retry_delay, Duration::from_millis(250));
        assert!(config.skip_malformed_records);
        assert_eq!(config.partners, vec![Partner::A, Partner::D]);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = SettlementConfig::from_lookup(lookup(&[(ENV_MAX_RETRIES, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_MAX_RETRIES, .. }));

        let err = SettlementConfig::from_lookup(lookup(&[(ENV_PARTNERS, "PNA,XYZ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_PARTNERS, .. }));

        let err = SettlementConfig::from_lookup(lookup(&[(ENV_MAX_WORKERS, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_MAX_WORKERS, .. }));
    }

    #[test]
    fn benign_failures_default_and_load_from_file() {
        assert_eq!(
            SettlementConfig::default().load_benign_failures().unwrap(),
            default_benign_failures()
        );

        let config = SettlementConfig::from_lookup(lookup(&[(
            ENV_BENIGN_FAILURES,
            concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/benign_failures.json"),
        )]))
        .unwrap();
        let failures = config.load_benign_failures().unwrap();
        assert!(failures.contains(&default_benign_failures()[0]));
        assert!(failures.iter().any(|f| f.partner == Partner::C && f.status == Some(503) && f.code.is_none()));
    }

    #[test]
    fn missing_table_file_is_an_io_error() {
        let config = SettlementConfig {
            partner_error_table: Some(PathBuf::from("/nonexistent/partner_errors.json")),
            ..SettlementConfig::default()
        };
        assert!(matches!(config.load_partner_error_table(), Err(ConfigError::Io { .. })));
        assert_eq!(
            SettlementConfig::default().load_partner_error_table().unwrap(),
            PartnerErrorTable::built_in()
        );
    }
}
