use aws_config::meta::region::RegionProviderChain;
use aws_types::{region::Region, SdkConfig};
use serde::{Deserialize, Serialize};
use std::{fs, io, path::PathBuf, time::Duration};
use validator::{Validate, ValidationError};

use crate::change::{is_valid_domain_name, RecordTemplate};
use crate::convergence::{PollPolicy, ReplicaMode};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("File {0} not found")]
    FileNotFound(String),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Validation errors: {0}")]
    ValidationError(String),

    #[error("Unknown error occurred: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Status,
    Replica,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_probe_config"))]
pub struct ProbeConfig {
    #[validate(length(min = 1))]
    pub zone_id: String,

    pub region: Option<String>,

    pub comment: Option<String>,

    #[validate]
    pub record: RecordTemplate,

    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,

    /// Authoritative name server host names, queried by the replica strategy.
    #[serde(default)]
    pub replicas: Vec<String>,

    #[serde(default = "default_replica_mode")]
    pub replica_mode: ReplicaMode,

    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,

    pub timeout_secs: Option<u64>,

    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    #[validate(range(min = 1))]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    #[serde(default)]
    pub delay_first_iteration: bool,
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Status
}

fn default_replica_mode() -> ReplicaMode {
    ReplicaMode::All
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_transient_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

fn default_cadence_secs() -> u64 {
    30
}

fn default_log_file() -> PathBuf {
    PathBuf::from("proptime.log")
}

impl ProbeConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: self.timeout_secs.map(Duration::from_secs),
            max_transient_retries: self.max_transient_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_secs)
    }
}

pub fn parse(path: &PathBuf) -> Result<ProbeConfig, Error> {
    let contents = match fs::read_to_string(path) {
        Ok(raw_contents) => Ok(raw_contents),
        Err(error) => match error.kind() {
            io::ErrorKind::NotFound => Err(Error::FileNotFound(path.display().to_string())),
            _ => Err(Error::Unknown(error.to_string())),
        },
    }?;

    let config: ProbeConfig = match serde_yaml::from_str(&contents) {
        Ok(data) => Ok(data),
        Err(error) => Err(Error::ParsingError(error.to_string())),
    }?;

    match config.validate() {
        Ok(_) => (),
        Err(error) => return Err(Error::ValidationError(error.to_string())),
    }

    return Ok(config);
}

/// Shared AWS configuration; falls back to the default region provider chain.
pub async fn sdk_config(region: Option<String>) -> SdkConfig {
    let region_provider = RegionProviderChain::first_try(region.map(Region::new))
        .or_default_provider();

    aws_config::from_env().region(region_provider).load().await
}

fn validate_probe_config(config: &ProbeConfig) -> Result<(), ValidationError> {
    if config.strategy == StrategyKind::Replica && config.replicas.is_empty() {
        return Err(ValidationError::new(
            "The replica strategy needs at least one replica",
        ));
    }
    if config.replicas.iter().any(|host| !is_valid_domain_name(host)) {
        return Err(ValidationError::new(
            "Replica host names have to be valid domain names",
        ));
    }
    if config.backoff_max_ms < config.backoff_base_ms {
        return Err(ValidationError::new(
            "`backoff_max_ms` cannot be lower than `backoff_base_ms`",
        ));
    }

    return Ok(());
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::parse;
    use super::Error;
    use super::StrategyKind;
    use crate::change::{ChangeAction, RecordType};
    use crate::convergence::ReplicaMode;
    use tempfile::tempdir;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("probe.yaml");

        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "{}", contents).unwrap();
        (dir, file_path)
    }

    #[test]
    fn file_does_not_exist() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("probe.yaml");

        let result = parse(&file_path);
        assert_eq!(true, result.is_err());
        match result.err().unwrap() {
            Error::FileNotFound(_) => {}
            _ => panic!("Expected `FileNotFound` error"),
        }
    }

    #[test]
    fn file_wrong_format() {
        let (_dir, file_path) = write_config("Not yaml");

        let result = parse(&file_path);
        assert_eq!(true, result.is_err());
        match result.err().unwrap() {
            Error::ParsingError(_) => {}
            _ => panic!("Expected `ParsingError` error"),
        }
    }

    #[test]
    fn file_empty_zone_id() {
        let (_dir, file_path) = write_config(
            "zone_id: ''\nrecord:\n  name: www.example.com\n  type: A\n  values: [1.1.1.1]\n",
        );

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn file_invalid_record_name() {
        let (_dir, file_path) = write_config(
            "zone_id: Z1FKJAMHMERS1R\nrecord:\n  name: not a name\n  type: A\n  values: [1.1.1.1]\n",
        );

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn replica_strategy_without_replicas() {
        let (_dir, file_path) = write_config(
            "zone_id: Z3JNDBS8LPKXRY\nstrategy: replica\nrecord:\n  name: '{n}.testing.example.com'\n  type: A\n  values: [1.1.1.1]\n",
        );

        let result = parse(&file_path);
        match result.err().unwrap() {
            Error::ValidationError(_) => {}
            _ => panic!("Expected `ValidationError` error"),
        }
    }

    #[test]
    fn parses_the_config_with_defaults() {
        let (_dir, file_path) = write_config(
            "zone_id: Z1FKJAMHMERS1R\nrecord:\n  name: www.example.com\n  type: A\n  values: [1.1.1.1]\n",
        );

        let config = parse(&file_path).unwrap();
        assert_eq!("Z1FKJAMHMERS1R", config.zone_id);
        assert_eq!(None, config.region);
        assert_eq!(StrategyKind::Status, config.strategy);
        assert_eq!(ReplicaMode::All, config.replica_mode);
        assert_eq!(ChangeAction::Upsert, config.record.action);
        assert_eq!(60, config.record.ttl);
        assert_eq!(Duration::from_secs(30), config.cadence());
        assert_eq!(PathBuf::from("proptime.log"), config.log_file);

        let policy = config.poll_policy();
        assert_eq!(Duration::from_millis(500), policy.interval);
        assert_eq!(None, policy.timeout);
        assert_eq!(3, policy.max_transient_retries);
    }

    #[test]
    fn parses_the_replica_config() {
        let (_dir, file_path) = write_config(
            r#"
zone_id: Z3JNDBS8LPKXRY
region: ap-southeast-2
strategy: replica
replica_mode: single
replicas:
  - ns-624.awsdns-14.net
record:
  name: "{n}.testing.example.com"
  type: AAAA
  ttl: 300
  values: ["2001:db8::1"]
  action: CREATE
timeout_secs: 60
cadence_secs: 5
"#,
        );

        let config = parse(&file_path).unwrap();
        assert_eq!(Some(String::from("ap-southeast-2")), config.region);
        assert_eq!(StrategyKind::Replica, config.strategy);
        assert_eq!(ReplicaMode::Single, config.replica_mode);
        assert_eq!(vec![String::from("ns-624.awsdns-14.net")], config.replicas);
        assert_eq!(RecordType::Aaaa, config.record.record_type);
        assert_eq!(ChangeAction::Create, config.record.action);
        assert_eq!(300, config.record.ttl);
        assert_eq!(Some(Duration::from_secs(60)), config.poll_policy().timeout);
    }
}
