use std::{net::IpAddr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::{ChangeAction, ChangeReceipt, ChangeStatus, RecordTarget};

/// Authoritative name server serving the probed zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub host: String,
    pub addr: IpAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaMode {
    /// Every replica must answer with the expected values.
    All,
    /// Only the first configured replica is queried.
    Single,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConvergenceStrategy {
    /// Ask the provider for the change status until it reports INSYNC.
    StatusPolling,
    /// Query the replicas directly for the record.
    DirectReplicaQuery {
        replicas: Vec<Replica>,
        mode: ReplicaMode,
    },
}

impl ConvergenceStrategy {
    pub fn replica_query(replicas: Vec<Replica>, mode: ReplicaMode) -> Self {
        ConvergenceStrategy::DirectReplicaQuery { replicas, mode }
    }

    /// Replicas queried on every poll.
    pub fn queried_replicas(&self) -> &[Replica] {
        match self {
            ConvergenceStrategy::StatusPolling => &[],
            ConvergenceStrategy::DirectReplicaQuery { replicas, mode } => match mode {
                ReplicaMode::All => replicas,
                ReplicaMode::Single => &replicas[..replicas.len().min(1)],
            },
        }
    }
}

/// Timing of the convergence loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    pub max_transient_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            timeout: None,
            max_transient_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
        }
    }
}

impl PollPolicy {
    /// Wait before the retry following the `failures`-th consecutive failure.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1 << exponent)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceResult {
    /// Last status reported by the provider; `None` for replica queries.
    pub final_status: Option<ChangeStatus>,
    pub detected_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl ConvergenceResult {
    pub fn new(
        receipt: &ChangeReceipt,
        final_status: Option<ChangeStatus>,
        detected_at: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            final_status,
            detected_at,
            elapsed: elapsed_since(&receipt.submitted_at, &detected_at),
            attempts,
        }
    }
}

/// Clamped at zero when the local clock lags the provider's.
pub fn elapsed_since(submitted_at: &DateTime<Utc>, now: &DateTime<Utc>) -> Duration {
    now.signed_duration_since(*submitted_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Whether one replica's answer set shows the change.
///
/// Deletions are visible once the record is gone; everything else needs a
/// non-empty answer equal to the submitted values.
pub fn answer_matches(target: &RecordTarget, answers: &[String]) -> bool {
    if target.action == ChangeAction::Delete {
        return answers.is_empty();
    }
    if answers.is_empty() {
        return false;
    }

    let case_insensitive = target.record_type.is_case_insensitive();
    let mut expected: Vec<String> = target
        .values
        .iter()
        .map(|value| normalize(value, case_insensitive))
        .collect();
    let mut actual: Vec<String> = answers
        .iter()
        .map(|value| normalize(value, case_insensitive))
        .collect();
    expected.sort();
    expected.dedup();
    actual.sort();
    actual.dedup();

    expected == actual
}

fn normalize(value: &str, case_insensitive: bool) -> String {
    let value = value.trim();
    let value = value.strip_suffix('.').unwrap_or(value);
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    if case_insensitive {
        value.to_ascii_lowercase()
    } else {
        value.to_string()
    }
}
