use std::future::pending;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::change::{ChangeReceipt, ChangeRequest, ChangeStatus, RecordTemplate};
use crate::clock::Clock;
use crate::convergence::{
    answer_matches, elapsed_since, ConvergenceResult, ConvergenceStrategy, PollPolicy,
    ReplicaMode,
};
use crate::errors::{ApiError, ProbeError};
use crate::resolve::NameResolver;
use crate::writer::{ProbeLog, ProbeLogEntry};
use crate::zone::ZoneApi;

pub struct ProbeSettings {
    pub zone_id: String,
    pub comment: Option<String>,
    pub record: RecordTemplate,
    pub strategy: ConvergenceStrategy,
    pub policy: PollPolicy,
    /// Pause between iterations.
    pub cadence: Duration,
    pub delay_first_iteration: bool,
}

/// Outcome of a single convergence check.
enum Observation {
    Pending,
    Converged(Option<ChangeStatus>),
}

/// Repeatedly mutates a record and measures how long the change takes to
/// become visible.
pub struct PropagationProbe<Z, R, C> {
    zone: Z,
    resolver: R,
    clock: C,
    log: ProbeLog,
    settings: ProbeSettings,
    cancel: CancellationToken,
    iterations: u64,
}

/// Resolves the replica host names once and builds the replica strategy.
pub async fn replica_strategy<R: NameResolver>(
    resolver: &R,
    hosts: &[String],
    mode: ReplicaMode,
) -> Result<ConvergenceStrategy, ProbeError> {
    let replicas = resolver
        .resolve_replicas(hosts)
        .await
        .map_err(ProbeError::ReplicaResolution)?;
    if replicas.is_empty() {
        return Err(ProbeError::ReplicaResolution(ApiError::fatal(
            "no replicas configured",
        )));
    }
    Ok(ConvergenceStrategy::replica_query(replicas, mode))
}

/// Resolves at `deadline`, or never without one.
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

impl<Z, R, C> PropagationProbe<Z, R, C>
where
    Z: ZoneApi,
    R: NameResolver,
    C: Clock,
{
    pub fn new(
        zone: Z,
        resolver: R,
        clock: C,
        log: ProbeLog,
        settings: ProbeSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            zone,
            resolver,
            clock,
            log,
            settings,
            cancel,
            iterations: 0,
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Not interrupted by cancellation.
    pub async fn submit_change(
        &self,
        request: &ChangeRequest,
    ) -> Result<ChangeReceipt, ProbeError> {
        self.zone
            .change_record_sets(
                &self.settings.zone_id,
                self.settings.comment.as_deref(),
                request,
            )
            .await
            .map_err(ProbeError::Submission)
    }

    pub async fn await_convergence(
        &self,
        receipt: &ChangeReceipt,
        strategy: &ConvergenceStrategy,
    ) -> Result<ConvergenceResult, ProbeError> {
        let policy = &self.settings.policy;
        let deadline = policy.timeout.map(|timeout| Instant::now() + timeout);
        let mut attempts: u32 = 0;
        let mut failures: u32 = 0;

        loop {
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                return Err(self.non_convergence(receipt, attempts));
            }

            attempts += 1;
            let observation = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ProbeError::Cancelled),
                observation = self.observe(receipt, strategy) => observation,
                _ = until(deadline) => return Err(self.non_convergence(receipt, attempts)),
            };

            let wait = match observation {
                Ok(Observation::Converged(final_status)) => {
                    let result = ConvergenceResult::new(
                        receipt,
                        final_status,
                        self.clock.now(),
                        attempts,
                    );
                    debug!(
                        "change '{}' converged at {} after {} attempts",
                        receipt.change_id, result.detected_at, attempts
                    );
                    return Ok(result);
                }
                Ok(Observation::Pending) => {
                    failures = 0;
                    policy.interval
                }
                Err(cause) if cause.is_retryable && failures < policy.max_transient_retries => {
                    failures += 1;
                    let backoff = policy.backoff(failures);
                    warn!(
                        "poll {} of change '{}' failed ({}), retrying in {:?}",
                        attempts, receipt.change_id, cause, backoff
                    );
                    backoff
                }
                Err(cause) => {
                    return Err(ProbeError::Query {
                        change_id: receipt.change_id.clone(),
                        attempts,
                        cause,
                    });
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ProbeError::Cancelled),
                _ = sleep(wait) => {}
                _ = until(deadline) => return Err(self.non_convergence(receipt, attempts)),
            }
        }
    }

    fn non_convergence(&self, receipt: &ChangeReceipt, attempts: u32) -> ProbeError {
        ProbeError::NonConvergence {
            change_id: receipt.change_id.clone(),
            submitted_at: receipt.submitted_at,
            elapsed: elapsed_since(&receipt.submitted_at, &self.clock.now()),
            timeout: self.settings.policy.timeout.unwrap_or_default(),
            attempts,
        }
    }

    pub fn record_outcome(
        &mut self,
        result: &ConvergenceResult,
        receipt: &ChangeReceipt,
    ) -> Result<ProbeLogEntry, ProbeError> {
        let entry = ProbeLogEntry::new(result, receipt);
        info!("{} ({} attempts)", entry, result.attempts);
        self.log.append(&entry)?;
        Ok(entry)
    }

    /// Builds, submits, awaits and records one change.
    pub async fn run_iteration(
        &mut self,
        counter: u64,
    ) -> Result<ConvergenceResult, ProbeError> {
        let request = self.settings.record.request_for(counter)?;
        let receipt = self.submit_change(&request).await?;
        let result = self
            .await_convergence(&receipt, &self.settings.strategy)
            .await?;
        self.record_outcome(&result, &receipt)?;
        Ok(result)
    }

    /// Loops until cancelled; only probe log write failures end it early.
    pub async fn run(&mut self) -> Result<(), ProbeError> {
        info!(
            "probing zone '{}' every {:?}, logging to {}",
            self.settings.zone_id,
            self.settings.cadence,
            self.log.path().display()
        );

        if self.settings.delay_first_iteration
            && self.pause(self.settings.cadence).await.is_err()
        {
            return Ok(());
        }

        loop {
            self.iterations += 1;
            match self.run_iteration(self.iterations).await {
                Ok(_) => {}
                Err(ProbeError::Cancelled) => break,
                Err(failure) if failure.is_iteration_failure() => {
                    error!("iteration {} failed: {}", self.iterations, failure);
                    self.log.append_failure(&failure)?;
                }
                Err(fatal) => return Err(fatal),
            }

            if self.pause(self.settings.cadence).await.is_err() {
                break;
            }
        }

        info!("probe stopped after {} iterations", self.iterations);
        Ok(())
    }

    async fn observe(
        &self,
        receipt: &ChangeReceipt,
        strategy: &ConvergenceStrategy,
    ) -> Result<Observation, ApiError> {
        match strategy {
            ConvergenceStrategy::StatusPolling => {
                let status = self.zone.get_change(&receipt.change_id).await?;
                debug!("change '{}' is {}", receipt.change_id, status);
                match status {
                    ChangeStatus::InSync => Ok(Observation::Converged(Some(status))),
                    ChangeStatus::Pending => Ok(Observation::Pending),
                }
            }
            ConvergenceStrategy::DirectReplicaQuery { .. } => {
                self.query_replicas(receipt, strategy).await
            }
        }
    }

    /// Pending unless every queried replica answers as expected; fails only
    /// when no replica could be queried at all.
    async fn query_replicas(
        &self,
        receipt: &ChangeReceipt,
        strategy: &ConvergenceStrategy,
    ) -> Result<Observation, ApiError> {
        let replicas = strategy.queried_replicas();
        if replicas.is_empty() {
            return Err(ApiError::fatal("no replicas to query"));
        }

        let target = &receipt.target;
        let answers = join_all(
            replicas
                .iter()
                .map(|replica| self.resolver.query(replica, &target.name, target.record_type)),
        )
        .await;

        let mut converged = true;
        let mut last_error = None;
        let mut failed = 0;
        for (replica, answer) in replicas.iter().zip(answers) {
            match answer {
                Ok(values) => {
                    if !answer_matches(target, &values) {
                        converged = false;
                    }
                }
                Err(error) => {
                    warn!("replica '{}' did not answer: {}", replica.host, error);
                    converged = false;
                    failed += 1;
                    last_error = Some(error);
                }
            }
        }

        if failed == replicas.len() {
            if let Some(error) = last_error {
                return Err(error);
            }
        }
        if converged {
            return Ok(Observation::Converged(None));
        }
        Ok(Observation::Pending)
    }

    async fn pause(&self, duration: Duration) -> Result<(), ProbeError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProbeError::Cancelled),
            _ = sleep(duration) => Ok(()),
        }
    }
}
