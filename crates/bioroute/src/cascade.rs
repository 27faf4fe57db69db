//! Fallback cascade: concurrent execution of the selected backends.
//!
//! Every shortlisted backend is dispatched at once (tiers do not gate each
//! other); each call carries its own timeout keyed by tier. The join is a
//! settle-all barrier: we wait for every dispatched call to succeed, fail,
//! or time out before aggregating. Individual failures are recorded and
//! never propagated. Only the total absence of successes arms the
//! emergency tier, which cannot fail.
//!
//! Cancellation is cooperative: dropping the `execute` future drops the
//! JoinSet, which aborts all in-flight backend calls.

use crate::backend::{ClassifyParams, ClassifyResponse, SequenceRecord, Tier};
use crate::consensus::BackendVote;
use crate::emergency::{self, EMERGENCY_BACKEND_ID};
use crate::error::BackendError;
use crate::registry::BackendRegistry;
use crate::selector::ScoredBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub remote_timeout: Duration,
    pub database_timeout: Duration,
    pub local_timeout: Duration,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(45),
            database_timeout: Duration::from_secs(30),
            local_timeout: Duration::from_secs(15),
        }
    }
}

impl CascadeConfig {
    fn timeout_for(&self, tier: Tier) -> Duration {
        match tier {
            Tier::PrimaryRemote | Tier::SecondaryRemote => self.remote_timeout,
            Tier::Database => self.database_timeout,
            Tier::Local | Tier::Emergency => self.local_timeout,
        }
    }
}

/// Tagged outcome of one backend invocation. No exceptions-as-control-flow:
/// failures are data, folded by the consensus step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum AttemptOutcome {
    Success { response: ClassifyResponse },
    Failure { error: BackendError },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }
}

/// One backend invocation within a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub backend_id: String,
    pub tier: Tier,
    pub duration_ms: u64,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    pub succeeded: usize,
    pub failed: usize,
}

/// Everything that happened while executing one request's cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub attempts: Vec<ExecutionAttempt>,
    pub remote: TierStats,
    pub database: TierStats,
    pub local: TierStats,
    pub elapsed_ms: u64,
    pub emergency_used: bool,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> usize {
        self.attempts.iter().filter(|a| a.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempts.len() - self.succeeded()
    }
}

pub struct FallbackCascade {
    registry: Arc<BackendRegistry>,
    config: CascadeConfig,
}

impl FallbackCascade {
    pub fn new(registry: Arc<BackendRegistry>, config: CascadeConfig) -> Self {
        Self { registry, config }
    }

    /// Run the shortlist concurrently and collect every settled outcome.
    /// Returns the successful votes (emergency vote included when all
    /// learned backends failed) plus the execution report.
    pub async fn execute(
        &self,
        shortlist: &[ScoredBackend],
        sequences: Arc<Vec<SequenceRecord>>,
        task: &str,
        params: &ClassifyParams,
    ) -> (Vec<BackendVote>, ExecutionReport) {
        let start = Instant::now();
        let mut join_set: JoinSet<(usize, Tier, u64, Result<ClassifyResponse, BackendError>)> =
            JoinSet::new();

        // Dispatch everything at once; each call owns its timeout.
        for scored in shortlist {
            let Some(backend) = self.registry.get(&scored.descriptor.id) else {
                warn!(backend = %scored.descriptor.id, "shortlisted backend missing from registry");
                continue;
            };
            let reg_index = self
                .registry
                .registration_index(&scored.descriptor.id)
                .unwrap_or(usize::MAX);
            let tier = scored.descriptor.tier;
            let timeout = self.config.timeout_for(tier);
            let sequences = Arc::clone(&sequences);
            let task = task.to_string();
            let params = params.clone();

            join_set.spawn(async move {
                let call_start = Instant::now();
                let result =
                    match tokio::time::timeout(timeout, backend.classify(&sequences, &task, &params))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(BackendError::Timeout {
                            elapsed_ms: call_start.elapsed().as_millis() as u64,
                        }),
                    };
                (reg_index, tier, call_start.elapsed().as_millis() as u64, result)
            });
        }

        // Settle-all barrier: every dispatched call resolves before we vote.
        let mut settled: Vec<(usize, Tier, u64, Result<ClassifyResponse, BackendError>)> =
            Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => settled.push(outcome),
                Err(e) => warn!("backend task join error: {}", e),
            }
        }
        // Deterministic report order regardless of completion order.
        settled.sort_by_key(|(reg_index, ..)| *reg_index);

        let mut attempts = Vec::new();
        let mut votes = Vec::new();
        let mut remote = TierStats::default();
        let mut database = TierStats::default();
        let mut local = TierStats::default();

        for (reg_index, tier, duration_ms, result) in settled {
            let descriptor = self
                .registry
                .iter()
                .nth(reg_index)
                .map(|b| b.descriptor().clone());
            let Some(descriptor) = descriptor else { continue };

            let stats = match tier.category() {
                "remote" => &mut remote,
                "database" => &mut database,
                _ => &mut local,
            };

            match result {
                Ok(response) => {
                    stats.succeeded += 1;
                    debug!(backend = %descriptor.id, %tier, duration_ms, "backend succeeded");
                    attempts.push(ExecutionAttempt {
                        backend_id: descriptor.id.clone(),
                        tier,
                        duration_ms,
                        outcome: AttemptOutcome::Success {
                            response: response.clone(),
                        },
                    });
                    votes.push(BackendVote {
                        descriptor,
                        registration_index: reg_index,
                        response,
                    });
                }
                Err(error) => {
                    stats.failed += 1;
                    warn!(backend = %descriptor.id, %tier, duration_ms, error = %error, "backend failed");
                    attempts.push(ExecutionAttempt {
                        backend_id: descriptor.id,
                        tier,
                        duration_ms,
                        outcome: AttemptOutcome::Failure { error },
                    });
                }
            }
        }

        // Total cascade failure: the emergency tier answers from sequence
        // statistics alone. Flagged, never erroring.
        let emergency_used = votes.is_empty();
        if emergency_used {
            info!(task, "all backends failed, emergency heuristic engaged");
            let call_start = Instant::now();
            let response = emergency::classify_heuristic(&sequences);
            attempts.push(ExecutionAttempt {
                backend_id: EMERGENCY_BACKEND_ID.to_string(),
                tier: Tier::Emergency,
                duration_ms: call_start.elapsed().as_millis() as u64,
                outcome: AttemptOutcome::Success {
                    response: response.clone(),
                },
            });
            votes.push(BackendVote {
                descriptor: crate::backend::BackendDescriptor::new(
                    EMERGENCY_BACKEND_ID,
                    Tier::Emergency,
                    1.0,
                ),
                registration_index: usize::MAX,
                response,
            });
        }

        let report = ExecutionReport {
            attempts,
            remote,
            database,
            local,
            elapsed_ms: start.elapsed().as_millis() as u64,
            emergency_used,
        };

        (votes, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendDescriptor, FakeBackend};
    use crate::selector::{ScoreBreakdown, ScoredBackend};

    fn scored(desc: &BackendDescriptor) -> ScoredBackend {
        ScoredBackend {
            descriptor: desc.clone(),
            score: 80.0,
            breakdown: ScoreBreakdown::default(),
        }
    }

    fn test_config() -> CascadeConfig {
        CascadeConfig {
            remote_timeout: Duration::from_millis(100),
            database_timeout: Duration::from_millis(100),
            local_timeout: Duration::from_millis(100),
        }
    }

    fn sequences() -> Arc<Vec<SequenceRecord>> {
        Arc::new(vec![SequenceRecord::new("s1", "ACGT".repeat(50))])
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let d1 = BackendDescriptor::new("r1", Tier::PrimaryRemote, 0.4)
            .with_capabilities(&["t"]);
        let d2 = BackendDescriptor::new("l1", Tier::Local, 0.3).with_capabilities(&["t"]);
        let registry = Arc::new(
            BackendRegistry::builder()
                .register(Arc::new(FakeBackend::succeeding(d1.clone(), "A", 0.9)))
                .register(Arc::new(FakeBackend::succeeding(d2.clone(), "B", 0.8)))
                .build()
                .unwrap(),
        );
        let cascade = FallbackCascade::new(registry, test_config());

        let (votes, report) = cascade
            .execute(
                &[scored(&d1), scored(&d2)],
                sequences(),
                "t",
                &ClassifyParams::default(),
            )
            .await;

        assert_eq!(votes.len(), 2);
        assert!(!report.emergency_used);
        assert_eq!(report.remote.succeeded, 1);
        assert_eq!(report.local.succeeded, 1);
        assert_eq!(report.succeeded(), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_others() {
        let d1 = BackendDescriptor::new("r1", Tier::PrimaryRemote, 0.4)
            .with_capabilities(&["t"]);
        let d2 = BackendDescriptor::new("l1", Tier::Local, 0.3).with_capabilities(&["t"]);
        let registry = Arc::new(
            BackendRegistry::builder()
                .register(Arc::new(FakeBackend::failing(
                    d1.clone(),
                    BackendError::Unavailable("down".into()),
                )))
                .register(Arc::new(FakeBackend::succeeding(d2.clone(), "B", 0.8)))
                .build()
                .unwrap(),
        );
        let cascade = FallbackCascade::new(registry, test_config());

        let (votes, report) = cascade
            .execute(
                &[scored(&d1), scored(&d2)],
                sequences(),
                "t",
                &ClassifyParams::default(),
            )
            .await;

        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].descriptor.id, "l1");
        assert!(!report.emergency_used);
        assert_eq!(report.remote.failed, 1);
        assert_eq!(report.local.succeeded, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_as_failure() {
        let d1 = BackendDescriptor::new("slow", Tier::Local, 0.3).with_capabilities(&["t"]);
        let d2 = BackendDescriptor::new("fast", Tier::Local, 0.3).with_capabilities(&["t"]);
        let registry = Arc::new(
            BackendRegistry::builder()
                .register(Arc::new(
                    FakeBackend::succeeding(d1.clone(), "A", 0.9)
                        .with_delay(Duration::from_secs(5)),
                ))
                .register(Arc::new(FakeBackend::succeeding(d2.clone(), "B", 0.8)))
                .build()
                .unwrap(),
        );
        let cascade = FallbackCascade::new(registry, test_config());

        let (votes, report) = cascade
            .execute(
                &[scored(&d1), scored(&d2)],
                sequences(),
                "t",
                &ClassifyParams::default(),
            )
            .await;

        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].descriptor.id, "fast");
        let slow_attempt = report
            .attempts
            .iter()
            .find(|a| a.backend_id == "slow")
            .unwrap();
        match &slow_attempt.outcome {
            AttemptOutcome::Failure { error } => assert_eq!(error.code(), "timeout"),
            _ => panic!("expected timeout failure"),
        }
    }

    #[tokio::test]
    async fn test_total_failure_engages_emergency() {
        let d1 = BackendDescriptor::new("r1", Tier::PrimaryRemote, 0.4)
            .with_capabilities(&["t"]);
        let registry = Arc::new(
            BackendRegistry::builder()
                .register(Arc::new(FakeBackend::failing(
                    d1.clone(),
                    BackendError::Unavailable("down".into()),
                )))
                .build()
                .unwrap(),
        );
        let cascade = FallbackCascade::new(registry, test_config());

        let (votes, report) = cascade
            .execute(&[scored(&d1)], sequences(), "t", &ClassifyParams::default())
            .await;

        assert!(report.emergency_used);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].descriptor.id, EMERGENCY_BACKEND_ID);
        assert_eq!(votes[0].descriptor.tier, Tier::Emergency);
        assert_eq!(votes[0].response.predictions.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_shortlist_still_answers() {
        let registry = Arc::new(BackendRegistry::builder().build().unwrap());
        let cascade = FallbackCascade::new(registry, test_config());

        let (votes, report) = cascade
            .execute(&[], sequences(), "t", &ClassifyParams::default())
            .await;

        assert!(report.emergency_used);
        assert_eq!(votes.len(), 1);
    }
}
