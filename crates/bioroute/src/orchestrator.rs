//! Orchestrator facade: the one entry point callers use.
//!
//! `analyze` runs the full pipeline: cache lookup, backend selection,
//! concurrent cascade, feedback recording, consensus, then speculative
//! pre-warming of predicted follow-up queries. All collaborators are
//! injected at construction; there are no globals.
//!
//! The only error a caller ever sees from `analyze` is
//! `NoCandidateBackends`. Everything downstream degrades instead of
//! failing: backend faults become recorded attempts, total failure becomes
//! the emergency heuristic.

use crate::backend::{ClassifyParams, SequenceRecord};
use crate::cache::{CachedOutcome, FileSnapshotStore, NullSnapshotStore, ResultCache, SnapshotStore};
use crate::cascade::FallbackCascade;
use crate::config::OrchestratorConfig;
use crate::consensus::{compute_consensus, tiers_fired, ConsensusResult};
use crate::diversity::DiversitySummary;
use crate::emergency::EMERGENCY_BACKEND_ID;
use crate::error::OrchestratorError;
use crate::feedback::{FeedbackStore, PerformanceReport, PerformanceSample};
use crate::load::SystemLoadProvider;
use crate::predictor::AccessPatternStore;
use crate::registry::BackendRegistry;
use crate::selector::{ModelSelector, ScoredBackend, SelectionConstraints, SelectionEvent};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Consensus result plus cache metadata for the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub result: ConsensusResult,
    pub cache_hit: bool,
    pub cache_key: String,
}

struct Core {
    registry: Arc<BackendRegistry>,
    selector: ModelSelector,
    cascade: FallbackCascade,
    cache: ResultCache,
    patterns: AccessPatternStore,
    feedback: Arc<FeedbackStore>,
    config: OrchestratorConfig,
}

#[derive(Clone)]
pub struct Orchestrator {
    core: Arc<Core>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<BackendRegistry>,
        load_provider: Arc<dyn SystemLoadProvider>,
    ) -> Self {
        let feedback = Arc::new(FeedbackStore::new(config.feedback_config()));
        if let Err(e) = feedback.load_persisted() {
            warn!("could not load persisted feedback: {}", e);
        }

        let snapshot_store: Arc<dyn SnapshotStore> = match &config.cache.snapshot_path {
            Some(path) => Arc::new(FileSnapshotStore::new(path)),
            None => Arc::new(NullSnapshotStore),
        };
        let cache = ResultCache::new(config.cache_config(), snapshot_store);

        let selector = ModelSelector::new(
            Arc::clone(&registry),
            Arc::clone(&feedback),
            load_provider,
        )
        .with_history_window(Duration::from_secs(config.selector.history_window_secs));
        let cascade = FallbackCascade::new(Arc::clone(&registry), config.cascade_config());

        Self {
            core: Arc::new(Core {
                registry,
                selector,
                cascade,
                cache,
                patterns: AccessPatternStore::new(),
                feedback,
                config,
            }),
        }
    }

    /// Classify a batch of sequences. Cached results are served when fresh;
    /// otherwise the selection/cascade/consensus pipeline runs and its
    /// result is written through. Pre-warming happens after the answer is
    /// ready and never delays it.
    pub async fn analyze(
        &self,
        task: &str,
        caller_id: &str,
        sequences: &[SequenceRecord],
        constraints: &SelectionConstraints,
    ) -> Result<AnalysisOutcome, OrchestratorError> {
        let query = cache_query(task, sequences, constraints);
        let outcome = self
            .core
            .cached_analyze(&query, task, caller_id, sequences, constraints)
            .await?;

        self.core.patterns.record_access(&outcome.key, &query);
        if self.core.config.prewarm.enabled {
            self.prewarm(&query);
        }

        let result: ConsensusResult = serde_json::from_value(outcome.payload)?;
        Ok(AnalysisOutcome {
            result,
            cache_hit: outcome.cache_hit,
            cache_key: outcome.key,
        })
    }

    /// Record caller satisfaction with a backend (1..=5).
    pub fn rate(
        &self,
        caller_id: &str,
        backend_id: &str,
        satisfaction: u8,
        feedback: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        self.core
            .feedback
            .rate(caller_id, backend_id, satisfaction, feedback)
    }

    pub fn performance_report(&self, window: Duration) -> PerformanceReport {
        self.core.feedback.report(window)
    }

    pub fn recent_selections(&self, limit: usize) -> Vec<SelectionEvent> {
        self.core.selector.recent_events(limit)
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.core.registry
    }

    /// Flush cache snapshot and pending feedback samples to disk.
    pub fn shutdown(&self) -> Result<(), OrchestratorError> {
        info!("orchestrator shutting down, flushing state");
        self.core.cache.flush()?;
        self.core.feedback.flush()?;
        Ok(())
    }

    /// Kick off background computes for predicted follow-up queries.
    /// Fire-and-forget: failures are logged and never surface.
    fn prewarm(&self, query: &Value) {
        let floor = self.core.config.prewarm.confidence_floor;
        let candidates: Vec<_> = self
            .core
            .patterns
            .predict_next(query)
            .into_iter()
            .filter(|c| c.confidence >= floor)
            .collect();

        for candidate in candidates {
            let Some((task, sequences, constraints)) = parse_query(&candidate.query) else {
                continue;
            };
            let core = Arc::clone(&self.core);
            debug!(key = %candidate.key, confidence = candidate.confidence, "pre-warming predicted query");
            tokio::spawn(async move {
                let query = cache_query(&task, &sequences, &constraints);
                if let Err(e) = core
                    .cached_analyze(&query, &task, "prewarm", &sequences, &constraints)
                    .await
                {
                    debug!("pre-warm compute failed: {}", e);
                }
            });
        }
    }
}

impl Core {
    async fn cached_analyze(
        &self,
        query: &Value,
        task: &str,
        caller_id: &str,
        sequences: &[SequenceRecord],
        constraints: &SelectionConstraints,
    ) -> Result<CachedOutcome, OrchestratorError> {
        self.cache
            .get_or_compute(query, || async {
                let result = self
                    .run_pipeline(task, caller_id, sequences, constraints)
                    .await?;
                Ok(serde_json::to_value(result)?)
            })
            .await
    }

    async fn run_pipeline(
        &self,
        task: &str,
        caller_id: &str,
        sequences: &[SequenceRecord],
        constraints: &SelectionConstraints,
    ) -> Result<ConsensusResult, OrchestratorError> {
        let shortlist = self
            .selector
            .select(task, caller_id, sequences, constraints)?;
        let attempted_weight: f64 = shortlist.iter().map(|s| s.descriptor.weight).sum();

        let (votes, report) = self
            .cascade
            .execute(
                &shortlist,
                Arc::new(sequences.to_vec()),
                task,
                &ClassifyParams::default(),
            )
            .await;

        self.record_attempts(&shortlist, &report);

        let predictions = compute_consensus(sequences, &votes, attempted_weight);
        let diversity =
            DiversitySummary::from_labels(predictions.iter().map(|p| p.label.as_str()));
        let degraded = report.emergency_used || report.failed() > 0;

        Ok(ConsensusResult {
            request_id: Uuid::new_v4(),
            task: task.to_string(),
            completed_at: Utc::now(),
            predictions,
            tiers_fired: tiers_fired(&votes),
            emergency_mode: report.emergency_used,
            degraded,
            diversity,
            report,
        })
    }

    /// Feed every learned-backend attempt into the feedback loop. Accuracy
    /// is proxied by the backend's own mean confidence; the emergency
    /// heuristic is never sampled since the selector never ranks it.
    fn record_attempts(&self, shortlist: &[ScoredBackend], report: &crate::cascade::ExecutionReport) {
        for attempt in &report.attempts {
            if attempt.backend_id == EMERGENCY_BACKEND_ID {
                continue;
            }
            let tier = shortlist
                .iter()
                .find(|s| s.descriptor.id == attempt.backend_id)
                .map(|s| s.descriptor.tier);
            let (accuracy, success, metadata) = match &attempt.outcome {
                crate::cascade::AttemptOutcome::Success { response } => {
                    (Some(response.mean_confidence()), true, None)
                }
                crate::cascade::AttemptOutcome::Failure { error } => {
                    (None, false, Some(error.code().to_string()))
                }
            };
            self.feedback.record(PerformanceSample {
                backend_id: attempt.backend_id.clone(),
                at: Utc::now(),
                latency_ms: attempt.duration_ms,
                accuracy,
                success,
                tier,
                metadata,
            });
        }
    }
}

/// Canonical cache query. Caller identity is deliberately excluded: two
/// callers asking the same question share one entry.
fn cache_query(
    task: &str,
    sequences: &[SequenceRecord],
    constraints: &SelectionConstraints,
) -> Value {
    json!({
        "task": task,
        "sequences": sequences,
        "constraints": constraints,
    })
}

fn parse_query(query: &Value) -> Option<(String, Vec<SequenceRecord>, SelectionConstraints)> {
    let task = query.get("task")?.as_str()?.to_string();
    let sequences: Vec<SequenceRecord> =
        serde_json::from_value(query.get("sequences")?.clone()).ok()?;
    let constraints: SelectionConstraints =
        serde_json::from_value(query.get("constraints")?.clone()).ok()?;
    Some((task, sequences, constraints))
}
