//! Model selector: ranks candidate backends per request.
//!
//! Scoring is a fixed convex combination over six factors (weights sum to
//! 1.0), clamped to [0,100]. Pure scoring functions with test-locked
//! behavior; the per-factor breakdown is kept on the result for diagnostics.
//!
//! Every selection also records a `SelectionEvent` into a bounded FIFO
//! history. That history is observability only - it never feeds back into
//! scoring.

use crate::backend::{BackendDescriptor, Rating, SequenceRecord};
use crate::error::OrchestratorError;
use crate::feedback::{FeedbackStore, PerformanceReport};
use crate::load::{SystemLoadProvider, SystemLoadSnapshot};
use crate::registry::BackendRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Factor weights. Must sum to 1.0.
pub const W_TASK: f64 = 0.35;
pub const W_HISTORY: f64 = 0.25;
pub const W_CALLER: f64 = 0.15;
pub const W_LOAD: f64 = 0.10;
pub const W_INPUT: f64 = 0.10;
pub const W_COST: f64 = 0.05;

/// Selection history capacity (FIFO eviction).
const EVENT_HISTORY_CAP: usize = 1000;

/// Aggregate characteristics of a request's input batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputProfile {
    pub count: usize,
    pub mean_len: f64,
    pub len_variance: f64,
    /// Counts per length bucket: <100, 100-499, 500-1999, >=2000
    pub len_histogram: [usize; 4],
}

impl InputProfile {
    pub fn from_sequences(sequences: &[SequenceRecord]) -> Self {
        let count = sequences.len();
        if count == 0 {
            return Self {
                count: 0,
                mean_len: 0.0,
                len_variance: 0.0,
                len_histogram: [0; 4],
            };
        }
        let lens: Vec<f64> = sequences.iter().map(|s| s.len() as f64).collect();
        let mean_len = lens.iter().sum::<f64>() / count as f64;
        let len_variance =
            lens.iter().map(|l| (l - mean_len).powi(2)).sum::<f64>() / count as f64;

        let mut len_histogram = [0usize; 4];
        for l in &lens {
            let bucket = if *l < 100.0 {
                0
            } else if *l < 500.0 {
                1
            } else if *l < 2000.0 {
                2
            } else {
                3
            };
            len_histogram[bucket] += 1;
        }

        Self {
            count,
            mean_len,
            len_variance,
            len_histogram,
        }
    }
}

/// Optional per-request constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConstraints {
    /// Shortlist cap
    pub max_backends: usize,
    /// Per-call budget; enables the cost-efficiency factor
    pub budget: Option<f64>,
}

impl Default for SelectionConstraints {
    fn default() -> Self {
        Self {
            max_backends: 5,
            budget: None,
        }
    }
}

/// Per-request scoring context. Created per request, discarded after use.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub task: String,
    pub caller_id: String,
    pub load: SystemLoadSnapshot,
    pub input: InputProfile,
    pub constraints: SelectionConstraints,
}

/// Raw factor values, each on 0-100 before weighting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub task_suitability: f64,
    pub historical: f64,
    pub caller_preference: f64,
    pub load_compatibility: f64,
    pub input_compatibility: f64,
    pub cost_efficiency: f64,
}

/// A backend with its score against a specific context. Ephemeral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredBackend {
    pub descriptor: BackendDescriptor,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Observability record of one selection call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionEvent {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub task: String,
    pub caller_id: String,
    pub chosen: Vec<String>,
    pub input_count: usize,
    pub elapsed_us: u64,
}

pub struct ModelSelector {
    registry: Arc<BackendRegistry>,
    feedback: Arc<FeedbackStore>,
    load_provider: Arc<dyn SystemLoadProvider>,
    /// Window the historical factor looks back over
    history_window: Duration,
    events: Mutex<VecDeque<SelectionEvent>>,
}

impl ModelSelector {
    pub fn new(
        registry: Arc<BackendRegistry>,
        feedback: Arc<FeedbackStore>,
        load_provider: Arc<dyn SystemLoadProvider>,
    ) -> Self {
        Self {
            registry,
            feedback,
            load_provider,
            history_window: Duration::from_secs(3600),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_history_window(mut self, window: Duration) -> Self {
        self.history_window = window;
        self
    }

    /// Rank backends for a request. Descending by score; ties keep registry
    /// order (stable sort). Errors only when no registered backend supports
    /// the task at all.
    pub fn select(
        &self,
        task: &str,
        caller_id: &str,
        sequences: &[SequenceRecord],
        constraints: &SelectionConstraints,
    ) -> Result<Vec<ScoredBackend>, OrchestratorError> {
        let start = Instant::now();

        let candidates = self.registry.supporting(task);
        if candidates.is_empty() {
            return Err(OrchestratorError::NoCandidateBackends {
                task: task.to_string(),
            });
        }

        let context = SelectionContext {
            task: task.to_string(),
            caller_id: caller_id.to_string(),
            load: self.load_provider.snapshot(),
            input: InputProfile::from_sequences(sequences),
            constraints: constraints.clone(),
        };
        let report = self.feedback.report(self.history_window);

        let mut scored: Vec<ScoredBackend> = candidates
            .iter()
            .map(|b| {
                let (score, breakdown) =
                    score_backend(b.descriptor(), &context, &report, &self.feedback);
                ScoredBackend {
                    descriptor: b.descriptor().clone(),
                    score,
                    breakdown,
                }
            })
            .collect();

        // Stable sort keeps registration order on ties.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(constraints.max_backends.max(1));

        debug!(
            task,
            caller_id,
            shortlist = scored.len(),
            top = %scored.first().map(|s| s.descriptor.id.as_str()).unwrap_or("-"),
            "backend selection complete"
        );

        self.push_event(SelectionEvent {
            id: Uuid::new_v4(),
            at: Utc::now(),
            task: task.to_string(),
            caller_id: caller_id.to_string(),
            chosen: scored.iter().map(|s| s.descriptor.id.clone()).collect(),
            input_count: context.input.count,
            elapsed_us: start.elapsed().as_micros() as u64,
        });

        Ok(scored)
    }

    fn push_event(&self, event: SelectionEvent) {
        let mut events = self.events.lock().unwrap();
        events.push_back(event);
        while events.len() > EVENT_HISTORY_CAP {
            events.pop_front();
        }
    }

    pub fn recent_events(&self, limit: usize) -> Vec<SelectionEvent> {
        let events = self.events.lock().unwrap();
        events.iter().rev().take(limit).cloned().collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

// ============================================================================
// Pure scoring functions (test-locked)
// ============================================================================

/// Compute the full score for one backend against a context.
/// Returns (score in [0,100], per-factor breakdown).
pub fn score_backend(
    descriptor: &BackendDescriptor,
    context: &SelectionContext,
    report: &PerformanceReport,
    feedback: &FeedbackStore,
) -> (f64, ScoreBreakdown) {
    let breakdown = ScoreBreakdown {
        task_suitability: task_suitability(descriptor, &context.task),
        historical: historical_performance(descriptor, report),
        caller_preference: feedback.preference_score(&context.caller_id, &descriptor.id),
        load_compatibility: load_compatibility(descriptor, &context.load),
        input_compatibility: input_compatibility(descriptor, &context.input),
        cost_efficiency: cost_efficiency(descriptor, context.constraints.budget),
    };

    // A backend that cannot serve the task scores zero outright.
    if breakdown.task_suitability == 0.0 {
        return (0.0, breakdown);
    }

    let score = W_TASK * breakdown.task_suitability
        + W_HISTORY * breakdown.historical
        + W_CALLER * breakdown.caller_preference
        + W_LOAD * breakdown.load_compatibility
        + W_INPUT * breakdown.input_compatibility
        + W_COST * breakdown.cost_efficiency;

    (score.clamp(0.0, 100.0), breakdown)
}

/// Static per-task suitability table; 50 for tasks we have no prior for.
pub fn task_suitability(descriptor: &BackendDescriptor, task: &str) -> f64 {
    if !descriptor.supports(task) {
        return 0.0;
    }
    match task {
        "species_classification" => 90.0,
        "sequence_analysis" => 85.0,
        "microbiome_analysis" => 80.0,
        "novelty_detection" => 75.0,
        _ => 50.0,
    }
}

/// Historical factor from the feedback report; neutral 50 when unknown.
pub fn historical_performance(descriptor: &BackendDescriptor, report: &PerformanceReport) -> f64 {
    match report.get(&descriptor.id) {
        Some(perf) => {
            let latency_score = (100.0 - perf.mean_latency_ms / 100.0).max(0.0);
            0.4 * perf.mean_accuracy * 100.0
                + 0.4 * perf.success_rate * 100.0
                + 0.2 * latency_score
        }
        None => 50.0,
    }
}

/// Under high load favor frugal backends; under normal load favor capable ones.
pub fn load_compatibility(descriptor: &BackendDescriptor, load: &SystemLoadSnapshot) -> f64 {
    if load.is_high_load() {
        match descriptor.resource_usage {
            Rating::Low => 100.0,
            Rating::Medium => 70.0,
            Rating::High => 40.0,
            Rating::VeryHigh => 20.0,
        }
    } else {
        match descriptor.resource_usage {
            Rating::Low => 60.0,
            Rating::Medium => 80.0,
            Rating::High => 90.0,
            Rating::VeryHigh => 100.0,
        }
    }
}

/// Fit between the input batch and the backend's declared bounds.
pub fn input_compatibility(descriptor: &BackendDescriptor, input: &InputProfile) -> f64 {
    let mean = input.mean_len;
    if mean < descriptor.min_len as f64 || mean > descriptor.max_len as f64 {
        return 20.0;
    }
    if input.count < descriptor.min_count {
        return 30.0;
    }
    let comfortable_low = descriptor.min_len as f64 * 1.2;
    let comfortable_high = descriptor.max_len as f64 * 0.8;
    if mean >= comfortable_low && mean <= comfortable_high {
        100.0
    } else {
        80.0
    }
}

/// Tiered by cost-per-call as a fraction of the budget; 50 with no budget.
pub fn cost_efficiency(descriptor: &BackendDescriptor, budget: Option<f64>) -> f64 {
    let Some(budget) = budget else {
        return 50.0;
    };
    if budget <= 0.0 {
        return 20.0;
    }
    let ratio = descriptor.cost_per_call / budget;
    if ratio <= 0.1 {
        100.0
    } else if ratio <= 0.3 {
        80.0
    } else if ratio <= 0.5 {
        60.0
    } else if ratio <= 1.0 {
        40.0
    } else {
        20.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Tier;
    use approx::assert_relative_eq;

    fn descriptor() -> BackendDescriptor {
        BackendDescriptor::new("b1", Tier::PrimaryRemote, 0.4)
            .with_capabilities(&["species_classification"])
            .with_length_bounds(100, 10_000)
            .with_cost(0.05)
    }

    fn profile(count: usize, mean_len: f64) -> InputProfile {
        InputProfile {
            count,
            mean_len,
            len_variance: 0.0,
            len_histogram: [0; 4],
        }
    }

    #[test]
    fn test_task_suitability_excluded_is_zero() {
        assert_eq!(task_suitability(&descriptor(), "protein_folding"), 0.0);
        assert_eq!(
            task_suitability(&descriptor(), "species_classification"),
            90.0
        );
    }

    #[test]
    fn test_unknown_task_defaults_to_50() {
        let desc = BackendDescriptor::new("b", Tier::Local, 0.3)
            .with_capabilities(&["exotic_task"]);
        assert_eq!(task_suitability(&desc, "exotic_task"), 50.0);
    }

    #[test]
    fn test_load_compatibility_tables() {
        let mut desc = descriptor();
        let high = SystemLoadSnapshot::new(90.0, 50.0, 0.0);
        let normal = SystemLoadSnapshot::new(30.0, 30.0, 0.0);

        desc.resource_usage = Rating::Low;
        assert_eq!(load_compatibility(&desc, &high), 100.0);
        assert_eq!(load_compatibility(&desc, &normal), 60.0);

        desc.resource_usage = Rating::VeryHigh;
        assert_eq!(load_compatibility(&desc, &high), 20.0);
        assert_eq!(load_compatibility(&desc, &normal), 100.0);
    }

    #[test]
    fn test_input_compatibility_bounds() {
        let desc = descriptor(); // bounds 100..10_000, min_count 1

        // Mean out of bounds.
        assert_eq!(input_compatibility(&desc, &profile(3, 50.0)), 20.0);
        assert_eq!(input_compatibility(&desc, &profile(3, 20_000.0)), 20.0);

        // Comfortable interior: >= 120, <= 8000.
        assert_eq!(input_compatibility(&desc, &profile(3, 500.0)), 100.0);

        // In bounds but near an edge.
        assert_eq!(input_compatibility(&desc, &profile(3, 105.0)), 80.0);
        assert_eq!(input_compatibility(&desc, &profile(3, 9_500.0)), 80.0);
    }

    #[test]
    fn test_input_compatibility_min_count() {
        let desc = descriptor().with_min_count(10);
        assert_eq!(input_compatibility(&desc, &profile(3, 500.0)), 30.0);
        assert_eq!(input_compatibility(&desc, &profile(10, 500.0)), 100.0);
    }

    #[test]
    fn test_cost_efficiency_tiers() {
        let desc = descriptor(); // cost 0.05
        assert_eq!(cost_efficiency(&desc, None), 50.0);
        assert_eq!(cost_efficiency(&desc, Some(1.0)), 100.0); // 5%
        assert_eq!(cost_efficiency(&desc, Some(0.2)), 80.0); // 25%
        assert_eq!(cost_efficiency(&desc, Some(0.12)), 60.0); // ~42%
        assert_eq!(cost_efficiency(&desc, Some(0.06)), 40.0); // ~83%
        assert_eq!(cost_efficiency(&desc, Some(0.01)), 20.0); // 500%
    }

    #[test]
    fn test_input_profile_stats() {
        let seqs = vec![
            SequenceRecord::new("a", "A".repeat(100)),
            SequenceRecord::new("b", "A".repeat(300)),
        ];
        let p = InputProfile::from_sequences(&seqs);
        assert_eq!(p.count, 2);
        assert_relative_eq!(p.mean_len, 200.0);
        assert_relative_eq!(p.len_variance, 10_000.0);
        assert_eq!(p.len_histogram, [0, 2, 0, 0]);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total = W_TASK + W_HISTORY + W_CALLER + W_LOAD + W_INPUT + W_COST;
        assert_relative_eq!(total, 1.0);
    }
}
