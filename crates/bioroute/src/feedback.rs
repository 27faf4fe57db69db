//! Performance feedback loop.
//!
//! Rolling per-backend sample rings plus caller satisfaction profiles.
//! `report()` is computed on read and is the sole input the model selector
//! consumes for its historical-performance factor - feedback flows one way.
//!
//! Samples persist as append-only JSONL (malformed lines are skipped on
//! read, forward compatible). Appends are probabilistic to bound I/O.

use crate::backend::Tier;
use crate::error::OrchestratorError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// One observed backend invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub backend_id: String,
    pub at: DateTime<Utc>,
    pub latency_ms: u64,
    /// Proxy accuracy in [0,1] when the backend reported confidence or
    /// ground truth was available; None otherwise.
    pub accuracy: Option<f64>,
    pub success: bool,
    /// Which cascade tier triggered this call, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    /// Free-form failure/fallback metadata (error codes etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// Coarse accuracy trend within a report window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// Aggregated view of one backend over a window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendPerformance {
    pub sample_count: usize,
    pub mean_latency_ms: f64,
    /// Mean over samples that carried an accuracy value; 0 when none did
    pub mean_accuracy: f64,
    pub success_rate: f64,
    pub trend: Trend,
    /// 0.3*speed + 0.4*accuracy + 0.3*reliability, each sub-score 0-100
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub window_ms: u64,
    pub backends: HashMap<String, BackendPerformance>,
}

impl PerformanceReport {
    pub fn get(&self, backend_id: &str) -> Option<&BackendPerformance> {
        self.backends.get(backend_id)
    }
}

/// Caller preference profile fed by `rate()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerProfile {
    pub preferred: HashSet<String>,
    pub avoided: HashSet<String>,
    /// backend id -> satisfaction ratings on a 1-5 scale
    pub ratings: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    /// Ring capacity per backend
    pub cap_per_backend: usize,
    /// Samples older than this are aged out
    pub retention: Duration,
    /// Probability that a record() call flushes pending samples to disk
    pub persist_probability: f64,
    /// JSONL path; None disables persistence
    pub persist_path: Option<PathBuf>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            cap_per_backend: 1000,
            retention: Duration::from_secs(7 * 24 * 3600),
            persist_probability: 0.1,
            persist_path: None,
        }
    }
}

#[derive(Default)]
struct FeedbackInner {
    rings: HashMap<String, VecDeque<PerformanceSample>>,
    callers: HashMap<String, CallerProfile>,
    /// Samples recorded since the last disk flush
    pending: Vec<PerformanceSample>,
}

/// Concurrent-safe feedback store. One mutex guards rings, profiles and the
/// pending buffer so trims and inserts are atomic with respect to each other.
pub struct FeedbackStore {
    config: FeedbackConfig,
    inner: Mutex<FeedbackInner>,
}

impl FeedbackStore {
    pub fn new(config: FeedbackConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(FeedbackInner::default()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(FeedbackConfig::default())
    }

    /// Append a sample: ring-trim to capacity, age out stale samples, and
    /// probabilistically flush pending samples to the JSONL file.
    pub fn record(&self, sample: PerformanceSample) {
        let flush = {
            let mut inner = self.inner.lock().unwrap();
            let cutoff = Utc::now()
                - ChronoDuration::from_std(self.config.retention)
                    .unwrap_or_else(|_| ChronoDuration::days(7));

            let ring = inner.rings.entry(sample.backend_id.clone()).or_default();
            ring.push_back(sample.clone());
            while ring.len() > self.config.cap_per_backend {
                ring.pop_front();
            }
            while ring.front().map(|s| s.at < cutoff).unwrap_or(false) {
                ring.pop_front();
            }

            inner.pending.push(sample);
            self.config.persist_path.is_some()
                && rand::random::<f64>() < self.config.persist_probability
        };

        if flush {
            if let Err(e) = self.flush() {
                warn!("feedback flush failed: {}", e);
            }
        }
    }

    /// Write all pending samples to the JSONL file.
    pub fn flush(&self) -> Result<(), OrchestratorError> {
        let Some(path) = &self.config.persist_path else {
            return Ok(());
        };
        let pending: Vec<PerformanceSample> = {
            let mut inner = self.inner.lock().unwrap();
            std::mem::take(&mut inner.pending)
        };
        if pending.is_empty() {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        for sample in &pending {
            let line = serde_json::to_string(sample)?;
            writeln!(file, "{}", line)?;
        }
        debug!(count = pending.len(), "feedback samples persisted");
        Ok(())
    }

    /// Reload samples from the JSONL file, skipping malformed lines.
    pub fn load_persisted(&self) -> Result<usize, OrchestratorError> {
        let Some(path) = &self.config.persist_path else {
            return Ok(0);
        };
        if !path.exists() {
            return Ok(0);
        }

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut loaded = 0usize;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PerformanceSample>(&line) {
                Ok(sample) => {
                    let mut inner = self.inner.lock().unwrap();
                    let ring = inner.rings.entry(sample.backend_id.clone()).or_default();
                    ring.push_back(sample);
                    while ring.len() > self.config.cap_per_backend {
                        ring.pop_front();
                    }
                    loaded += 1;
                }
                Err(e) => {
                    warn!("skipping malformed feedback line: {}", e);
                }
            }
        }
        Ok(loaded)
    }

    /// Aggregate the most recent `window` of samples per backend.
    pub fn report(&self, window: Duration) -> PerformanceReport {
        let cutoff =
            Utc::now() - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(1));
        let inner = self.inner.lock().unwrap();

        let mut backends = HashMap::new();
        for (id, ring) in &inner.rings {
            let samples: Vec<&PerformanceSample> =
                ring.iter().filter(|s| s.at >= cutoff).collect();
            if samples.is_empty() {
                continue;
            }
            backends.insert(id.clone(), aggregate(&samples));
        }

        PerformanceReport {
            generated_at: Utc::now(),
            window_ms: window.as_millis() as u64,
            backends,
        }
    }

    pub fn sample_count(&self, backend_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .rings
            .get(backend_id)
            .map(|r| r.len())
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Caller preference profiles
    // ------------------------------------------------------------------

    /// Record a satisfaction rating (1..=5) from a caller for a backend.
    pub fn rate(
        &self,
        caller_id: &str,
        backend_id: &str,
        satisfaction: u8,
        _feedback: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        if !(1..=5).contains(&satisfaction) {
            return Err(OrchestratorError::InvalidRating(satisfaction));
        }
        let mut inner = self.inner.lock().unwrap();
        let profile = inner.callers.entry(caller_id.to_string()).or_default();
        profile
            .ratings
            .entry(backend_id.to_string())
            .or_default()
            .push(satisfaction);
        Ok(())
    }

    pub fn prefer(&self, caller_id: &str, backend_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        let profile = inner.callers.entry(caller_id.to_string()).or_default();
        profile.avoided.remove(backend_id);
        profile.preferred.insert(backend_id.to_string());
    }

    pub fn avoid(&self, caller_id: &str, backend_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        let profile = inner.callers.entry(caller_id.to_string()).or_default();
        profile.preferred.remove(backend_id);
        profile.avoided.insert(backend_id.to_string());
    }

    /// Caller-preference factor for the selector, on a 0-100 scale:
    /// 100 explicit prefer, 0 explicit avoid, mean satisfaction scaled
    /// from 1-5 to 0-100 otherwise, neutral 50 with no history.
    pub fn preference_score(&self, caller_id: &str, backend_id: &str) -> f64 {
        let inner = self.inner.lock().unwrap();
        let Some(profile) = inner.callers.get(caller_id) else {
            return 50.0;
        };
        if profile.preferred.contains(backend_id) {
            return 100.0;
        }
        if profile.avoided.contains(backend_id) {
            return 0.0;
        }
        match profile.ratings.get(backend_id) {
            Some(ratings) if !ratings.is_empty() => {
                let mean =
                    ratings.iter().map(|r| *r as f64).sum::<f64>() / ratings.len() as f64;
                (mean - 1.0) / 4.0 * 100.0
            }
            _ => 50.0,
        }
    }
}

fn aggregate(samples: &[&PerformanceSample]) -> BackendPerformance {
    let n = samples.len();
    let mean_latency_ms =
        samples.iter().map(|s| s.latency_ms as f64).sum::<f64>() / n as f64;
    let success_rate = samples.iter().filter(|s| s.success).count() as f64 / n as f64;

    let with_acc: Vec<f64> = samples.iter().filter_map(|s| s.accuracy).collect();
    let mean_accuracy = if with_acc.is_empty() {
        0.0
    } else {
        with_acc.iter().sum::<f64>() / with_acc.len() as f64
    };

    let trend = accuracy_trend(samples);

    let speed_score = (100.0 - mean_latency_ms / 100.0).max(0.0);
    let accuracy_score = mean_accuracy * 100.0;
    let reliability_score = success_rate * 100.0;
    let score = 0.3 * speed_score + 0.4 * accuracy_score + 0.3 * reliability_score;

    BackendPerformance {
        sample_count: n,
        mean_latency_ms,
        mean_accuracy,
        success_rate,
        trend,
        score,
    }
}

/// Compare first-half vs second-half mean accuracy within the window:
/// more than +5% improving, more than -5% declining, otherwise stable.
fn accuracy_trend(samples: &[&PerformanceSample]) -> Trend {
    let with_acc: Vec<f64> = samples.iter().filter_map(|s| s.accuracy).collect();
    if with_acc.len() < 4 {
        return Trend::Stable;
    }
    let mid = with_acc.len() / 2;
    let first = with_acc[..mid].iter().sum::<f64>() / mid as f64;
    let second = with_acc[mid..].iter().sum::<f64>() / (with_acc.len() - mid) as f64;
    let delta = second - first;
    if delta > 0.05 {
        Trend::Improving
    } else if delta < -0.05 {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn sample(backend: &str, latency_ms: u64, accuracy: Option<f64>, success: bool) -> PerformanceSample {
        PerformanceSample {
            backend_id: backend.to_string(),
            at: Utc::now(),
            latency_ms,
            accuracy,
            success,
            tier: None,
            metadata: None,
        }
    }

    #[test]
    fn test_report_aggregates_basic_stats() {
        let store = FeedbackStore::in_memory();
        store.record(sample("b1", 100, Some(0.9), true));
        store.record(sample("b1", 300, Some(0.7), true));
        store.record(sample("b1", 200, None, false));

        let report = store.report(Duration::from_secs(3600));
        let perf = report.get("b1").unwrap();

        assert_eq!(perf.sample_count, 3);
        assert_relative_eq!(perf.mean_latency_ms, 200.0);
        assert_relative_eq!(perf.mean_accuracy, 0.8);
        assert_relative_eq!(perf.success_rate, 2.0 / 3.0);
    }

    #[test]
    fn test_composite_score_weighting() {
        let store = FeedbackStore::in_memory();
        // Perfect backend: zero-ish latency, accuracy 1.0, always succeeds.
        store.record(sample("b1", 0, Some(1.0), true));
        let perf = store
            .report(Duration::from_secs(3600))
            .get("b1")
            .unwrap()
            .clone();
        assert_relative_eq!(perf.score, 100.0);
    }

    #[test]
    fn test_ring_capacity_enforced() {
        let config = FeedbackConfig {
            cap_per_backend: 5,
            ..Default::default()
        };
        let store = FeedbackStore::new(config);
        for _ in 0..20 {
            store.record(sample("b1", 10, None, true));
        }
        assert_eq!(store.sample_count("b1"), 5);
    }

    #[test]
    fn test_trend_improving_and_declining() {
        let improving: Vec<PerformanceSample> = [0.5, 0.5, 0.9, 0.9]
            .iter()
            .map(|a| sample("b", 10, Some(*a), true))
            .collect();
        let refs: Vec<&PerformanceSample> = improving.iter().collect();
        assert_eq!(accuracy_trend(&refs), Trend::Improving);

        let declining: Vec<PerformanceSample> = [0.9, 0.9, 0.5, 0.5]
            .iter()
            .map(|a| sample("b", 10, Some(*a), true))
            .collect();
        let refs: Vec<&PerformanceSample> = declining.iter().collect();
        assert_eq!(accuracy_trend(&refs), Trend::Declining);

        let stable: Vec<PerformanceSample> = [0.8, 0.8, 0.81, 0.79]
            .iter()
            .map(|a| sample("b", 10, Some(*a), true))
            .collect();
        let refs: Vec<&PerformanceSample> = stable.iter().collect();
        assert_eq!(accuracy_trend(&refs), Trend::Stable);
    }

    #[test]
    fn test_rate_validation() {
        let store = FeedbackStore::in_memory();
        assert!(store.rate("alice", "b1", 0, None).is_err());
        assert!(store.rate("alice", "b1", 6, None).is_err());
        assert!(store.rate("alice", "b1", 5, None).is_ok());
    }

    #[test]
    fn test_preference_score_scale() {
        let store = FeedbackStore::in_memory();
        // No history at all -> neutral.
        assert_relative_eq!(store.preference_score("alice", "b1"), 50.0);

        // Mean satisfaction 3 on 1-5 -> 50 on 0-100.
        store.rate("alice", "b1", 3, None).unwrap();
        assert_relative_eq!(store.preference_score("alice", "b1"), 50.0);

        // Mean 5 -> 100, mean 1 -> 0.
        store.rate("alice", "b2", 5, None).unwrap();
        assert_relative_eq!(store.preference_score("alice", "b2"), 100.0);
        store.rate("alice", "b3", 1, None).unwrap();
        assert_relative_eq!(store.preference_score("alice", "b3"), 0.0);

        // Explicit prefer/avoid override ratings.
        store.avoid("alice", "b2");
        assert_relative_eq!(store.preference_score("alice", "b2"), 0.0);
        store.prefer("alice", "b3");
        assert_relative_eq!(store.preference_score("alice", "b3"), 100.0);
    }

    #[test]
    fn test_jsonl_roundtrip_skips_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feedback.jsonl");
        let config = FeedbackConfig {
            persist_path: Some(path.clone()),
            persist_probability: 1.0,
            ..Default::default()
        };

        let store = FeedbackStore::new(config.clone());
        store.record(sample("b1", 100, Some(0.9), true));
        store.flush().unwrap();

        // Corrupt line in the middle.
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("{not json}\n");
        std::fs::write(&path, contents).unwrap();

        let fresh = FeedbackStore::new(config);
        let loaded = fresh.load_persisted().unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(fresh.sample_count("b1"), 1);
    }
}
