//! Access-pattern learning and next-query prediction.
//!
//! Every cache access is featurized and appended to an ordered history.
//! Prediction looks for past accesses similar to the current query and
//! tallies what was asked next, yielding pre-warm candidates with a
//! capped confidence. Prediction affects latency only: a wrong guess
//! wastes a background compute, never a result.

use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Minimum similarity for a past access to count as "like this query".
pub const SIMILARITY_THRESHOLD: f64 = 0.6;
/// Predictions never claim more than this, however consistent the history.
pub const CONFIDENCE_CAP: f64 = 0.8;
/// Candidates below this confidence are not worth a background compute.
pub const PREWARM_CONFIDENCE_FLOOR: f64 = 0.3;

const HISTORY_CAP: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    SequenceAnalysis,
    SpeciesClassification,
    MicrobiomeAnalysis,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Text,
    Structured,
}

/// Coarse feature vector extracted from a query for similarity matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFeatures {
    pub category: QueryCategory,
    /// Length of the query's canonical text rendering
    pub length: usize,
    /// Character diversity of the rendering, 0..1
    pub complexity: f64,
    pub kind: QueryKind,
}

impl QueryFeatures {
    pub fn from_query(query: &Value) -> Self {
        let (rendering, kind) = match query {
            Value::String(s) => (s.clone(), QueryKind::Text),
            other => (other.to_string(), QueryKind::Structured),
        };
        let lowered = rendering.to_lowercase();
        Self {
            category: categorize(&lowered),
            length: rendering.chars().count(),
            complexity: char_diversity(&rendering),
            kind,
        }
    }
}

fn categorize(lowered: &str) -> QueryCategory {
    if lowered.contains("species") || lowered.contains("classif") {
        QueryCategory::SpeciesClassification
    } else if lowered.contains("microbiome") || lowered.contains("diversity") {
        QueryCategory::MicrobiomeAnalysis
    } else if lowered.contains("sequence") || lowered.contains("analy") {
        QueryCategory::SequenceAnalysis
    } else {
        QueryCategory::General
    }
}

/// Distinct characters over total characters, 0 for an empty rendering.
fn char_diversity(rendering: &str) -> f64 {
    let total = rendering.chars().count();
    if total == 0 {
        return 0.0;
    }
    let distinct: std::collections::HashSet<char> = rendering.chars().collect();
    distinct.len() as f64 / total as f64
}

/// Weighted feature similarity in [0,1]: category dominates, then length
/// closeness, then complexity, then kind.
pub fn similarity(a: &QueryFeatures, b: &QueryFeatures) -> f64 {
    let category = if a.category == b.category { 1.0 } else { 0.0 };
    let longest = a.length.max(b.length).max(1) as f64;
    let length = 1.0 - (a.length as f64 - b.length as f64).abs() / longest;
    let complexity = 1.0 - (a.complexity - b.complexity).abs();
    let kind = if a.kind == b.kind { 1.0 } else { 0.0 };

    0.4 * category + 0.3 * length + 0.2 * complexity + 0.1 * kind
}

#[derive(Debug, Clone)]
struct AccessRecord {
    key: String,
    query: Value,
    features: QueryFeatures,
}

/// A query predicted to arrive soon, worth computing ahead of time.
#[derive(Debug, Clone)]
pub struct PrewarmCandidate {
    pub key: String,
    pub query: Value,
    pub confidence: f64,
}

#[derive(Default)]
struct PatternInner {
    history: VecDeque<AccessRecord>,
    hourly: [u64; 24],
}

/// Bounded in-memory store of access patterns.
#[derive(Default)]
pub struct AccessPatternStore {
    inner: Mutex<PatternInner>,
}

impl AccessPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_access(&self, key: &str, query: &Value) {
        let record = AccessRecord {
            key: key.to_string(),
            query: query.clone(),
            features: QueryFeatures::from_query(query),
        };

        let mut inner = self.inner.lock().unwrap();
        inner.hourly[Utc::now().hour() as usize] += 1;
        inner.history.push_back(record);
        while inner.history.len() > HISTORY_CAP {
            inner.history.pop_front();
        }
    }

    /// Follow-up candidates for `query`, most confident first. Looks at what
    /// historically came right after accesses similar to this one.
    pub fn predict_next(&self, query: &Value) -> Vec<PrewarmCandidate> {
        let features = QueryFeatures::from_query(query);
        let current_key_hint = query.to_string();

        let inner = self.inner.lock().unwrap();
        let history: Vec<&AccessRecord> = inner.history.iter().collect();

        let mut total_similar = 0usize;
        // key -> (count, representative query)
        let mut followups: HashMap<&str, (usize, &Value)> = HashMap::new();

        for (i, record) in history.iter().enumerate() {
            if similarity(&record.features, &features) < SIMILARITY_THRESHOLD {
                continue;
            }
            total_similar += 1;
            let Some(next) = history.get(i + 1) else { continue };
            if next.query.to_string() == current_key_hint {
                continue;
            }
            let entry = followups.entry(next.key.as_str()).or_insert((0, &next.query));
            entry.0 += 1;
        }

        if total_similar == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<PrewarmCandidate> = followups
            .into_iter()
            .map(|(key, (count, query))| PrewarmCandidate {
                key: key.to_string(),
                query: query.clone(),
                confidence: (count as f64 / total_similar as f64).min(1.0).min(CONFIDENCE_CAP),
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }

    /// Access counts per hour of day (UTC).
    pub fn hourly_histogram(&self) -> [u64; 24] {
        self.inner.lock().unwrap().hourly
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().unwrap().history.len()
    }
}
