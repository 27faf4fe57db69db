//! Backend contract: descriptors, classification types, and the async traits
//! every participating classifier or reference database must implement.
//!
//! Production code registers real adapters (see `backends/`). Test code uses
//! `FakeBackend` with scripted responses - no network required.

use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Qualitative rating used for the speed / accuracy / resource-usage profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Low,
    Medium,
    High,
    VeryHigh,
}

/// Where a backend runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    Local,
    Remote,
}

/// Priority group in the fallback cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    PrimaryRemote,
    SecondaryRemote,
    Database,
    Local,
    Emergency,
}

impl Tier {
    /// Coarse category for the execution report counters.
    pub fn category(&self) -> &'static str {
        match self {
            Tier::PrimaryRemote | Tier::SecondaryRemote => "remote",
            Tier::Database => "database",
            Tier::Local => "local",
            Tier::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::PrimaryRemote => write!(f, "primary_remote"),
            Tier::SecondaryRemote => write!(f, "secondary_remote"),
            Tier::Database => write!(f, "database"),
            Tier::Local => write!(f, "local"),
            Tier::Emergency => write!(f, "emergency"),
        }
    }
}

/// Static description of an invocable backend. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Stable id (e.g., "cloud-classifier", "ollama:llama3.2:3b")
    pub id: String,
    /// Task tags this backend can serve
    pub capabilities: Vec<String>,
    /// Acceptable mean sequence length (base pairs)
    pub min_len: usize,
    pub max_len: usize,
    /// Minimum batch size the backend will accept
    pub min_count: usize,
    pub speed: Rating,
    pub accuracy: Rating,
    pub resource_usage: Rating,
    pub locality: Locality,
    /// Monetary cost per call (same unit as the caller budget)
    pub cost_per_call: f64,
    /// Static ensemble weight used by the consensus vote
    pub weight: f64,
    pub tier: Tier,
}

impl BackendDescriptor {
    pub fn new(id: impl Into<String>, tier: Tier, weight: f64) -> Self {
        let locality = match tier {
            Tier::PrimaryRemote | Tier::SecondaryRemote => Locality::Remote,
            _ => Locality::Local,
        };
        Self {
            id: id.into(),
            capabilities: Vec::new(),
            min_len: 1,
            max_len: 100_000,
            min_count: 1,
            speed: Rating::Medium,
            accuracy: Rating::Medium,
            resource_usage: Rating::Medium,
            locality,
            cost_per_call: 0.0,
            weight,
            tier,
        }
    }

    pub fn with_capabilities(mut self, tasks: &[&str]) -> Self {
        self.capabilities = tasks.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_length_bounds(mut self, min_len: usize, max_len: usize) -> Self {
        self.min_len = min_len;
        self.max_len = max_len;
        self
    }

    pub fn with_min_count(mut self, min_count: usize) -> Self {
        self.min_count = min_count;
        self
    }

    pub fn with_profile(mut self, speed: Rating, accuracy: Rating, resource_usage: Rating) -> Self {
        self.speed = speed;
        self.accuracy = accuracy;
        self.resource_usage = resource_usage;
        self
    }

    pub fn with_cost(mut self, cost_per_call: f64) -> Self {
        self.cost_per_call = cost_per_call;
        self
    }

    pub fn supports(&self, task: &str) -> bool {
        self.capabilities.iter().any(|c| c == task)
    }
}

/// One input sequence (FASTA record shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub id: String,
    pub sequence: String,
}

impl SequenceRecord {
    pub fn new(id: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sequence: sequence.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Fraction of G/C bases among recognized bases. 0.0 for empty input.
    pub fn gc_fraction(&self) -> f64 {
        let mut gc = 0usize;
        let mut total = 0usize;
        for b in self.sequence.bytes() {
            match b.to_ascii_uppercase() {
                b'G' | b'C' => {
                    gc += 1;
                    total += 1;
                }
                b'A' | b'T' | b'U' => total += 1,
                _ => {}
            }
        }
        if total == 0 {
            0.0
        } else {
            gc as f64 / total as f64
        }
    }

    /// Fraction of bytes that are not recognized nucleotide codes.
    pub fn ambiguous_fraction(&self) -> f64 {
        if self.sequence.is_empty() {
            return 1.0;
        }
        let known = self
            .sequence
            .bytes()
            .filter(|b| matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T' | b'U'))
            .count();
        1.0 - known as f64 / self.sequence.len() as f64
    }
}

/// Generation parameters forwarded to model-style backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifyParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Taxonomic lineage, when a backend provides one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    pub class: Option<String>,
}

/// Single-sequence prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxonomy: Option<Taxonomy>,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
            taxonomy: None,
        }
    }
}

/// Backend response: one prediction per input sequence, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub predictions: Vec<Prediction>,
    /// Backend-reported overall confidence in [0,1]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<Vec<f32>>>,
}

impl ClassifyResponse {
    pub fn mean_confidence(&self) -> f64 {
        if self.predictions.is_empty() {
            return self.confidence;
        }
        self.predictions.iter().map(|p| p.confidence).sum::<f64>()
            / self.predictions.len() as f64
    }
}

/// A ranked match from a reference database lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbMatch {
    pub accession: String,
    pub species: String,
    /// Sequence identity in [0,1]
    pub identity: f64,
}

// ============================================================================
// Traits
// ============================================================================

/// An invocable classifier participating in the ensemble.
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    fn descriptor(&self) -> &BackendDescriptor;

    /// Classify a batch of sequences for a task. Must fail with a typed
    /// `BackendError` rather than panic.
    async fn classify(
        &self,
        sequences: &[SequenceRecord],
        task: &str,
        params: &ClassifyParams,
    ) -> Result<ClassifyResponse, BackendError>;
}

/// A reference-database collaborator. Must tolerate empty/partial results:
/// the outer Vec is per input sequence, inner Vec may be empty.
#[async_trait]
pub trait SequenceDatabase: Send + Sync {
    async fn search(
        &self,
        sequences: &[SequenceRecord],
    ) -> Result<Vec<Vec<DbMatch>>, BackendError>;
}

// ============================================================================
// Fake backend (deterministic testing + simulation)
// ============================================================================

/// Scripted behavior for one `FakeBackend`.
#[derive(Debug, Clone)]
enum FakeScript {
    /// Predict this label for every sequence with the given confidence
    Predict { label: String, confidence: f64 },
    /// Fail every call with this error
    Fail(BackendError),
}

/// Deterministic in-process backend for tests and the cascade simulator.
/// Mirrors the fake-executor pattern: pre-configured responses, call
/// counting for assertions, optional artificial latency.
pub struct FakeBackend {
    descriptor: BackendDescriptor,
    script: FakeScript,
    delay: Option<Duration>,
    calls: Arc<Mutex<usize>>,
    /// Per-task call counts for finer assertions
    task_calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeBackend {
    /// A backend that always succeeds with `label`.
    pub fn succeeding(descriptor: BackendDescriptor, label: &str, confidence: f64) -> Self {
        Self {
            descriptor,
            script: FakeScript::Predict {
                label: label.to_string(),
                confidence,
            },
            delay: None,
            calls: Arc::new(Mutex::new(0)),
            task_calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A backend that always fails with `error`.
    pub fn failing(descriptor: BackendDescriptor, error: BackendError) -> Self {
        Self {
            descriptor,
            script: FakeScript::Fail(error),
            delay: None,
            calls: Arc::new(Mutex::new(0)),
            task_calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Add artificial latency before responding (drives timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn calls_for_task(&self, task: &str) -> usize {
        self.task_calls
            .lock()
            .unwrap()
            .get(task)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ClassifierBackend for FakeBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn classify(
        &self,
        sequences: &[SequenceRecord],
        task: &str,
        _params: &ClassifyParams,
    ) -> Result<ClassifyResponse, BackendError> {
        {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
        }
        {
            let mut task_calls = self.task_calls.lock().unwrap();
            *task_calls.entry(task.to_string()).or_insert(0) += 1;
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.script {
            FakeScript::Fail(err) => Err(err.clone()),
            FakeScript::Predict { label, confidence } => Ok(ClassifyResponse {
                predictions: sequences
                    .iter()
                    .map(|_| Prediction::new(label.clone(), *confidence))
                    .collect(),
                confidence: *confidence,
                embeddings: None,
            }),
        }
    }
}
