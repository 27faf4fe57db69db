//! Inference-serving orchestration for biological-sequence classification.
//!
//! Routes classification requests across an ensemble of backends: a
//! weighted model selector ranks candidates, a fallback cascade runs them
//! concurrently with per-tier timeouts, weighted plurality voting merges
//! the survivors, and a predictive cache plus performance feedback loop
//! close the loop between runs.

pub mod backend;
pub mod backends;
pub mod cache;
pub mod cascade;
pub mod config;
pub mod consensus;
pub mod diversity;
pub mod emergency;
pub mod error;
pub mod feedback;
pub mod load;
pub mod orchestrator;
pub mod predictor;
pub mod registry;
pub mod selector;

pub use backend::{
    BackendDescriptor, ClassifierBackend, ClassifyParams, ClassifyResponse, DbMatch, FakeBackend,
    Prediction, Rating, SequenceDatabase, SequenceRecord, Taxonomy, Tier,
};
pub use cache::{CacheConfig, CachedOutcome, FileSnapshotStore, ResultCache, SnapshotStore};
pub use cascade::{CascadeConfig, ExecutionAttempt, ExecutionReport, FallbackCascade};
pub use config::OrchestratorConfig;
pub use consensus::{ConsensusResult, SequenceConsensus};
pub use diversity::DiversitySummary;
pub use error::{BackendError, OrchestratorError};
pub use feedback::{FeedbackConfig, FeedbackStore, PerformanceReport, PerformanceSample, Trend};
pub use load::{FixedLoadProvider, SysinfoLoadProvider, SystemLoadProvider, SystemLoadSnapshot};
pub use orchestrator::{AnalysisOutcome, Orchestrator};
pub use registry::BackendRegistry;
pub use selector::{ModelSelector, ScoredBackend, SelectionConstraints};
