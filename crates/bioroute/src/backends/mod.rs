//! Reference backend adapters.
//!
//! `ollama` speaks the local Ollama HTTP API; `refdb` is the in-memory
//! curated reference database behind the `SequenceDatabase` trait. Both
//! plug into the registry through `ClassifierBackend`.

pub mod ollama;
pub mod refdb;

pub use ollama::{OllamaBackend, OllamaConfig};
pub use refdb::{CuratedReferenceDb, DatabaseBackend};
