//! In-memory curated reference database.
//!
//! Stands in for a local BLAST installation: a small table of known
//! accession -> species answers, matched by exact record id or by sequence
//! prefix. `DatabaseBackend` adapts any `SequenceDatabase` into the
//! cascade; unmatched sequences come back with an empty label (absent
//! evidence, not a vote), and a batch with no matches at all is a typed
//! failure so the tier registers as missed.

use crate::backend::{
    BackendDescriptor, ClassifierBackend, ClassifyParams, ClassifyResponse, DbMatch, Prediction,
    SequenceRecord, SequenceDatabase,
};
use crate::error::BackendError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const EXACT_ID_IDENTITY: f64 = 1.0;
const PREFIX_IDENTITY: f64 = 0.97;

#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub accession: String,
    pub species: String,
    /// Leading bases for sequence-level matching, when known
    pub prefix: Option<String>,
}

/// Curated accession -> species table.
#[derive(Debug, Clone, Default)]
pub struct CuratedReferenceDb {
    entries: Vec<ReferenceEntry>,
}

impl CuratedReferenceDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// The seeded marine reference set.
    pub fn with_defaults() -> Self {
        let mut db = Self::new();
        db.add("MK816439.1", "Penaeus indicus (Indian White Prawn)", None);
        db.add("LC503083.1", "Rastrelliger kanagurta (Indian Mackerel)", None);
        db.add("MG51786.1", "Melanocetus johnsonii (Humpback Anglerfish)", None);
        db.add("ON944158.1", "Chaetoceros sp. (Pollution-Indicating Diatom)", None);
        db
    }

    pub fn add(&mut self, accession: &str, species: &str, prefix: Option<&str>) {
        self.entries.push(ReferenceEntry {
            accession: accession.to_string(),
            species: species.to_string(),
            prefix: prefix.map(str::to_string),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matches_for(&self, seq: &SequenceRecord) -> Vec<DbMatch> {
        let mut matches = Vec::new();
        for entry in &self.entries {
            if entry.accession == seq.id {
                matches.push(DbMatch {
                    accession: entry.accession.clone(),
                    species: entry.species.clone(),
                    identity: EXACT_ID_IDENTITY,
                });
                continue;
            }
            if let Some(prefix) = &entry.prefix {
                if !prefix.is_empty() && seq.sequence.starts_with(prefix.as_str()) {
                    matches.push(DbMatch {
                        accession: entry.accession.clone(),
                        species: entry.species.clone(),
                        identity: PREFIX_IDENTITY,
                    });
                }
            }
        }
        matches.sort_by(|a, b| {
            b.identity
                .partial_cmp(&a.identity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches
    }
}

#[async_trait]
impl SequenceDatabase for CuratedReferenceDb {
    async fn search(
        &self,
        sequences: &[SequenceRecord],
    ) -> Result<Vec<Vec<DbMatch>>, BackendError> {
        Ok(sequences.iter().map(|s| self.matches_for(s)).collect())
    }
}

/// Adapts a `SequenceDatabase` into the cascade as a database-tier backend.
pub struct DatabaseBackend {
    descriptor: BackendDescriptor,
    db: Arc<dyn SequenceDatabase>,
}

impl DatabaseBackend {
    pub fn new(descriptor: BackendDescriptor, db: Arc<dyn SequenceDatabase>) -> Self {
        Self { descriptor, db }
    }
}

#[async_trait]
impl ClassifierBackend for DatabaseBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn classify(
        &self,
        sequences: &[SequenceRecord],
        task: &str,
        _params: &ClassifyParams,
    ) -> Result<ClassifyResponse, BackendError> {
        if sequences.is_empty() {
            return Err(BackendError::MalformedInput("empty batch".to_string()));
        }
        let per_sequence = self.db.search(sequences).await?;
        if per_sequence.len() != sequences.len() {
            return Err(BackendError::MalformedResponse(format!(
                "database returned {} result sets for {} sequences",
                per_sequence.len(),
                sequences.len()
            )));
        }

        let mut predictions = Vec::with_capacity(sequences.len());
        let mut matched = 0usize;
        let mut identity_sum = 0.0;
        for matches in &per_sequence {
            match matches.first() {
                Some(best) => {
                    matched += 1;
                    identity_sum += best.identity;
                    predictions.push(Prediction::new(best.species.clone(), best.identity));
                }
                // Absent evidence: the consensus skips empty labels.
                None => predictions.push(Prediction::new("", 0.0)),
            }
        }

        if matched == 0 {
            return Err(BackendError::Unavailable(
                "no reference matches for batch".to_string(),
            ));
        }
        debug!(backend = %self.descriptor.id, task, matched, total = sequences.len(), "reference db lookup");

        Ok(ClassifyResponse {
            predictions,
            confidence: identity_sum / matched as f64,
            embeddings: None,
        })
    }
}
