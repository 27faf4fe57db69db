//! Emergency tier: deterministic, model-free classification.
//!
//! Fires only when every learned backend has failed. Rule-based over basic
//! sequence statistics (GC content, length, ambiguity) - no randomness, so
//! the same input always yields the same degraded answer.

use crate::backend::{ClassifyResponse, Prediction, SequenceRecord};

/// Backend id reported for emergency contributions.
pub const EMERGENCY_BACKEND_ID: &str = "emergency-heuristic";

/// Fixed confidence for heuristic labels; explicitly low so downstream
/// consumers can tell degraded output apart.
pub const EMERGENCY_CONFIDENCE: f64 = 0.3;

/// Classify by composition statistics. Always succeeds.
pub fn classify_heuristic(sequences: &[SequenceRecord]) -> ClassifyResponse {
    let predictions = sequences
        .iter()
        .map(|seq| Prediction::new(heuristic_label(seq), EMERGENCY_CONFIDENCE))
        .collect();
    ClassifyResponse {
        predictions,
        confidence: EMERGENCY_CONFIDENCE,
        embeddings: None,
    }
}

/// Coarse label from GC fraction and length buckets.
pub fn heuristic_label(seq: &SequenceRecord) -> String {
    if seq.is_empty() || seq.ambiguous_fraction() > 0.5 {
        return "Ambiguous sequence (heuristic)".to_string();
    }
    if seq.len() < 100 {
        return "Unclassified short fragment (heuristic)".to_string();
    }

    let gc = seq.gc_fraction();
    if gc > 0.60 {
        "High-GC prokaryote (heuristic)".to_string()
    } else if gc < 0.35 {
        "AT-rich eukaryote (heuristic)".to_string()
    } else if seq.len() >= 1000 {
        "Unclassified eukaryote (heuristic)".to_string()
    } else {
        "Unclassified marker fragment (heuristic)".to_string()
    }
}
