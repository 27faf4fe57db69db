//! Consensus aggregation: weighted plurality voting over backend outputs.
//!
//! Each successful backend casts its static ensemble weight behind its
//! predicted label per sequence. Confidence normalizes by the total weight
//! actually cast by successful backends (the conservative attempted-weight
//! view is exposed separately as `consensus_ratio`). Ties break toward the
//! earliest-registered backend.

use crate::backend::{BackendDescriptor, ClassifyResponse, SequenceRecord, Tier};
use crate::cascade::ExecutionReport;
use crate::diversity::DiversitySummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A successful backend output entering the vote.
#[derive(Debug, Clone)]
pub struct BackendVote {
    pub descriptor: BackendDescriptor,
    /// Registration order, for deterministic tie-breaking
    pub registration_index: usize,
    pub response: ClassifyResponse,
}

/// One backend's contribution to a sequence's vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub backend_id: String,
    pub tier: Tier,
    pub label: String,
    pub weight: f64,
}

/// Merged prediction for one input sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConsensus {
    pub sequence_id: String,
    pub label: String,
    /// Winning weight / total weight cast by successful backends
    pub confidence: f64,
    /// Winning weight / total attempted weight (conservative view)
    pub consensus_ratio: f64,
    pub contributions: Vec<Contribution>,
    /// Low-confidence winner with no reference-database support
    pub novel_candidate: bool,
}

/// The merged answer returned to the caller and written through to the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub request_id: Uuid,
    pub task: String,
    pub completed_at: DateTime<Utc>,
    pub predictions: Vec<SequenceConsensus>,
    /// Tiers that produced at least one successful contribution
    pub tiers_fired: Vec<Tier>,
    pub emergency_mode: bool,
    pub degraded: bool,
    pub diversity: DiversitySummary,
    pub report: ExecutionReport,
}

/// Fold votes into per-sequence consensus. `attempted_weight` is the summed
/// weight of every backend that was dispatched, successful or not.
pub fn compute_consensus(
    sequences: &[SequenceRecord],
    votes: &[BackendVote],
    attempted_weight: f64,
) -> Vec<SequenceConsensus> {
    sequences
        .iter()
        .enumerate()
        .map(|(i, seq)| consensus_for_sequence(seq, i, votes, attempted_weight))
        .collect()
}

fn consensus_for_sequence(
    seq: &SequenceRecord,
    index: usize,
    votes: &[BackendVote],
    attempted_weight: f64,
) -> SequenceConsensus {
    // label -> (summed weight, earliest registration index among its voters)
    let mut tally: HashMap<&str, (f64, usize)> = HashMap::new();
    let mut contributions = Vec::new();
    let mut total_cast = 0.0;

    for vote in votes {
        let Some(prediction) = vote.response.predictions.get(index) else {
            continue;
        };
        // Databases report unmatched sequences with an empty label; those
        // are absent evidence, not votes.
        if prediction.label.is_empty() {
            continue;
        }

        let weight = vote.descriptor.weight;
        total_cast += weight;
        let entry = tally
            .entry(prediction.label.as_str())
            .or_insert((0.0, vote.registration_index));
        entry.0 += weight;
        entry.1 = entry.1.min(vote.registration_index);

        contributions.push(Contribution {
            backend_id: vote.descriptor.id.clone(),
            tier: vote.descriptor.tier,
            label: prediction.label.clone(),
            weight,
        });
    }

    if tally.is_empty() {
        return SequenceConsensus {
            sequence_id: seq.id.clone(),
            label: "Unclassified".to_string(),
            confidence: 0.0,
            consensus_ratio: 0.0,
            contributions,
            novel_candidate: false,
        };
    }

    // Highest summed weight wins; ties go to the label whose earliest
    // voter registered first.
    let (label, (winning_weight, _)) = tally
        .into_iter()
        .max_by(|(_, (wa, ia)), (_, (wb, ib))| {
            wa.partial_cmp(wb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ib.cmp(ia))
        })
        .expect("tally is non-empty");

    let confidence = if total_cast > 0.0 {
        winning_weight / total_cast
    } else {
        0.0
    };
    let consensus_ratio = if attempted_weight > 0.0 {
        winning_weight / attempted_weight
    } else {
        confidence
    };

    let db_supported = contributions
        .iter()
        .any(|c| c.tier == Tier::Database && c.label == label);
    let novel_candidate = confidence < 0.5 && !db_supported;

    SequenceConsensus {
        sequence_id: seq.id.clone(),
        label: label.to_string(),
        confidence,
        consensus_ratio,
        contributions,
        novel_candidate,
    }
}

/// Tiers that contributed at least one successful vote, in cascade order.
pub fn tiers_fired(votes: &[BackendVote]) -> Vec<Tier> {
    let order = [
        Tier::PrimaryRemote,
        Tier::SecondaryRemote,
        Tier::Database,
        Tier::Local,
        Tier::Emergency,
    ];
    order
        .into_iter()
        .filter(|t| votes.iter().any(|v| v.descriptor.tier == *t))
        .collect()
}
