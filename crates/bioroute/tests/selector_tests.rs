//! Selection behavior against a populated registry.

use bioroute::backend::{BackendDescriptor, FakeBackend, Rating, SequenceRecord, Tier};
use bioroute::feedback::{FeedbackStore, PerformanceSample};
use bioroute::load::FixedLoadProvider;
use bioroute::registry::BackendRegistry;
use bioroute::selector::{ModelSelector, SelectionConstraints};
use bioroute::OrchestratorError;
use chrono::Utc;
use std::sync::Arc;

const TASK: &str = "species_classification";

fn descriptor(id: &str, tier: Tier, weight: f64) -> BackendDescriptor {
    BackendDescriptor::new(id, tier, weight).with_capabilities(&[TASK])
}

fn registry(descriptors: Vec<BackendDescriptor>) -> Arc<BackendRegistry> {
    let mut builder = BackendRegistry::builder();
    for d in descriptors {
        builder = builder.register(Arc::new(FakeBackend::succeeding(d, "X", 0.9)));
    }
    Arc::new(builder.build().unwrap())
}

fn sequences() -> Vec<SequenceRecord> {
    vec![SequenceRecord::new("s1", "ACGT".repeat(150))]
}

#[test]
fn unsupported_task_errors() {
    let selector = ModelSelector::new(
        registry(vec![descriptor("b1", Tier::Local, 0.3)]),
        Arc::new(FeedbackStore::in_memory()),
        Arc::new(FixedLoadProvider::idle()),
    );
    let err = selector
        .select("protein_folding", "c1", &sequences(), &SelectionConstraints::default())
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NoCandidateBackends { .. }));
}

#[test]
fn scores_stay_within_bounds() {
    let selector = ModelSelector::new(
        registry(vec![
            descriptor("r1", Tier::PrimaryRemote, 0.4)
                .with_profile(Rating::Low, Rating::VeryHigh, Rating::VeryHigh)
                .with_cost(5.0),
            descriptor("l1", Tier::Local, 0.15)
                .with_profile(Rating::VeryHigh, Rating::Low, Rating::Low),
        ]),
        Arc::new(FeedbackStore::in_memory()),
        Arc::new(FixedLoadProvider::saturated()),
    );
    let constraints = SelectionConstraints {
        max_backends: 5,
        budget: Some(0.01),
    };
    let scored = selector.select(TASK, "c1", &sequences(), &constraints).unwrap();
    for s in &scored {
        assert!((0.0..=100.0).contains(&s.score), "score {} out of range", s.score);
    }
}

#[test]
fn high_load_prefers_frugal_backends() {
    let heavy = descriptor("heavy", Tier::PrimaryRemote, 0.4)
        .with_profile(Rating::Medium, Rating::High, Rating::VeryHigh);
    let frugal = descriptor("frugal", Tier::Local, 0.15)
        .with_profile(Rating::Medium, Rating::High, Rating::Low);
    let reg = registry(vec![heavy, frugal]);
    let feedback = Arc::new(FeedbackStore::in_memory());

    let idle = ModelSelector::new(
        Arc::clone(&reg),
        Arc::clone(&feedback),
        Arc::new(FixedLoadProvider::idle()),
    );
    let saturated = ModelSelector::new(reg, feedback, Arc::new(FixedLoadProvider::saturated()));

    let relaxed = idle
        .select(TASK, "c1", &sequences(), &SelectionConstraints::default())
        .unwrap();
    let stressed = saturated
        .select(TASK, "c1", &sequences(), &SelectionConstraints::default())
        .unwrap();

    assert_eq!(relaxed[0].descriptor.id, "heavy");
    assert_eq!(stressed[0].descriptor.id, "frugal");
}

#[test]
fn max_backends_truncates_shortlist() {
    let reg = registry(
        (0..8)
            .map(|i| descriptor(&format!("b{}", i), Tier::Local, 0.1))
            .collect(),
    );
    let selector = ModelSelector::new(
        reg,
        Arc::new(FeedbackStore::in_memory()),
        Arc::new(FixedLoadProvider::idle()),
    );
    let constraints = SelectionConstraints {
        max_backends: 3,
        budget: None,
    };
    let scored = selector.select(TASK, "c1", &sequences(), &constraints).unwrap();
    assert_eq!(scored.len(), 3);
}

#[test]
fn feedback_shifts_the_ranking() {
    let reg = registry(vec![
        descriptor("flaky", Tier::Local, 0.15),
        descriptor("solid", Tier::Local, 0.15),
    ]);
    let feedback = Arc::new(FeedbackStore::in_memory());

    // Identical descriptors; only their track record differs.
    for _ in 0..20 {
        feedback.record(PerformanceSample {
            backend_id: "flaky".to_string(),
            at: Utc::now(),
            latency_ms: 900,
            accuracy: Some(0.3),
            success: false,
            tier: Some(Tier::Local),
            metadata: None,
        });
        feedback.record(PerformanceSample {
            backend_id: "solid".to_string(),
            at: Utc::now(),
            latency_ms: 120,
            accuracy: Some(0.95),
            success: true,
            tier: Some(Tier::Local),
            metadata: None,
        });
    }

    let selector = ModelSelector::new(reg, feedback, Arc::new(FixedLoadProvider::idle()));
    let scored = selector
        .select(TASK, "c1", &sequences(), &SelectionConstraints::default())
        .unwrap();
    assert_eq!(scored[0].descriptor.id, "solid");
    assert!(scored[0].score > scored[1].score);
}

#[test]
fn caller_preferences_shift_the_ranking() {
    let reg = registry(vec![
        descriptor("a", Tier::Local, 0.15),
        descriptor("b", Tier::Local, 0.15),
    ]);
    let feedback = Arc::new(FeedbackStore::in_memory());
    feedback.avoid("c1", "a");
    feedback.prefer("c1", "b");

    let selector = ModelSelector::new(reg, feedback, Arc::new(FixedLoadProvider::idle()));
    let scored = selector
        .select(TASK, "c1", &sequences(), &SelectionConstraints::default())
        .unwrap();
    assert_eq!(scored[0].descriptor.id, "b");

    // A different caller sees neutral scores and registration order.
    let scored = selector
        .select(TASK, "other", &sequences(), &SelectionConstraints::default())
        .unwrap();
    assert_eq!(scored[0].descriptor.id, "a");
}

#[test]
fn selections_are_recorded_as_events() {
    let selector = ModelSelector::new(
        registry(vec![descriptor("b1", Tier::Local, 0.3)]),
        Arc::new(FeedbackStore::in_memory()),
        Arc::new(FixedLoadProvider::idle()),
    );
    for _ in 0..3 {
        selector
            .select(TASK, "c1", &sequences(), &SelectionConstraints::default())
            .unwrap();
    }
    assert_eq!(selector.event_count(), 3);
    let events = selector.recent_events(2);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].chosen, vec!["b1".to_string()]);
}
