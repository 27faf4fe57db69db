//! Disk-backed state survives orchestrator restarts.

use bioroute::backend::{BackendDescriptor, FakeBackend, SequenceRecord, Tier};
use bioroute::config::OrchestratorConfig;
use bioroute::load::FixedLoadProvider;
use bioroute::orchestrator::Orchestrator;
use bioroute::registry::BackendRegistry;
use bioroute::selector::SelectionConstraints;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TASK: &str = "species_classification";

fn sequences() -> Vec<SequenceRecord> {
    vec![SequenceRecord::new("s1", "ACGT".repeat(150))]
}

fn config_with_state(dir: &Path) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.cache.snapshot_path = Some(dir.join("cache.json"));
    config.cache.persist_probability = 0.0;
    config.feedback.persist_path = Some(dir.join("feedback.jsonl"));
    config.feedback.persist_probability = 0.0;
    config.prewarm.enabled = false;
    config
}

fn orchestrator(dir: &Path, backend: Arc<FakeBackend>) -> Orchestrator {
    Orchestrator::new(
        config_with_state(dir),
        Arc::new(BackendRegistry::builder().register(backend).build().unwrap()),
        Arc::new(FixedLoadProvider::idle()),
    )
}

fn fake() -> Arc<FakeBackend> {
    Arc::new(FakeBackend::succeeding(
        BackendDescriptor::new("l1", Tier::Local, 0.3).with_capabilities(&[TASK]),
        "SpeciesX",
        0.9,
    ))
}

#[tokio::test]
async fn cache_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let first_backend = fake();
    let orch = orchestrator(dir.path(), Arc::clone(&first_backend));
    orch.analyze(TASK, "c1", &sequences(), &SelectionConstraints::default())
        .await
        .unwrap();
    orch.shutdown().unwrap();
    assert_eq!(first_backend.call_count(), 1);

    // A fresh orchestrator rehydrates the snapshot: no backend call needed.
    let second_backend = fake();
    let orch = orchestrator(dir.path(), Arc::clone(&second_backend));
    let outcome = orch
        .analyze(TASK, "c1", &sequences(), &SelectionConstraints::default())
        .await
        .unwrap();

    assert!(outcome.cache_hit);
    assert_eq!(outcome.result.predictions[0].label, "SpeciesX");
    assert_eq!(second_backend.call_count(), 0);
}

#[tokio::test]
async fn feedback_log_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let orch = orchestrator(dir.path(), fake());
    orch.analyze(TASK, "c1", &sequences(), &SelectionConstraints::default())
        .await
        .unwrap();
    orch.shutdown().unwrap();

    let orch = orchestrator(dir.path(), fake());
    let report = orch.performance_report(Duration::from_secs(3600));
    let perf = report.get("l1").expect("persisted samples reloaded");
    assert_eq!(perf.sample_count, 1);
    assert_eq!(perf.success_rate, 1.0);
}

#[tokio::test]
async fn corrupt_state_files_degrade_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cache.json"), "{broken").unwrap();
    std::fs::write(dir.path().join("feedback.jsonl"), "not json\n").unwrap();

    // Construction succeeds and the pipeline runs from scratch.
    let backend = fake();
    let orch = orchestrator(dir.path(), Arc::clone(&backend));
    let outcome = orch
        .analyze(TASK, "c1", &sequences(), &SelectionConstraints::default())
        .await
        .unwrap();

    assert!(!outcome.cache_hit);
    assert_eq!(backend.call_count(), 1);
}
