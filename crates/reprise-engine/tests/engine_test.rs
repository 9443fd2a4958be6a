mod common;

use common::{MockPage, StubManual};
use reprise_engine::ReplayEngine;
use reprise_engine::analysis::load_analysis;
use reprise_engine::backend::share;
use reprise_engine::config::schema::StorageConfig;
use reprise_engine::config::{ConfigError, ConfigLoader, RepriseConfig};
use reprise_engine::ledger::OutcomeLedger;
use reprise_engine::orchestrator::ProcessApiReplayer;
use reprise_engine::protocol::{
    CaptureLevel, ExecutionStatus, Modality, RecordedAction, ReversibilityAnalysis,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &TempDir) -> RepriseConfig {
    let mut config = RepriseConfig::default();
    config.storage = StorageConfig::with_root(dir.path());
    config.execution.retry_delay_ms = 0;
    config
}

#[tokio::test]
async fn test_record_decide_execute_evaluate() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.recorder.capture_level = CaptureLevel::Visual;
    let ledger = Arc::new(OutcomeLedger::open(config.storage.ledger_file()).await.unwrap());
    let engine = ReplayEngine::with_parts(
        config,
        ledger.clone(),
        Arc::new(ProcessApiReplayer::new(Default::default())),
        StubManual::new(true),
    );

    let recording_page = MockPage::new();
    let session = engine
        .record(
            share(recording_page),
            "search the catalogue",
            vec![
                RecordedAction::navigate("https://shop.example.com"),
                RecordedAction::type_text("#q", "lamp"),
                RecordedAction::click("#search"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(session.capture_level, CaptureLevel::Visual);
    assert!(engine.store().session_path(&session.id).exists());

    let analysis = ReversibilityAnalysis {
        session_id: session.id.clone(),
        confidence: 0.5,
        generated_artifact: None,
        estimated_execution_ms: None,
    };
    let decision = engine.decide(&session, &analysis).await.unwrap();
    assert_eq!(decision.chosen, Modality::HeadlessAutomation);

    let replay_page = MockPage::new();
    let shared = share(replay_page.clone());
    let report = engine.execute(&shared, &session, &decision).await.unwrap();
    assert_eq!(report.result.status, ExecutionStatus::Success);
    assert_eq!(report.attempts.len(), 1);

    let trace = report.result.trace.as_ref().unwrap();
    assert_eq!(trace.completed_steps(), 3);
    assert!(trace.steps.iter().all(|s| s.screenshot.is_some()));
    // State restore lands on the recorded URL before the trace replays.
    assert_eq!(
        replay_page.calls(),
        vec![
            "navigate https://shop.example.com".to_string(),
            "navigate https://shop.example.com".to_string(),
            "type #q lamp".to_string(),
            "click #search".to_string(),
        ]
    );

    let score = engine.evaluate(&session, &report.result).unwrap();
    assert_eq!(score.action_accuracy, 1.0);
    assert_eq!(score.visual_accuracy, 1.0);

    let history = ledger.history(&session.signature()).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].fidelity.map(|f| f.visual_accuracy), Some(1.0));
}

#[tokio::test]
async fn test_open_uses_configured_storage() {
    let dir = TempDir::new().unwrap();
    let engine = ReplayEngine::open(config(&dir), StubManual::new(true))
        .await
        .unwrap();
    assert_eq!(
        engine.ledger().path(),
        Some(dir.path().join("ledger.jsonl").as_path())
    );
    assert_eq!(engine.store().sessions_dir(), dir.path().join("sessions"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_process_replayer_exit_codes() {
    let dir = TempDir::new().unwrap();
    let engine = ReplayEngine::open(
        {
            let mut config = config(&dir);
            config.api_replay.interpreter = "sh".into();
            config.execution.max_retries = 0;
            config
        },
        StubManual::new(false),
    )
    .await
    .unwrap();

    let session = engine
        .record(share(MockPage::new()), "export report", vec![])
        .await
        .unwrap();

    let ok = dir.path().join("ok.sh");
    std::fs::write(&ok, "exit 0\n").unwrap();
    let blocked = dir.path().join("blocked.sh");
    std::fs::write(&blocked, "echo 'HTTP 403' >&2\nexit 3\n").unwrap();

    let analysis = |artifact| ReversibilityAnalysis {
        session_id: session.id.clone(),
        confidence: 0.95,
        generated_artifact: Some(artifact),
        estimated_execution_ms: Some(500),
    };
    let page = share(MockPage::new());

    let decision = engine.decide(&session, &analysis(ok)).await.unwrap();
    assert_eq!(decision.chosen, Modality::ApiReplay);
    let report = engine.execute(&page, &session, &decision).await.unwrap();
    assert_eq!(report.result.modality_used, Modality::ApiReplay);

    let decision = engine.decide(&session, &analysis(blocked)).await.unwrap();
    let err = engine.execute(&page, &session, &decision).await.unwrap_err();
    let attempts = err.attempts();
    let api = attempts
        .iter()
        .find(|a| a.modality_used == Modality::ApiReplay)
        .unwrap();
    assert_eq!(api.status, ExecutionStatus::Detected);
    assert!(api.errors[0].contains("HTTP 403"));
}

#[tokio::test]
async fn test_analysis_document_drives_decision() {
    let dir = TempDir::new().unwrap();
    let engine = ReplayEngine::with_parts(
        config(&dir),
        Arc::new(OutcomeLedger::in_memory()),
        Arc::new(ProcessApiReplayer::new(Default::default())),
        StubManual::new(true),
    );
    let session = engine
        .record(share(MockPage::new()), "no actions", vec![])
        .await
        .unwrap();

    let path = dir.path().join("analysis.json");
    std::fs::write(
        &path,
        format!(
            r#"{{"session_id": "{}", "confidence": 0.9, "generated_artifact": "replay.py"}}"#,
            session.id
        ),
    )
    .unwrap();
    let analysis = load_analysis(&path).await.unwrap();
    let decision = engine.decide(&session, &analysis).await.unwrap();
    assert_eq!(
        decision.modalities(),
        vec![Modality::ApiReplay, Modality::ManualFallback]
    );
    assert_eq!(decision.artifact, Some(dir.path().join("replay.py")));
}

#[test]
fn test_config_defaults_and_overrides() {
    let config = ConfigLoader::parse(
        r#"
decision:
  api_threshold: 0.9
execution:
  api_replay_timeout_ms: 5000
recorder:
  capture_level: visual
storage:
  root: /tmp/reprise-test
"#,
    )
    .unwrap();
    assert_eq!(config.decision.api_threshold, 0.9);
    assert_eq!(config.decision.floor_confidence, 0.3);
    assert_eq!(
        config.execution.timeout_for(Modality::ApiReplay),
        Duration::from_secs(5)
    );
    assert_eq!(
        config.execution.timeout_for(Modality::HeadlessAutomation),
        Duration::from_secs(90)
    );
    assert_eq!(config.recorder.capture_level, CaptureLevel::Visual);
    assert_eq!(
        config.storage.ledger_file(),
        std::path::PathBuf::from("/tmp/reprise-test/ledger.jsonl")
    );

    let empty = ConfigLoader::parse("{}").unwrap();
    assert_eq!(empty.execution.max_retries, 1);
    assert_eq!(empty.api_replay.detected_exit_code, 3);
}

#[test]
fn test_config_rejects_out_of_range_values() {
    let err = ConfigLoader::parse("decision:\n  floor_confidence: 1.5\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    let err = ConfigLoader::parse("decision:\n  detection_half_life: 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(matches!(
        ConfigLoader::parse("decision: [").unwrap_err(),
        ConfigError::Parse(_)
    ));
}
