use chrono::Utc;
use proptest::prelude::*;
use reprise_common::error::{EngineError, PageError};
use reprise_common::protocol::{
    BrowserState, Cookie, DetectionKind, DetectionSignal, ExecutionResult, ExecutionStatus,
    FidelityScore, Modality, OutcomeLedgerEntry, TaskSignature,
};
use std::collections::BTreeSet;

#[test]
fn test_browser_state_json_roundtrip_keeps_diagnostics() {
    let mut state = BrowserState::empty("sess-1");
    state.cookies.push(Cookie::new("sid", "example.com", "abc"));
    state.local_storage.insert("theme".into(), "dark".into());
    state.diagnostics.push(reprise_common::protocol::CaptureDiagnostic {
        part: reprise_common::protocol::StatePart::IndexedDb,
        message: "indexedDB.databases unavailable".into(),
    });

    let json = serde_json::to_string(&state).unwrap();
    let back: BrowserState = serde_json::from_str(&json).unwrap();
    assert_eq!(back, state);
    assert!(back.is_degraded());
}

#[test]
fn test_cookie_defaults_when_fields_missing() {
    let cookie: Cookie =
        serde_json::from_str(r#"{"name":"a","value":"1","domain":"x"}"#).unwrap();
    assert_eq!(cookie.path, "/");
    assert!(!cookie.secure);
    assert!(cookie.expires.is_none());
}

#[test]
fn test_exhausted_error_carries_attempts() {
    let attempt = ExecutionResult {
        modality_used: Modality::ApiReplay,
        status: ExecutionStatus::Failure,
        duration_ms: 12,
        errors: vec!["boom".into()],
        attempt_index: 0,
        retries: 1,
        trace: None,
    };
    let err = EngineError::Exhausted {
        attempts: vec![attempt.clone()],
    };
    assert_eq!(err.attempts(), &[attempt]);
    assert_eq!(err.to_string(), "All modalities exhausted after 1 attempt(s)");
}

#[test]
fn test_page_detection_maps_to_engine_detection() {
    let signal = DetectionSignal::new(DetectionKind::Captcha, "recaptcha iframe");
    let err: EngineError = PageError::Detected(signal.clone()).into();
    assert!(matches!(err, EngineError::Detection(s) if s == signal));

    let err: EngineError = PageError::ElementNotFound("#login".into()).into();
    assert!(matches!(err, EngineError::Execution(_)));
}

#[test]
fn test_ledger_entry_serialization() {
    let entry = OutcomeLedgerEntry {
        task_signature: TaskSignature::compute("download report", &BTreeSet::new()),
        modality: Modality::HeadlessAutomation,
        confidence: 0.7,
        success: true,
        detected: false,
        fidelity: Some(FidelityScore {
            action_accuracy: 1.0,
            timing_accuracy: 0.5,
            visual_accuracy: 0.75,
        }),
        recorded_at: Utc::now(),
    };
    let line = serde_json::to_string(&entry).unwrap();
    assert!(line.contains("\"modality\":\"headless-automation\""));
    let back: OutcomeLedgerEntry = serde_json::from_str(&line).unwrap();
    assert_eq!(back, entry);
}

proptest! {
    #[test]
    fn prop_fidelity_overall_within_bounds(
        a in 0.0f64..=1.0,
        t in 0.0f64..=1.0,
        v in 0.0f64..=1.0,
    ) {
        let score = FidelityScore { action_accuracy: a, timing_accuracy: t, visual_accuracy: v };
        let overall = score.overall();
        prop_assert!((0.0..=1.0).contains(&overall));
    }
}
