use chrono::Utc;
use futures::future::join_all;
use reprise_engine::ledger::OutcomeLedger;
use reprise_engine::protocol::{FidelityScore, Modality, OutcomeLedgerEntry, TaskSignature};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

fn signature(task: &str) -> TaskSignature {
    TaskSignature::compute(task, &BTreeSet::from(["example.com".to_string()]))
}

fn entry(sig: &TaskSignature, modality: Modality, success: bool) -> OutcomeLedgerEntry {
    OutcomeLedgerEntry {
        task_signature: sig.clone(),
        modality,
        confidence: 0.6,
        success,
        detected: false,
        fidelity: None,
        recorded_at: Utc::now(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_are_all_kept() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let ledger = Arc::new(OutcomeLedger::open(&path).await.unwrap());
    let a = signature("task a");
    let b = signature("task b");

    let tasks = (0..40).map(|i| {
        let ledger = ledger.clone();
        let sig = if i % 2 == 0 { a.clone() } else { b.clone() };
        tokio::spawn(async move {
            ledger
                .append(entry(&sig, Modality::HeadlessAutomation, i % 3 == 0))
                .await
        })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(ledger.history(&a).await.len(), 20);
    assert_eq!(ledger.history(&b).await.len(), 20);

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 40);

    let reopened = OutcomeLedger::open(&path).await.unwrap();
    assert_eq!(reopened.history(&a).await.len(), 20);
    assert_eq!(reopened.signatures().await.len(), 2);
}

#[tokio::test]
async fn test_history_is_append_ordered() {
    let ledger = OutcomeLedger::in_memory();
    let sig = signature("ordered");
    for modality in [
        Modality::ApiReplay,
        Modality::HeadlessAutomation,
        Modality::ManualFallback,
    ] {
        ledger.append(entry(&sig, modality, true)).await.unwrap();
    }
    let history = ledger.history(&sig).await;
    assert_eq!(
        history.iter().map(|e| e.modality).collect::<Vec<_>>(),
        Modality::ALL.to_vec()
    );
    assert!(ledger.path().is_none());
    assert!(ledger.history(&signature("unknown")).await.is_empty());
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let sig = signature("partial");
    let good = serde_json::to_string(&entry(&sig, Modality::ApiReplay, true)).unwrap();
    std::fs::write(&path, format!("{}\n{{\"truncated\n\n{}\n", good, good)).unwrap();

    let ledger = OutcomeLedger::open(&path).await.unwrap();
    assert_eq!(ledger.history(&sig).await.len(), 2);
}

#[tokio::test]
async fn test_missing_file_opens_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("ledger.jsonl");
    let ledger = OutcomeLedger::open(&path).await.unwrap();
    assert!(ledger.signatures().await.is_empty());

    let sig = signature("first");
    ledger
        .append(entry(&sig, Modality::ManualFallback, true))
        .await
        .unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn test_stats_per_modality() {
    let ledger = OutcomeLedger::in_memory();
    let sig = signature("stats");
    ledger
        .append(entry(&sig, Modality::HeadlessAutomation, false))
        .await
        .unwrap();
    let mut scored = entry(&sig, Modality::HeadlessAutomation, true);
    scored.fidelity = Some(FidelityScore {
        action_accuracy: 1.0,
        timing_accuracy: 0.5,
        visual_accuracy: 0.0,
    });
    ledger.append(scored).await.unwrap();
    let mut detected = entry(&sig, Modality::ApiReplay, false);
    detected.detected = true;
    ledger.append(detected).await.unwrap();

    let stats = ledger.stats(&sig).await;
    assert_eq!(stats.total, 3);
    let headless = &stats.per_modality[&Modality::HeadlessAutomation];
    assert_eq!(headless.attempts, 2);
    assert_eq!(headless.successes, 1);
    assert_eq!(headless.success_rate(), Some(0.5));
    assert_eq!(headless.mean_fidelity, Some(0.5));
    assert_eq!(stats.per_modality[&Modality::ApiReplay].detections, 1);
    assert!(!stats.per_modality.contains_key(&Modality::ManualFallback));

    let all = ledger.all_stats().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0], stats);
}
