//! Outcome ledger.
//!
//! Append-only record of how each modality fared per task signature, kept as a single
//! JSON-lines file and mirrored in memory. Reads and appends for one signature are
//! serialized by a per-signature lock; appends across signatures share a file lock.

use futures::future::join_all;
use parking_lot::Mutex as SyncMutex;
use reprise_common::error::EngineError;
use reprise_common::protocol::{Modality, OutcomeLedgerEntry, TaskSignature};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type Slot = Arc<Mutex<Vec<OutcomeLedgerEntry>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModalityStats {
    pub attempts: usize,
    pub successes: usize,
    pub detections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_fidelity: Option<f64>,
}

impl ModalityStats {
    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.successes as f64 / self.attempts as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureStats {
    pub signature: TaskSignature,
    pub total: usize,
    pub per_modality: BTreeMap<Modality, ModalityStats>,
}

pub struct OutcomeLedger {
    path: Option<PathBuf>,
    slots: SyncMutex<HashMap<TaskSignature, Slot>>,
    file_lock: Mutex<()>,
}

impl OutcomeLedger {
    /// A ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            slots: SyncMutex::new(HashMap::new()),
            file_lock: Mutex::new(()),
        }
    }

    /// Open (or create on first append) the ledger file and load its entries.
    /// Malformed lines are skipped.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let mut grouped: HashMap<TaskSignature, Vec<OutcomeLedgerEntry>> = HashMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (lineno, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<OutcomeLedgerEntry>(line) {
                        Ok(entry) => grouped
                            .entry(entry.task_signature.clone())
                            .or_default()
                            .push(entry),
                        Err(e) => warn!(
                            "Skipping malformed ledger line {} in {}: {}",
                            lineno + 1,
                            path.display(),
                            e
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(EngineError::persistence(&path, e)),
        }

        let total: usize = grouped.values().map(Vec::len).sum();
        info!(
            "Opened outcome ledger {} ({} entries, {} signatures)",
            path.display(),
            total,
            grouped.len()
        );

        let slots = grouped
            .into_iter()
            .map(|(sig, entries)| (sig, Arc::new(Mutex::new(entries))))
            .collect();
        Ok(Self {
            path: Some(path),
            slots: SyncMutex::new(slots),
            file_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn slot(&self, signature: &TaskSignature) -> Slot {
        self.slots
            .lock()
            .entry(signature.clone())
            .or_default()
            .clone()
    }

    pub async fn append(&self, entry: OutcomeLedgerEntry) -> Result<(), EngineError> {
        let slot = self.slot(&entry.task_signature);
        let mut entries = slot.lock().await;

        if let Some(path) = &self.path {
            let mut line =
                serde_json::to_string(&entry).map_err(|e| EngineError::persistence(path, e))?;
            line.push('\n');

            let _file = self.file_lock.lock().await;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| EngineError::persistence(parent, e))?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|e| EngineError::persistence(path, e))?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| EngineError::persistence(path, e))?;
            file.flush()
                .await
                .map_err(|e| EngineError::persistence(path, e))?;
        }

        debug!(
            "Ledger append {} {} success={} detected={}",
            entry.task_signature, entry.modality, entry.success, entry.detected
        );
        entries.push(entry);
        Ok(())
    }

    /// Every entry for a signature, oldest first.
    pub async fn history(&self, signature: &TaskSignature) -> Vec<OutcomeLedgerEntry> {
        let slot = self.slot(signature);
        let entries = slot.lock().await;
        entries.clone()
    }

    /// Signatures with at least one entry, sorted.
    pub async fn signatures(&self) -> Vec<TaskSignature> {
        let slots: Vec<(TaskSignature, Slot)> = self
            .slots
            .lock()
            .iter()
            .map(|(sig, slot)| (sig.clone(), slot.clone()))
            .collect();
        let mut signatures = Vec::new();
        for (sig, slot) in slots {
            if !slot.lock().await.is_empty() {
                signatures.push(sig);
            }
        }
        signatures.sort();
        signatures
    }

    pub async fn all_stats(&self) -> Vec<SignatureStats> {
        let signatures = self.signatures().await;
        join_all(signatures.iter().map(|sig| self.stats(sig))).await
    }

    pub async fn stats(&self, signature: &TaskSignature) -> SignatureStats {
        let history = self.history(signature).await;
        let mut per_modality: BTreeMap<Modality, ModalityStats> = BTreeMap::new();
        let mut fidelity_sums: BTreeMap<Modality, (f64, usize)> = BTreeMap::new();

        for entry in &history {
            let stats = per_modality.entry(entry.modality).or_default();
            stats.attempts += 1;
            if entry.success {
                stats.successes += 1;
            }
            if entry.detected {
                stats.detections += 1;
            }
            if let Some(score) = entry.fidelity {
                let sum = fidelity_sums.entry(entry.modality).or_insert((0.0, 0));
                sum.0 += score.overall();
                sum.1 += 1;
            }
        }
        for (modality, (sum, count)) in fidelity_sums {
            if let Some(stats) = per_modality.get_mut(&modality) {
                stats.mean_fidelity = Some(sum / count as f64);
            }
        }

        SignatureStats {
            signature: signature.clone(),
            total: history.len(),
            per_modality,
        }
    }
}
