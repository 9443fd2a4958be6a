use crate::protocol::{DetectionSignal, ExecutionResult, Modality, StatePart};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by an automation collaborator through the `PageHandle` boundary.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("Page not ready")]
    NotReady,

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Detection signal: {0}")]
    Detected(DetectionSignal),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Page error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Partial state capture. Absorbed into `BrowserState::diagnostics` by the snapshot
    /// store; only surfaces when a caller asks for a strict capture.
    #[error("Capture degraded ({part}): {reason}")]
    CaptureDegraded { part: StatePart, reason: String },

    #[error("Persistence failure at {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Detection signal: {0}")]
    Detection(DetectionSignal),

    #[error("{modality} timed out after {budget_ms}ms")]
    Timeout { modality: Modality, budget_ms: u64 },

    #[error("All modalities exhausted after {} attempt(s)", attempts.len())]
    Exhausted { attempts: Vec<ExecutionResult> },

    #[error("Run cancelled after {} attempt(s)", attempts.len())]
    Cancelled { attempts: Vec<ExecutionResult> },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn persistence(path: &Path, reason: impl std::fmt::Display) -> Self {
        EngineError::Persistence {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Attempt history carried by a terminal run error.
    pub fn attempts(&self) -> &[ExecutionResult] {
        match self {
            EngineError::Exhausted { attempts } | EngineError::Cancelled { attempts } => attempts,
            _ => &[],
        }
    }
}

impl From<PageError> for EngineError {
    fn from(err: PageError) -> Self {
        match err {
            PageError::Detected(signal) => EngineError::Detection(signal),
            other => EngineError::Execution(other.to_string()),
        }
    }
}
