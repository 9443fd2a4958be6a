//! Reversibility analysis input.
//!
//! The analysis is produced outside the engine (traffic inspection plus artifact
//! generation) and handed over as a JSON document.

use reprise_common::error::EngineError;
use reprise_common::protocol::ReversibilityAnalysis;
use std::path::Path;
use tracing::debug;

/// Load an analysis document. A relative `generated_artifact` is resolved against the
/// directory holding the document.
pub async fn load_analysis(path: &Path) -> Result<ReversibilityAnalysis, EngineError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EngineError::persistence(path, e))?;
    let mut analysis: ReversibilityAnalysis =
        serde_json::from_str(&content).map_err(|e| EngineError::persistence(path, e))?;

    let resolved = match (&analysis.generated_artifact, path.parent()) {
        (Some(artifact), Some(dir)) if artifact.is_relative() => Some(dir.join(artifact)),
        _ => None,
    };
    if resolved.is_some() {
        analysis.generated_artifact = resolved;
    }
    debug!(
        "Loaded analysis for session {} (confidence {:.2})",
        analysis.session_id, analysis.confidence
    );
    Ok(analysis)
}
