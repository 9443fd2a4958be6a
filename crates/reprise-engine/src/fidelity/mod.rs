//! Replay fidelity evaluator.

pub mod visual;

use reprise_common::error::EngineError;
use reprise_common::protocol::{ExecutionResult, FidelityScore, Modality, ReplayTrace, Session};
use std::collections::HashMap;
use tracing::info;

/// Share of recorded actions the replay completed. 1.0 when nothing was recorded.
pub fn action_accuracy(recorded: usize, completed: usize) -> f64 {
    if recorded == 0 {
        return 1.0;
    }
    (completed.min(recorded) as f64 / recorded as f64).clamp(0.0, 1.0)
}

/// `1 - min(1, |observed - recorded| / recorded)`.
pub fn timing_accuracy(recorded_ms: u64, observed_ms: u64) -> f64 {
    if recorded_ms == 0 {
        return if observed_ms == 0 { 1.0 } else { 0.0 };
    }
    let deviation = recorded_ms.abs_diff(observed_ms) as f64 / recorded_ms as f64;
    (1.0 - deviation.min(1.0)).clamp(0.0, 1.0)
}

/// Mean screenshot similarity over recorded steps that have a screenshot. A step the
/// replay has no screenshot for scores 0. 1.0 when the recording has no screenshots.
pub fn visual_accuracy(session: &Session, trace: &ReplayTrace) -> f64 {
    let replayed: HashMap<usize, &std::path::Path> = trace
        .steps
        .iter()
        .filter_map(|s| s.screenshot.as_deref().map(|p| (s.index, p)))
        .collect();

    let scores: Vec<f64> = session
        .actions
        .iter()
        .filter_map(|a| a.screenshot.as_deref().map(|p| (a.index, p)))
        .map(|(index, recorded)| match replayed.get(&index) {
            Some(replay) => visual::similarity_files(recorded, replay),
            None => 0.0,
        })
        .collect();

    if scores.is_empty() {
        return 1.0;
    }
    (scores.iter().sum::<f64>() / scores.len() as f64).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Default)]
pub struct FidelityEvaluator;

impl FidelityEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Score a successful headless replay against its recording. Other modalities do not
    /// produce a comparable trace.
    pub fn evaluate(
        &self,
        session: &Session,
        result: &ExecutionResult,
    ) -> Result<FidelityScore, EngineError> {
        if !result.is_success() {
            return Err(EngineError::InvalidState(format!(
                "fidelity is only computed for successful runs, got {:?}",
                result.status
            )));
        }
        if result.modality_used != Modality::HeadlessAutomation {
            return Err(EngineError::InvalidState(format!(
                "{} does not produce a comparable action trace",
                result.modality_used
            )));
        }
        let trace = result.trace.as_ref().ok_or_else(|| {
            EngineError::InvalidState("headless result carries no replay trace".into())
        })?;

        let score = FidelityScore {
            action_accuracy: action_accuracy(session.actions.len(), trace.completed_steps()),
            timing_accuracy: timing_accuracy(session.duration_ms, trace.duration_ms),
            visual_accuracy: visual_accuracy(session, trace),
        };
        info!(
            "Fidelity for session {}: actions {:.2}, timing {:.2}, visual {:.2}",
            session.id, score.action_accuracy, score.timing_accuracy, score.visual_accuracy
        );
        Ok(score)
    }
}
