use crate::config::schema::DecisionConfig;
use reprise_common::protocol::{Modality, OutcomeLedgerEntry};

/// Components of a modality's blended confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub blended: f64,
    pub analysis: f64,
    pub success_rate: f64,
    pub penalty: f64,
}

/// Scores one modality for a task. `history` is every ledger entry for the task's
/// signature, oldest first. Implementations must be deterministic.
pub trait ScoringPolicy: Send + Sync {
    fn score(&self, modality: Modality, analysis_confidence: f64, history: &[OutcomeLedgerEntry]) -> Score;
}

/// Default policy: weighted blend of analysis confidence, smoothed historical success
/// rate, and a detection penalty that decays with the number of attempts since each
/// detection.
#[derive(Debug, Clone)]
pub struct AdaptivePolicy {
    analysis_weight: f64,
    history_weight: f64,
    penalty_weight: f64,
    half_life: f64,
    prior_success_rate: f64,
    prior_weight: f64,
}

impl AdaptivePolicy {
    pub fn new(config: &DecisionConfig) -> Self {
        Self {
            analysis_weight: config.analysis_weight,
            history_weight: config.history_weight,
            penalty_weight: config.penalty_weight,
            half_life: config.detection_half_life,
            prior_success_rate: config.prior_success_rate,
            prior_weight: config.prior_weight,
        }
    }

    /// `(successes + k * prior) / (attempts + k)` over the modality's own entries.
    pub fn success_rate(&self, modality: Modality, history: &[OutcomeLedgerEntry]) -> f64 {
        let (attempts, successes) = history
            .iter()
            .filter(|e| e.modality == modality)
            .fold((0.0, 0.0), |(n, s), e| {
                (n + 1.0, if e.success { s + 1.0 } else { s })
            });
        (successes + self.prior_weight * self.prior_success_rate) / (attempts + self.prior_weight)
    }

    /// `0.5 ^ load`, where each detection of this modality contributes
    /// `0.5 ^ (age / half_life)` and age counts the signature's entries recorded after
    /// it. 1.0 means no recent detections.
    pub fn detection_penalty(&self, modality: Modality, history: &[OutcomeLedgerEntry]) -> f64 {
        if !modality.is_automated() {
            return 1.0;
        }
        let newest = history.len();
        let load: f64 = history
            .iter()
            .enumerate()
            .filter(|(_, e)| e.detected && e.modality == modality)
            .map(|(i, _)| {
                let age = (newest - 1 - i) as f64;
                0.5f64.powf(age / self.half_life)
            })
            .sum();
        0.5f64.powf(load)
    }
}

impl ScoringPolicy for AdaptivePolicy {
    fn score(&self, modality: Modality, analysis_confidence: f64, history: &[OutcomeLedgerEntry]) -> Score {
        let success_rate = self.success_rate(modality, history);
        let penalty = self.detection_penalty(modality, history);
        let blended = self.analysis_weight * analysis_confidence
            + self.history_weight * success_rate
            + self.penalty_weight * penalty;
        Score {
            blended,
            analysis: analysis_confidence,
            success_rate,
            penalty,
        }
    }
}
