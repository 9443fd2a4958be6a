//! Modality decision engine.
//!
//! Ranks the execution modalities for a recorded session by blended confidence and
//! returns the ordered candidate list: the head is the modality to run, the tail is the
//! fallback chain.

pub mod policy;

pub use policy::{AdaptivePolicy, Score, ScoringPolicy};

use crate::config::schema::DecisionConfig;
use crate::ledger::OutcomeLedger;
use chrono::Utc;
use reprise_common::error::EngineError;
use reprise_common::protocol::{
    Candidate, Modality, ModalityDecision, OutcomeLedgerEntry, ReversibilityAnalysis, Session,
};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub const FLOOR_NOT_MET: &str = "floor-confidence not met; defaulting to safest modality";

pub const NO_AUTOMATED: &str = "no automated modality applicable";

pub struct DecisionEngine {
    config: DecisionConfig,
    policy: Arc<dyn ScoringPolicy>,
    ledger: Arc<OutcomeLedger>,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig, ledger: Arc<OutcomeLedger>) -> Self {
        let policy = Arc::new(AdaptivePolicy::new(&config));
        Self::with_policy(config, policy, ledger)
    }

    pub fn with_policy(
        config: DecisionConfig,
        policy: Arc<dyn ScoringPolicy>,
        ledger: Arc<OutcomeLedger>,
    ) -> Self {
        Self {
            config,
            policy,
            ledger,
        }
    }

    /// Decide using the ledger's current history for the session's signature.
    pub async fn decide(
        &self,
        session: &Session,
        analysis: &ReversibilityAnalysis,
    ) -> Result<ModalityDecision, EngineError> {
        let history = self.ledger.history(&session.signature()).await;
        self.decide_with_history(session, analysis, &history)
    }

    /// Pure decision over an explicit ledger snapshot.
    pub fn decide_with_history(
        &self,
        session: &Session,
        analysis: &ReversibilityAnalysis,
        history: &[OutcomeLedgerEntry],
    ) -> Result<ModalityDecision, EngineError> {
        if analysis.session_id != session.id {
            return Err(EngineError::InvalidState(format!(
                "analysis is for session {}, not {}",
                analysis.session_id, session.id
            )));
        }

        let confidence = sanitize_confidence(analysis.confidence);
        let mut notes = Vec::new();
        let mut scored: Vec<(Candidate, Score)> = Vec::new();
        let mut manual = None;

        for modality in Modality::ALL {
            if let Some(reason) = self.exclusion(modality, session, analysis, confidence) {
                notes.push(format!("{} excluded: {}", modality, reason));
                continue;
            }
            let score = self.policy.score(modality, confidence, history);
            let candidate = Candidate {
                modality,
                expected_confidence: score.blended,
                expected_cost_ms: self.expected_cost(modality, session, analysis),
            };
            if modality.is_automated() {
                scored.push((candidate, score));
            } else {
                manual = Some((candidate, score));
            }
        }

        // Only automated modalities compete; manual fallback is the last resort.
        scored.sort_by(|(a, _), (b, _)| rank(a, b));

        let floor_met = scored
            .iter()
            .any(|(c, _)| c.expected_confidence >= self.config.floor_confidence);

        let mut reasoning = Vec::new();
        match manual {
            Some(manual) if floor_met => scored.push(manual),
            Some(manual) => {
                reasoning.push(if scored.is_empty() {
                    NO_AUTOMATED.to_string()
                } else {
                    FLOOR_NOT_MET.to_string()
                });
                scored.insert(0, manual);
            }
            None => {}
        }

        let (head, score) = scored
            .first()
            .ok_or_else(|| EngineError::InvalidState("no candidate modality".into()))?;
        let chosen = head.modality;
        reasoning.push(format!(
            "chose {} (blended {:.3}: analysis {:.2}, history {:.2}, penalty {:.2}; cost {}ms)",
            chosen, head.expected_confidence, score.analysis, score.success_rate, score.penalty,
            head.expected_cost_ms
        ));
        reasoning.extend(notes);
        if let Some((next, _)) = scored.get(1) {
            reasoning.push(format!(
                "fallback {} at {:.3}",
                next.modality, next.expected_confidence
            ));
        }

        let decision = ModalityDecision {
            session_id: session.id.clone(),
            task_signature: session.signature(),
            candidates: scored.into_iter().map(|(c, _)| c).collect(),
            chosen,
            reasoning: reasoning.join("; "),
            artifact: analysis.generated_artifact.clone(),
            decided_at: Utc::now(),
        };
        info!(
            "Decision for session {}: {:?} ({})",
            decision.session_id,
            decision.modalities(),
            decision.reasoning
        );
        Ok(decision)
    }

    fn exclusion(
        &self,
        modality: Modality,
        session: &Session,
        analysis: &ReversibilityAnalysis,
        confidence: f64,
    ) -> Option<String> {
        match modality {
            Modality::ApiReplay if analysis.generated_artifact.is_none() => {
                Some("no generated artifact".into())
            }
            Modality::ApiReplay if confidence < self.config.api_threshold => Some(format!(
                "analysis confidence {:.2} below threshold {:.2}",
                confidence, self.config.api_threshold
            )),
            Modality::HeadlessAutomation if !session.has_actions() => {
                Some("session has no recorded actions (low confidence)".into())
            }
            _ => None,
        }
    }

    fn expected_cost(
        &self,
        modality: Modality,
        session: &Session,
        analysis: &ReversibilityAnalysis,
    ) -> u64 {
        let table = &self.config.cost_table;
        match modality {
            Modality::ApiReplay => analysis
                .estimated_execution_ms
                .unwrap_or_else(|| table.cost_of(modality)),
            Modality::HeadlessAutomation if session.duration_ms > 0 => session.duration_ms,
            _ => table.cost_of(modality),
        }
    }
}

/// Blended confidence descending, then expected cost ascending, then the fixed
/// modality order.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.expected_confidence
        .total_cmp(&a.expected_confidence)
        .then(a.expected_cost_ms.cmp(&b.expected_cost_ms))
        .then(a.modality.cmp(&b.modality))
}

/// The analysis is advisory input: NaN counts as no confidence and values outside
/// [0, 1] are clamped. The endpoints get no special treatment.
fn sanitize_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        warn!("Analysis confidence is NaN; treating as 0");
        return 0.0;
    }
    if !(0.0..=1.0).contains(&raw) {
        warn!("Analysis confidence {} outside [0, 1]; clamping", raw);
    }
    raw.clamp(0.0, 1.0)
}
