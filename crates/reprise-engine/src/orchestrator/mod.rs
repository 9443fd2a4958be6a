//! Execution orchestrator.
//!
//! Runs the decided modality and walks the fallback chain on failure. Each modality gets
//! one attempt with its own time budget; ordinary failures are retried in place within
//! that attempt, detections are not. Every attempt lands in the outcome ledger.

pub mod runner;

pub use runner::{
    ApiReplayer, AttemptError, HeadlessReplay, ManualAssistant, ProcessApiReplayer,
};

use crate::backend::SharedPage;
use crate::config::schema::ExecutionConfig;
use crate::fidelity::FidelityEvaluator;
use crate::ledger::OutcomeLedger;
use crate::snapshot::SnapshotStore;
use chrono::Utc;
use reprise_common::error::EngineError;
use reprise_common::protocol::{
    Candidate, DetectionSignal, ExecutionResult, ExecutionStatus, Modality, ModalityDecision,
    OutcomeLedgerEntry, ReplayTrace, RunReport, Session,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of one run.
///
/// `Pending -> Executing -> {Succeeded | Failed | Detected | TimedOut}`; the last three
/// move on to the next candidate, and an empty chain ends in `Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Executing(Modality),
    Succeeded,
    Failed,
    Detected,
    TimedOut,
    Exhausted,
    Cancelled,
}

impl RunState {
    fn after(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Success => RunState::Succeeded,
            ExecutionStatus::Failure => RunState::Failed,
            ExecutionStatus::Detected => RunState::Detected,
            ExecutionStatus::Timeout => RunState::TimedOut,
        }
    }
}

struct Attempt {
    status: ExecutionStatus,
    errors: Vec<String>,
    retries: u32,
    trace: Option<ReplayTrace>,
    detection: Option<DetectionSignal>,
    cancelled: bool,
}

enum Race {
    Finished(Result<Option<ReplayTrace>, AttemptError>),
    TimedOut,
    Cancelled,
}

pub struct Orchestrator {
    config: ExecutionConfig,
    store: SnapshotStore,
    ledger: Arc<OutcomeLedger>,
    api: Arc<dyn ApiReplayer>,
    manual: Arc<dyn ManualAssistant>,
    evaluator: FidelityEvaluator,
}

impl Orchestrator {
    pub fn new(
        config: ExecutionConfig,
        store: SnapshotStore,
        ledger: Arc<OutcomeLedger>,
        api: Arc<dyn ApiReplayer>,
        manual: Arc<dyn ManualAssistant>,
    ) -> Self {
        Self {
            config,
            store,
            ledger,
            api,
            manual,
            evaluator: FidelityEvaluator::new(),
        }
    }

    pub async fn run(
        &self,
        page: &SharedPage,
        session: &Session,
        decision: &ModalityDecision,
    ) -> Result<RunReport, EngineError> {
        self.run_until(page, session, decision, CancellationToken::new())
            .await
    }

    /// Like [`Orchestrator::run`], stopping at the first point `cancel` fires. The
    /// in-flight attempt is dropped, which releases the page and kills any child process.
    pub async fn run_until(
        &self,
        page: &SharedPage,
        session: &Session,
        decision: &ModalityDecision,
        cancel: CancellationToken,
    ) -> Result<RunReport, EngineError> {
        if decision.session_id != session.id {
            return Err(EngineError::InvalidState(format!(
                "decision is for session {}, not {}",
                decision.session_id, session.id
            )));
        }
        if decision.candidates.is_empty() {
            return Err(EngineError::InvalidState(
                "decision has no candidate modalities".into(),
            ));
        }

        let mut state = RunState::Pending;
        let mut chain: VecDeque<Candidate> = decision.candidates.iter().cloned().collect();
        let mut attempts: Vec<ExecutionResult> = Vec::new();

        while let Some(candidate) = chain.pop_front() {
            let modality = candidate.modality;
            let attempt_index = attempts.len();
            transition(&mut state, RunState::Executing(modality));
            info!(
                "Attempt {} for session {}: {} (expected {:.3})",
                attempt_index, session.id, modality, candidate.expected_confidence
            );

            let started = Instant::now();
            let attempt = self
                .attempt(page, session, decision, modality, attempt_index, &cancel)
                .await;
            let result = ExecutionResult {
                modality_used: modality,
                status: attempt.status,
                duration_ms: started.elapsed().as_millis() as u64,
                errors: attempt.errors,
                attempt_index,
                retries: attempt.retries,
                trace: attempt.trace,
            };

            if attempt.cancelled {
                transition(&mut state, RunState::Cancelled);
                attempts.push(result);
                return Err(EngineError::Cancelled { attempts });
            }
            transition(&mut state, RunState::after(result.status));

            let fidelity = if result.is_success() && modality == Modality::HeadlessAutomation {
                match self.evaluator.evaluate(session, &result) {
                    Ok(score) => Some(score),
                    Err(e) => {
                        warn!("Fidelity not computed: {}", e);
                        None
                    }
                }
            } else {
                None
            };
            self.ledger
                .append(OutcomeLedgerEntry {
                    task_signature: decision.task_signature.clone(),
                    modality,
                    confidence: candidate.expected_confidence,
                    success: result.is_success(),
                    detected: result.status == ExecutionStatus::Detected,
                    fidelity,
                    recorded_at: Utc::now(),
                })
                .await?;

            if result.is_success() {
                info!(
                    "Session {} succeeded via {} after {} attempt(s)",
                    session.id,
                    modality,
                    attempt_index + 1
                );
                attempts.push(result.clone());
                return Ok(RunReport {
                    session_id: session.id.clone(),
                    decision: decision.clone(),
                    result,
                    attempts,
                });
            }

            warn!(
                "{} attempt for session {} ended {:?}: {}",
                modality,
                session.id,
                result.status,
                result.errors.join("; ")
            );
            if let Some(signal) = attempt.detection.filter(|s| s.requires_human()) {
                let skipped = chain.iter().filter(|c| c.modality.is_automated()).count();
                chain.retain(|c| !c.modality.is_automated());
                if skipped > 0 {
                    info!(
                        "{} needs a human; skipping {} automated fallback(s)",
                        signal, skipped
                    );
                }
            }
            attempts.push(result);
        }

        transition(&mut state, RunState::Exhausted);
        Err(EngineError::Exhausted { attempts })
    }

    async fn attempt(
        &self,
        page: &SharedPage,
        session: &Session,
        decision: &ModalityDecision,
        modality: Modality,
        attempt_index: usize,
        cancel: &CancellationToken,
    ) -> Attempt {
        let budget = self.config.timeout_for(modality);
        let mut errors = Vec::new();
        let mut retries = 0u32;

        let race = tokio::select! {
            res = self.try_with_retries(page, session, decision, modality, attempt_index, &mut errors, &mut retries) => Race::Finished(res),
            _ = tokio::time::sleep(budget) => Race::TimedOut,
            _ = cancel.cancelled() => Race::Cancelled,
        };

        let mut attempt = Attempt {
            status: ExecutionStatus::Failure,
            errors,
            retries,
            trace: None,
            detection: None,
            cancelled: false,
        };
        match race {
            Race::Finished(Ok(trace)) => {
                attempt.status = ExecutionStatus::Success;
                attempt.trace = trace;
            }
            Race::Finished(Err(AttemptError::Detected(signal))) => {
                attempt.status = ExecutionStatus::Detected;
                attempt.errors.push(format!("detected: {}", signal));
                attempt.detection = Some(signal);
            }
            Race::Finished(Err(AttemptError::Failed(_))) => {
                attempt.status = ExecutionStatus::Failure;
            }
            Race::TimedOut => {
                let err = EngineError::Timeout {
                    modality,
                    budget_ms: budget.as_millis() as u64,
                };
                debug!("{}; attempt dropped and page released", err);
                attempt.status = ExecutionStatus::Timeout;
                attempt.errors.push(err.to_string());
            }
            Race::Cancelled => {
                attempt.status = ExecutionStatus::Timeout;
                attempt.errors.push("cancelled".into());
                attempt.cancelled = true;
            }
        }
        attempt
    }

    /// Tries a modality until it succeeds, is detected, or runs out of retries. Every
    /// ordinary failure is pushed onto `errors`.
    #[allow(clippy::too_many_arguments)]
    async fn try_with_retries(
        &self,
        page: &SharedPage,
        session: &Session,
        decision: &ModalityDecision,
        modality: Modality,
        attempt_index: usize,
        errors: &mut Vec<String>,
        retries: &mut u32,
    ) -> Result<Option<ReplayTrace>, AttemptError> {
        loop {
            match self
                .try_once(page, session, decision, modality, attempt_index, *retries)
                .await
            {
                Ok(trace) => return Ok(trace),
                Err(AttemptError::Detected(signal)) => return Err(AttemptError::Detected(signal)),
                Err(AttemptError::Failed(msg)) => {
                    errors.push(msg.clone());
                    if *retries >= self.config.max_retries {
                        return Err(AttemptError::Failed(msg));
                    }
                    *retries += 1;
                    debug!(
                        "Retrying {} in place ({}/{}) after: {}",
                        modality, retries, self.config.max_retries, msg
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }
        }
    }

    async fn try_once(
        &self,
        page: &SharedPage,
        session: &Session,
        decision: &ModalityDecision,
        modality: Modality,
        attempt_index: usize,
        retry: u32,
    ) -> Result<Option<ReplayTrace>, AttemptError> {
        match modality {
            Modality::ApiReplay => {
                let artifact = decision.artifact.as_deref().ok_or_else(|| {
                    AttemptError::Failed("no generated artifact to replay".into())
                })?;
                self.api.replay(artifact, session).await?;
                Ok(None)
            }
            Modality::HeadlessAutomation => {
                let replay = HeadlessReplay {
                    store: &self.store,
                    config: &self.config,
                    artifacts_dir: self.store.session_artifacts_dir(&session.id).join(format!(
                        "replay-{}-{}-{}",
                        decision.decided_at.timestamp_millis(),
                        attempt_index,
                        retry
                    )),
                };
                let mut guard = page.lock().await;
                let trace = replay.run(guard.as_mut(), session).await?;
                Ok(Some(trace))
            }
            Modality::ManualFallback => {
                let reason = format!(
                    "automated modalities did not complete \"{}\"",
                    session.task_description
                );
                let mut guard = page.lock().await;
                self.manual.assist(guard.as_mut(), session, &reason).await?;
                Ok(None)
            }
        }
    }
}

fn transition(state: &mut RunState, next: RunState) {
    debug!("Run state {:?} -> {:?}", state, next);
    *state = next;
}
