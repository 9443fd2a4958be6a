//! The record, decide, execute and evaluate surface, wired from one configuration.

use crate::backend::SharedPage;
use crate::config::schema::RepriseConfig;
use crate::decision::DecisionEngine;
use crate::fidelity::FidelityEvaluator;
use crate::ledger::OutcomeLedger;
use crate::orchestrator::{ApiReplayer, ManualAssistant, Orchestrator, ProcessApiReplayer};
use crate::recorder::SessionRecorder;
use crate::snapshot::SnapshotStore;
use reprise_common::error::EngineError;
use reprise_common::protocol::{
    CaptureLevel, ExecutionResult, FidelityScore, ModalityDecision, RecordedAction,
    ReversibilityAnalysis, RunReport, Session,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct ReplayEngine {
    config: RepriseConfig,
    store: SnapshotStore,
    ledger: Arc<OutcomeLedger>,
    decision: DecisionEngine,
    orchestrator: Orchestrator,
    evaluator: FidelityEvaluator,
}

impl ReplayEngine {
    /// Open the engine against the configured storage root, loading the on-disk ledger
    /// and running API artifacts as child processes.
    pub async fn open(
        config: RepriseConfig,
        manual: Arc<dyn ManualAssistant>,
    ) -> Result<Self, EngineError> {
        let ledger = Arc::new(OutcomeLedger::open(config.storage.ledger_file()).await?);
        let api = Arc::new(
            ProcessApiReplayer::new(config.api_replay.clone())
                .with_sessions_dir(config.storage.sessions_dir()),
        );
        info!("Engine storage at {}", config.storage.root.display());
        Ok(Self::with_parts(config, ledger, api, manual))
    }

    pub fn with_parts(
        config: RepriseConfig,
        ledger: Arc<OutcomeLedger>,
        api: Arc<dyn ApiReplayer>,
        manual: Arc<dyn ManualAssistant>,
    ) -> Self {
        let store = SnapshotStore::new(
            config.storage.sessions_dir(),
            config.storage.profiles_dir(),
        );
        let decision = DecisionEngine::new(config.decision.clone(), ledger.clone());
        let orchestrator = Orchestrator::new(
            config.execution.clone(),
            store.clone(),
            ledger.clone(),
            api,
            manual,
        );
        Self {
            config,
            store,
            ledger,
            decision,
            orchestrator,
            evaluator: FidelityEvaluator::new(),
        }
    }

    pub fn config(&self) -> &RepriseConfig {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<OutcomeLedger> {
        &self.ledger
    }

    /// Start an interactive recording. `level` defaults to the configured capture level.
    pub fn start_recording(
        &self,
        page: SharedPage,
        task_description: &str,
        level: Option<CaptureLevel>,
    ) -> SessionRecorder {
        SessionRecorder::start(
            page,
            self.store.clone(),
            &self.config.recorder,
            task_description,
            level.unwrap_or(self.config.recorder.capture_level),
        )
    }

    /// Drive `steps` on the page while recording them, then freeze the session.
    pub async fn record(
        &self,
        page: SharedPage,
        task_description: &str,
        steps: Vec<RecordedAction>,
    ) -> Result<Session, EngineError> {
        let mut recorder = self.start_recording(page, task_description, None);
        for step in steps {
            recorder.perform(step).await?;
        }
        recorder.stop().await
    }

    pub async fn decide(
        &self,
        session: &Session,
        analysis: &ReversibilityAnalysis,
    ) -> Result<ModalityDecision, EngineError> {
        self.decision.decide(session, analysis).await
    }

    pub async fn execute(
        &self,
        page: &SharedPage,
        session: &Session,
        decision: &ModalityDecision,
    ) -> Result<RunReport, EngineError> {
        self.orchestrator.run(page, session, decision).await
    }

    pub async fn execute_until(
        &self,
        page: &SharedPage,
        session: &Session,
        decision: &ModalityDecision,
        cancel: CancellationToken,
    ) -> Result<RunReport, EngineError> {
        self.orchestrator
            .run_until(page, session, decision, cancel)
            .await
    }

    pub fn evaluate(
        &self,
        session: &Session,
        result: &ExecutionResult,
    ) -> Result<FidelityScore, EngineError> {
        self.evaluator.evaluate(session, result)
    }
}
