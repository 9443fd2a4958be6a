//! Session recorder.
//!
//! Collects an append-only action trace for one recording and freezes it, together
//! with the final browser state, into a `Session` when stopped.

use crate::actions;
use crate::backend::{PageHandle, SharedPage};
use crate::config::schema::RecorderConfig;
use crate::snapshot::{SnapshotStore, write_bytes};
use chrono::{DateTime, Utc};
use reprise_common::error::EngineError;
use reprise_common::protocol::{
    ActionRecord, CaptureLevel, NetworkSummary, RecordedAction, Session,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderState {
    Recording,
    Stopped,
}

pub struct SessionRecorder {
    id: String,
    task_description: String,
    level: CaptureLevel,
    max_actions: usize,
    page: SharedPage,
    store: SnapshotStore,
    started: Instant,
    created_at: DateTime<Utc>,
    actions: Vec<ActionRecord>,
    network: NetworkSummary,
    state: RecorderState,
}

impl SessionRecorder {
    pub fn start(
        page: SharedPage,
        store: SnapshotStore,
        config: &RecorderConfig,
        task_description: &str,
        level: CaptureLevel,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        info!("Recording session {} ({:?}): {}", id, level, task_description);
        Self {
            id,
            task_description: task_description.to_string(),
            level,
            max_actions: config.max_actions,
            page,
            store,
            started: Instant::now(),
            created_at: Utc::now(),
            actions: Vec::new(),
            network: NetworkSummary::default(),
            state: RecorderState::Recording,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn level(&self) -> CaptureLevel {
        self.level
    }

    pub fn actions(&self) -> &[ActionRecord] {
        &self.actions
    }

    pub fn is_stopped(&self) -> bool {
        self.state == RecorderState::Stopped
    }

    /// Append an action that has already happened on the page.
    pub async fn record_action(&mut self, action: RecordedAction) -> Result<usize, EngineError> {
        self.ensure_can_record()?;
        let page = self.page.clone();
        let mut guard = page.lock().await;
        Ok(self.append(guard.as_mut(), action).await)
    }

    /// Drive an action on the page, then record it. Used when the recording itself is
    /// automation-driven. A failing action is not recorded. The page stays locked until
    /// the action's screenshot is taken.
    pub async fn perform(&mut self, action: RecordedAction) -> Result<usize, EngineError> {
        self.ensure_can_record()?;
        let page = self.page.clone();
        let mut guard = page.lock().await;
        actions::perform(
            guard.as_mut(),
            action.kind,
            action.target.as_deref(),
            action.payload.as_deref(),
        )
        .await?;
        Ok(self.append(guard.as_mut(), action).await)
    }

    async fn append(&mut self, page: &mut dyn PageHandle, action: RecordedAction) -> usize {
        let index = self.actions.len();
        let offset_ms = self.started.elapsed().as_millis() as u64;
        let screenshot = if self.level >= CaptureLevel::Visual {
            self.take_screenshot(page, &format!("action-{}.png", index))
                .await
        } else {
            None
        };

        debug!("Recorded action {} ({:?}) at +{}ms", index, action.kind, offset_ms);
        self.actions.push(ActionRecord {
            index,
            kind: action.kind,
            target: action.target,
            payload: action.payload,
            offset_ms,
            screenshot,
        });
        index
    }

    /// Attach the traffic summary from the network-capture collaborator. Ignored below
    /// the `network` capture level.
    pub fn attach_network(&mut self, summary: NetworkSummary) -> Result<(), EngineError> {
        self.ensure_recording()?;
        if self.level < CaptureLevel::Network {
            debug!("Ignoring network summary at capture level {:?}", self.level);
            return Ok(());
        }
        self.network = summary;
        Ok(())
    }

    /// Capture the final state, persist it and the session, and freeze the recording.
    pub async fn stop(&mut self) -> Result<Session, EngineError> {
        self.ensure_recording()?;

        let state = {
            let mut page = self.page.lock().await;
            self.store.capture(page.as_mut(), &self.id).await
        };
        self.store.save(&state, &self.id).await?;

        let session = Session {
            id: self.id.clone(),
            task_description: self.task_description.clone(),
            capture_level: self.level,
            state,
            actions: self.actions.clone(),
            network: self.network.clone(),
            created_at: self.created_at,
            duration_ms: self.started.elapsed().as_millis() as u64,
        };
        let path = self.store.save_session(&session).await?;
        self.state = RecorderState::Stopped;

        if session.actions.is_empty() {
            warn!("Session {} stopped with no recorded actions", session.id);
        }
        info!(
            "Session {} frozen with {} actions ({}ms) at {}",
            session.id,
            session.actions.len(),
            session.duration_ms,
            path.display()
        );
        Ok(session)
    }

    fn ensure_can_record(&self) -> Result<(), EngineError> {
        self.ensure_recording()?;
        if self.actions.len() >= self.max_actions {
            return Err(EngineError::InvalidState(format!(
                "session {} reached the limit of {} actions",
                self.id, self.max_actions
            )));
        }
        Ok(())
    }

    fn ensure_recording(&self) -> Result<(), EngineError> {
        match self.state {
            RecorderState::Recording => Ok(()),
            RecorderState::Stopped => Err(EngineError::InvalidState(format!(
                "session {} has already been stopped",
                self.id
            ))),
        }
    }

    async fn take_screenshot(&self, page: &mut dyn PageHandle, name: &str) -> Option<PathBuf> {
        let bytes = page.screenshot().await;
        let path = self
            .store
            .session_artifacts_dir(&self.id)
            .join("shots")
            .join(name);
        let result = match bytes {
            Ok(bytes) => write_bytes(&path, &bytes).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Screenshot {} skipped: {}", name, e);
                None
            }
        }
    }
}
