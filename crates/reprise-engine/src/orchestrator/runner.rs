//! Modality runners: what one try of each modality actually does.

use crate::actions;
use crate::backend::{PageError, PageHandle};
use crate::config::schema::{ApiReplayConfig, ExecutionConfig};
use crate::snapshot::{SnapshotStore, write_bytes};
use async_trait::async_trait;
use reprise_common::error::EngineError;
use reprise_common::protocol::{
    ActionKind, CaptureLevel, DetectionKind, DetectionSignal, ReplayStep, ReplayTrace, Session,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of a single failed try. `Failed` may be retried in place; `Detected` never is.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptError {
    Failed(String),
    Detected(DetectionSignal),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Failed(msg) => write!(f, "{}", msg),
            AttemptError::Detected(signal) => write!(f, "detected: {}", signal),
        }
    }
}

impl From<PageError> for AttemptError {
    fn from(err: PageError) -> Self {
        match err {
            PageError::Detected(signal) => AttemptError::Detected(signal),
            other => AttemptError::Failed(other.to_string()),
        }
    }
}

impl From<EngineError> for AttemptError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Detection(signal) => AttemptError::Detected(signal),
            other => AttemptError::Failed(other.to_string()),
        }
    }
}

/// Runs a generated API artifact.
#[async_trait]
pub trait ApiReplayer: Send + Sync {
    async fn replay(&self, artifact: &Path, session: &Session) -> Result<(), AttemptError>;
}

/// Hands a task to a human operator and waits for the outcome.
#[async_trait]
pub trait ManualAssistant: Send + Sync {
    async fn assist(
        &self,
        page: &mut dyn PageHandle,
        session: &Session,
        reason: &str,
    ) -> Result<(), AttemptError>;
}

/// Runs the artifact as a child process: `<interpreter> [args..] <artifact>`.
///
/// Exit status 0 is success, `detected_exit_code` reports a detection, anything else
/// is a failure. The child is killed if the attempt is dropped (timeout or
/// cancellation).
#[derive(Debug, Clone)]
pub struct ProcessApiReplayer {
    config: ApiReplayConfig,
    sessions_dir: Option<PathBuf>,
}

impl ProcessApiReplayer {
    pub fn new(config: ApiReplayConfig) -> Self {
        Self {
            config,
            sessions_dir: None,
        }
    }

    /// Expose the persisted session files to the artifact through the environment.
    pub fn with_sessions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sessions_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl ApiReplayer for ProcessApiReplayer {
    async fn replay(&self, artifact: &Path, session: &Session) -> Result<(), AttemptError> {
        let mut cmd = tokio::process::Command::new(&self.config.interpreter);
        cmd.args(&self.config.args)
            .arg(artifact)
            .env("REPRISE_SESSION_ID", &session.id)
            .env("REPRISE_TASK", &session.task_description)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.sessions_dir {
            cmd.env(
                "REPRISE_STATE_FILE",
                dir.join(format!("state-{}.json", session.id)),
            );
        }

        debug!(
            "Spawning {} {}",
            self.config.interpreter,
            artifact.display()
        );
        let output = cmd.output().await.map_err(|e| {
            AttemptError::Failed(format!(
                "failed to spawn {}: {}",
                self.config.interpreter, e
            ))
        })?;

        let stderr = tail(&String::from_utf8_lossy(&output.stderr), 400);
        match output.status.code() {
            Some(0) => Ok(()),
            Some(code) if code == self.config.detected_exit_code => Err(AttemptError::Detected(
                DetectionSignal::new(DetectionKind::Blocked, stderr),
            )),
            Some(code) => Err(AttemptError::Failed(format!(
                "artifact exited with {}: {}",
                code, stderr
            ))),
            None => Err(AttemptError::Failed("artifact terminated by signal".into())),
        }
    }
}

fn tail(text: &str, max: usize) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

/// Replays a session's action trace on a page and records what happened.
pub struct HeadlessReplay<'a> {
    pub store: &'a SnapshotStore,
    pub config: &'a ExecutionConfig,
    /// Where step screenshots go. Screenshots are only taken for visual sessions.
    pub artifacts_dir: PathBuf,
}

impl HeadlessReplay<'_> {
    pub async fn run(
        &self,
        page: &mut dyn PageHandle,
        session: &Session,
    ) -> Result<ReplayTrace, AttemptError> {
        if self.config.restore_state {
            self.store.apply(page, &session.state).await?;
        }

        let tolerated = tolerated_failures(session, self.config.step_failure_tolerance);
        let visual = session.capture_level >= CaptureLevel::Visual;
        let started = Instant::now();
        let mut steps = Vec::with_capacity(session.actions.len());
        let mut failures = 0usize;

        for action in &session.actions {
            if self.config.preserve_pacing {
                let due = started + Duration::from_millis(action.offset_ms);
                tokio::time::sleep_until(due).await;
            }

            let result = actions::perform(
                page,
                action.kind,
                action.target.as_deref(),
                action.payload.as_deref(),
            )
            .await;

            let completed = match result {
                Ok(()) => true,
                Err(PageError::Detected(signal)) => return Err(AttemptError::Detected(signal)),
                Err(e) if action.kind == ActionKind::Navigate => {
                    return Err(AttemptError::Failed(format!(
                        "step {} navigate failed: {}",
                        action.index, e
                    )));
                }
                Err(e) => {
                    failures += 1;
                    warn!("Step {} ({:?}) failed: {}", action.index, action.kind, e);
                    false
                }
            };

            if let Some(signal) = page.poll_detection().await? {
                return Err(AttemptError::Detected(signal));
            }
            if failures > tolerated {
                return Err(AttemptError::Failed(format!(
                    "{} step(s) failed, tolerance is {}",
                    failures, tolerated
                )));
            }

            let screenshot = if visual && completed {
                self.step_screenshot(page, action.index).await
            } else {
                None
            };
            steps.push(ReplayStep {
                index: action.index,
                completed,
                offset_ms: started.elapsed().as_millis() as u64,
                screenshot,
            });
        }

        Ok(ReplayTrace {
            steps,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn step_screenshot(&self, page: &mut dyn PageHandle, index: usize) -> Option<PathBuf> {
        let path = self.artifacts_dir.join(format!("step-{}.png", index));
        let result = match page.screenshot().await {
            Ok(bytes) => write_bytes(&path, &bytes).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Replay screenshot for step {} skipped: {}", index, e);
                None
            }
        }
    }
}

/// Non-navigation steps allowed to fail before the replay is abandoned.
fn tolerated_failures(session: &Session, tolerance: f64) -> usize {
    let optional = session
        .actions
        .iter()
        .filter(|a| a.kind != ActionKind::Navigate)
        .count();
    (optional as f64 * tolerance.clamp(0.0, 1.0)).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_end_of_output() {
        assert_eq!(tail("  short \n", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
    }

    #[test]
    fn test_page_detection_maps_to_detected() {
        let signal = DetectionSignal::new(DetectionKind::Captcha, "recaptcha");
        let err: AttemptError = PageError::Detected(signal.clone()).into();
        assert_eq!(err, AttemptError::Detected(signal));

        let err: AttemptError = PageError::ElementNotFound("#go".into()).into();
        assert!(matches!(err, AttemptError::Failed(msg) if msg.contains("#go")));
    }
}
