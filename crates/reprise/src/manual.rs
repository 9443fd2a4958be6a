use async_trait::async_trait;
use reprise_engine::backend::PageHandle;
use reprise_engine::orchestrator::{AttemptError, ManualAssistant};
use reprise_engine::protocol::Session;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Walks an operator through the task on the terminal. The page is left on the
/// recorded start URL; the operator reports the outcome with `done` or `fail`.
pub struct TerminalAssistant {
    visible: bool,
}

impl TerminalAssistant {
    pub fn new(visible: bool) -> Self {
        Self { visible }
    }
}

#[async_trait]
impl ManualAssistant for TerminalAssistant {
    async fn assist(
        &self,
        page: &mut dyn PageHandle,
        session: &Session,
        reason: &str,
    ) -> Result<(), AttemptError> {
        if !self.visible {
            return Err(AttemptError::Failed(
                "manual fallback needs a visible browser (run with --visible)".into(),
            ));
        }
        if !session.state.page_url.is_empty() {
            page.navigate(&session.state.page_url).await?;
        }

        info!("Handing session {} to the operator: {}", session.id, reason);
        eprintln!();
        eprintln!("Manual fallback: {}", reason);
        eprintln!("Task: {}", session.task_description);
        if !session.actions.is_empty() {
            eprintln!("Recorded steps:");
            for action in &session.actions {
                eprintln!(
                    "  {:>3}. {:?} {} {}",
                    action.index + 1,
                    action.kind,
                    action.target.as_deref().unwrap_or(""),
                    action.payload.as_deref().unwrap_or("")
                );
            }
        }
        eprintln!("Type 'done' when finished or 'fail' to give up.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match line.trim() {
                    "done" => return Ok(()),
                    "fail" => {
                        return Err(AttemptError::Failed(
                            "operator reported failure".into(),
                        ));
                    }
                    _ => eprintln!("Type 'done' or 'fail'."),
                },
                Ok(None) => {
                    return Err(AttemptError::Failed(
                        "stdin closed before the operator answered".into(),
                    ));
                }
                Err(e) => return Err(AttemptError::Failed(e.to_string())),
            }
        }
    }
}
