use crate::backend::{PageError, PageHandle};
use reprise_common::protocol::ActionKind;
use std::time::Duration;

/// Drive one action on a page. Shared by live recording and headless replay so both
/// interpret an action the same way.
pub async fn perform(
    page: &mut dyn PageHandle,
    kind: ActionKind,
    target: Option<&str>,
    payload: Option<&str>,
) -> Result<(), PageError> {
    match kind {
        ActionKind::Navigate => {
            let url = target
                .or(payload)
                .ok_or_else(|| PageError::Navigation("navigate action without a URL".into()))?;
            page.navigate(url).await?;
        }
        ActionKind::Click => {
            let selector = target.ok_or_else(|| PageError::ElementNotFound("<none>".into()))?;
            page.click(selector).await?;
        }
        ActionKind::Type => {
            let selector = target.ok_or_else(|| PageError::ElementNotFound("<none>".into()))?;
            page.type_text(selector, payload.unwrap_or_default()).await?;
        }
        ActionKind::Wait => {
            let ms = payload.and_then(|p| p.trim().parse::<u64>().ok()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        ActionKind::Custom => {
            let script = payload.ok_or_else(|| PageError::Script("custom action without a script".into()))?;
            page.evaluate(script).await?;
        }
    }
    Ok(())
}
