use async_trait::async_trait;
pub use reprise_common::error::PageError;
use reprise_common::protocol::{Cookie, DetectionSignal};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub url: String,
    pub title: String,
}

/// The automation collaborator boundary. Every browser driver implements this; the
/// recorder, snapshot store and orchestrator only ever talk to a page through it.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate to a specific URL.
    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, PageError>;

    /// Click the element matching a CSS selector.
    async fn click(&mut self, selector: &str) -> Result<(), PageError>;

    /// Type text into the element matching a CSS selector.
    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), PageError>;

    /// Evaluate a script in the page and return its JSON value. Promises are awaited.
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, PageError>;

    async fn get_cookies(&mut self) -> Result<Vec<Cookie>, PageError>;

    /// Set cookies in bulk.
    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), PageError>;

    /// Capture a PNG screenshot of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>, PageError>;

    async fn current_url(&mut self) -> Result<String, PageError>;

    async fn title(&mut self) -> Result<String, PageError> {
        Ok(String::new())
    }

    /// Poll for a pending detection signal. Drivers that cannot observe detection
    /// return `None`.
    async fn poll_detection(&mut self) -> Result<Option<DetectionSignal>, PageError> {
        Ok(None)
    }

    /// Close the page and release its resources.
    async fn close(&mut self) -> Result<(), PageError>;
}

/// A page shared between the recorder and the orchestrator. Holding the lock is the
/// right to drive the page, so at most one action is in flight per page.
pub type SharedPage = Arc<Mutex<Box<dyn PageHandle>>>;

pub fn share<P: PageHandle + 'static>(page: P) -> SharedPage {
    Arc::new(Mutex::new(Box::new(page)))
}
