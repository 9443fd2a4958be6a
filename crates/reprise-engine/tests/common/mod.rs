#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use reprise_engine::backend::{NavigationResult, PageError, PageHandle};
use reprise_engine::orchestrator::{ApiReplayer, AttemptError, ManualAssistant};
use reprise_engine::protocol::{
    ActionKind, ActionRecord, BrowserState, Candidate, CaptureLevel, Cookie, DetectionKind,
    DetectionSignal, Modality, ModalityDecision, NetworkSummary, Session, StorageMap,
};
use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct MockState {
    pub url: String,
    pub title: String,
    pub cookies: Vec<Cookie>,
    pub local_storage: StorageMap,
    pub session_storage: StorageMap,
    pub calls: Vec<String>,
    /// Selectors that do not exist on the page.
    pub missing: HashSet<String>,
    pub fail_navigation: bool,
    pub fail_cookies: bool,
    pub fail_screenshot: bool,
    /// Returned by every `poll_detection` once set.
    pub detection: Option<DetectionSignal>,
    /// Gray level of the rendered screenshot.
    pub shade: u8,
    /// URL the page was on for each screenshot taken.
    pub shots: Vec<String>,
}

/// In-memory page. Clones share state, so a test can keep a handle after the page has
/// been boxed into a `SharedPage`.
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    pub state: Arc<Mutex<MockState>>,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn navigations(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("navigate"))
            .count()
    }
}

fn storage_of(script: &str) -> Option<&'static str> {
    if script.contains("localStorage") {
        Some("localStorage")
    } else if script.contains("sessionStorage") {
        Some("sessionStorage")
    } else {
        None
    }
}

#[async_trait]
impl PageHandle for MockPage {
    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, PageError> {
        let mut state = self.state.lock();
        state.calls.push(format!("navigate {}", url));
        if state.fail_navigation {
            return Err(PageError::Navigation(format!("{} unreachable", url)));
        }
        state.url = url.to_string();
        state.title = format!("Title of {}", url);
        Ok(NavigationResult {
            url: url.to_string(),
            title: state.title.clone(),
        })
    }

    async fn click(&mut self, selector: &str) -> Result<(), PageError> {
        let mut state = self.state.lock();
        state.calls.push(format!("click {}", selector));
        if state.missing.contains(selector) {
            return Err(PageError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), PageError> {
        let mut state = self.state.lock();
        state.calls.push(format!("type {} {}", selector, text));
        if state.missing.contains(selector) {
            return Err(PageError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, PageError> {
        let mut state = self.state.lock();
        if script.contains("indexedDB") {
            return Ok(serde_json::Value::Null);
        }
        if let Some(start) = script.find("const entries = ") {
            let rest = &script[start + "const entries = ".len()..];
            let end = rest
                .find("; for")
                .ok_or_else(|| PageError::Script("unexpected restore script".into()))?;
            let entries: StorageMap = serde_json::from_str(&rest[..end])?;
            let count = entries.len();
            match storage_of(&rest[end..]) {
                Some("localStorage") => state.local_storage.extend(entries),
                Some(_) => state.session_storage.extend(entries),
                None => return Err(PageError::Script("unknown storage area".into())),
            }
            return Ok(serde_json::json!(count));
        }
        match storage_of(script) {
            Some("localStorage") => Ok(serde_json::to_value(&state.local_storage)?),
            Some(_) => Ok(serde_json::to_value(&state.session_storage)?),
            None => {
                state.calls.push(format!("evaluate {}", script));
                Ok(serde_json::Value::Null)
            }
        }
    }

    async fn get_cookies(&mut self) -> Result<Vec<Cookie>, PageError> {
        let state = self.state.lock();
        if state.fail_cookies {
            return Err(PageError::NotSupported("cookies".into()));
        }
        Ok(state.cookies.clone())
    }

    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<(), PageError> {
        let mut state = self.state.lock();
        for cookie in cookies {
            state.cookies.retain(|c| c.key() != cookie.key());
            state.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, PageError> {
        let mut state = self.state.lock();
        if state.fail_screenshot {
            return Err(PageError::NotSupported("screenshot".into()));
        }
        let url = state.url.clone();
        state.shots.push(url);
        Ok(png(state.shade))
    }

    async fn current_url(&mut self) -> Result<String, PageError> {
        Ok(self.state.lock().url.clone())
    }

    async fn title(&mut self) -> Result<String, PageError> {
        Ok(self.state.lock().title.clone())
    }

    async fn poll_detection(&mut self) -> Result<Option<DetectionSignal>, PageError> {
        Ok(self.state.lock().detection.clone())
    }

    async fn close(&mut self) -> Result<(), PageError> {
        Ok(())
    }
}

/// A solid gray PNG.
pub fn png(shade: u8) -> Vec<u8> {
    let img = image::GrayImage::from_pixel(32, 24, image::Luma([shade]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

#[derive(Debug, Clone)]
pub enum ApiOutcome {
    Succeed,
    Fail,
    Detect(DetectionKind),
    Hang,
}

/// API replayer that plays back a script of outcomes; the last one repeats.
pub struct ScriptedApi {
    outcomes: Mutex<VecDeque<ApiOutcome>>,
    pub calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn new(outcomes: Vec<ApiOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiReplayer for ScriptedApi {
    async fn replay(&self, _artifact: &Path, _session: &Session) -> Result<(), AttemptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut outcomes = self.outcomes.lock();
            if outcomes.len() > 1 {
                outcomes.pop_front()
            } else {
                outcomes.front().cloned()
            }
        };
        match outcome.unwrap_or(ApiOutcome::Succeed) {
            ApiOutcome::Succeed => Ok(()),
            ApiOutcome::Fail => Err(AttemptError::Failed("HTTP 500".into())),
            ApiOutcome::Detect(kind) => Err(AttemptError::Detected(DetectionSignal::new(
                kind,
                "bot wall",
            ))),
            ApiOutcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

/// Manual assistant that reports a fixed outcome.
pub struct StubManual {
    pub succeed: bool,
    pub calls: AtomicUsize,
}

impl StubManual {
    pub fn new(succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            succeed,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManualAssistant for StubManual {
    async fn assist(
        &self,
        _page: &mut dyn PageHandle,
        _session: &Session,
        _reason: &str,
    ) -> Result<(), AttemptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(())
        } else {
            Err(AttemptError::Failed("operator gave up".into()))
        }
    }
}

pub fn action(index: usize, kind: ActionKind, target: &str) -> ActionRecord {
    ActionRecord {
        index,
        kind,
        target: Some(target.to_string()),
        payload: None,
        offset_ms: index as u64 * 100,
        screenshot: None,
    }
}

pub fn login_actions() -> Vec<ActionRecord> {
    vec![
        action(0, ActionKind::Navigate, "https://example.com/login"),
        action(1, ActionKind::Click, "#user"),
        action(2, ActionKind::Click, "#submit"),
    ]
}

pub fn session(id: &str, actions: Vec<ActionRecord>) -> Session {
    Session {
        id: id.to_string(),
        task_description: "log in to example.com".to_string(),
        capture_level: CaptureLevel::Network,
        state: BrowserState::empty(id),
        actions,
        network: NetworkSummary::default(),
        created_at: Utc::now(),
        duration_ms: 0,
    }
}

pub fn decision(session: &Session, modalities: &[Modality]) -> ModalityDecision {
    let candidates: Vec<Candidate> = modalities
        .iter()
        .map(|&modality| Candidate {
            modality,
            expected_confidence: 0.7,
            expected_cost_ms: 1_000,
        })
        .collect();
    ModalityDecision {
        session_id: session.id.clone(),
        task_signature: session.signature(),
        chosen: modalities[0],
        candidates,
        reasoning: "test".to_string(),
        artifact: Some(PathBuf::from("replay.py")),
        decided_at: Utc::now(),
    }
}
