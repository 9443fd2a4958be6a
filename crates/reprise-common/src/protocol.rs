use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Key/value contents of `localStorage` or `sessionStorage`.
///
/// A `BTreeMap` keeps serialization stable; insertion order carries no meaning.
pub type StorageMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl Cookie {
    pub fn new(name: impl Into<String>, domain: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_cookie_path(),
            expires: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    pub fn key(&self) -> CookieKey {
        CookieKey {
            name: self.name.clone(),
            domain: self.domain.clone(),
        }
    }
}

/// Identity of a cookie for diffing: two cookies with the same name and domain are the
/// same cookie, whatever their value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CookieKey {
    pub name: String,
    pub domain: String,
}

/// Sub-part of a browser state capture, used to annotate degraded captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatePart {
    Cookies,
    LocalStorage,
    SessionStorage,
    IndexedDb,
    Page,
    Screenshot,
}

impl fmt::Display for StatePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatePart::Cookies => "cookies",
            StatePart::LocalStorage => "local_storage",
            StatePart::SessionStorage => "session_storage",
            StatePart::IndexedDb => "indexed_db",
            StatePart::Page => "page",
            StatePart::Screenshot => "screenshot",
        };
        f.write_str(name)
    }
}

/// A sub-part that could not be captured. The part is stored empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureDiagnostic {
    pub part: StatePart,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserState {
    pub session_id: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub local_storage: StorageMap,
    #[serde(default)]
    pub session_storage: StorageMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_db: Option<serde_json::Value>,
    #[serde(default)]
    pub page_url: String,
    #[serde(default)]
    pub page_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<CaptureDiagnostic>,
}

impl BrowserState {
    pub fn empty(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            captured_at: Utc::now(),
            cookies: Vec::new(),
            local_storage: StorageMap::new(),
            session_storage: StorageMap::new(),
            indexed_db: None,
            page_url: String::new(),
            page_title: String::new(),
            screenshot: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    Wait,
    Custom,
}

/// An action as handed to the recorder, before it is indexed and timestamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl RecordedAction {
    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Navigate,
            target: Some(url.into()),
            payload: None,
        }
    }

    pub fn click(selector: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Click,
            target: Some(selector.into()),
            payload: None,
        }
    }

    pub fn type_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Type,
            target: Some(selector.into()),
            payload: Some(text.into()),
        }
    }

    pub fn wait(ms: u64) -> Self {
        Self {
            kind: ActionKind::Wait,
            target: None,
            payload: Some(ms.to_string()),
        }
    }

    pub fn custom(script: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Custom,
            target: None,
            payload: Some(script.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub index: usize,
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Milliseconds since the recording started.
    pub offset_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

/// How much the recorder captures. Higher levels cost more and give the fidelity
/// evaluator more to compare against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureLevel {
    /// Action trace and final state only.
    Actions,
    /// Adds the network summary.
    #[default]
    Network,
    /// Adds a screenshot after every action.
    Visual,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub request_count: usize,
    pub domains: BTreeSet<String>,
    pub duration_ms: u64,
}

/// A frozen recording. Built once by the recorder's `stop` and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub task_description: String,
    pub capture_level: CaptureLevel,
    pub state: BrowserState,
    pub actions: Vec<ActionRecord>,
    pub network: NetworkSummary,
    pub created_at: DateTime<Utc>,
    /// Wall-clock length of the recording.
    pub duration_ms: u64,
}

impl Session {
    pub fn signature(&self) -> TaskSignature {
        TaskSignature::compute(&self.task_description, &self.network.domains)
    }

    pub fn has_actions(&self) -> bool {
        !self.actions.is_empty()
    }
}

/// Hash of a task description plus the set of domains it touched. Ledger statistics
/// are grouped by signature.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskSignature(String);

impl TaskSignature {
    pub fn compute(task_description: &str, domains: &BTreeSet<String>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(task_description.trim().as_bytes());
        hasher.update(b"\n");
        let normalized: BTreeSet<String> = domains.iter().map(|d| d.to_ascii_lowercase()).collect();
        for domain in &normalized {
            hasher.update(domain.as_bytes());
            hasher.update(b",");
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output of the reverse-engineering collaborator. Advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversibilityAnalysis {
    pub session_id: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_artifact: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_execution_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    ApiReplay,
    HeadlessAutomation,
    ManualFallback,
}

impl Modality {
    pub const ALL: [Modality; 3] = [
        Modality::ApiReplay,
        Modality::HeadlessAutomation,
        Modality::ManualFallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::ApiReplay => "api-replay",
            Modality::HeadlessAutomation => "headless-automation",
            Modality::ManualFallback => "manual-fallback",
        }
    }

    pub fn is_automated(&self) -> bool {
        !matches!(self, Modality::ManualFallback)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub modality: Modality,
    pub expected_confidence: f64,
    pub expected_cost_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityDecision {
    pub session_id: String,
    pub task_signature: TaskSignature,
    pub candidates: Vec<Candidate>,
    pub chosen: Modality,
    pub reasoning: String,
    /// Generated artifact `api-replay` runs, carried over from the analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    pub decided_at: DateTime<Utc>,
}

impl ModalityDecision {
    /// Candidates after the chosen one, in the order they will be tried.
    pub fn fallback_chain(&self) -> &[Candidate] {
        self.candidates.get(1..).unwrap_or_default()
    }

    pub fn modalities(&self) -> Vec<Modality> {
        self.candidates.iter().map(|c| c.modality).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Detected,
    Timeout,
}

/// Observed outcome of one replayed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayStep {
    pub index: usize,
    pub completed: bool,
    pub offset_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayTrace {
    pub steps: Vec<ReplayStep>,
    pub duration_ms: u64,
}

impl ReplayTrace {
    pub fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.completed).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub modality_used: Modality,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    pub attempt_index: usize,
    /// In-place retries spent inside this attempt.
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<ReplayTrace>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Result of a logical run that ended in success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub session_id: String,
    pub decision: ModalityDecision,
    pub result: ExecutionResult,
    /// Every attempt of the run in order, the successful one last.
    pub attempts: Vec<ExecutionResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FidelityScore {
    pub action_accuracy: f64,
    pub timing_accuracy: f64,
    pub visual_accuracy: f64,
}

impl FidelityScore {
    pub fn overall(&self) -> f64 {
        (self.action_accuracy + self.timing_accuracy + self.visual_accuracy) / 3.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeLedgerEntry {
    pub task_signature: TaskSignature,
    pub modality: Modality,
    pub confidence: f64,
    pub success: bool,
    #[serde(default)]
    pub detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fidelity: Option<FidelityScore>,
    pub recorded_at: DateTime<Utc>,
}

/// Class of obstacle reported by the automation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    /// A challenge a human has to solve. Skips the remaining automated modalities.
    Captcha,
    /// The site refused the session outright.
    Blocked,
    Other,
}

/// Indication that the automated session was identified as non-human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionSignal {
    pub kind: DetectionKind,
    pub detail: String,
}

impl DetectionSignal {
    pub fn new(kind: DetectionKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn requires_human(&self) -> bool {
        self.kind == DetectionKind::Captcha
    }
}

impl fmt::Display for DetectionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}
