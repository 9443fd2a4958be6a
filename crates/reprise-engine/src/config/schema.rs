use reprise_common::protocol::{CaptureLevel, Modality};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepriseConfig {
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api_replay: ApiReplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default = "default_analysis_weight")]
    pub analysis_weight: f64,
    #[serde(default = "default_history_weight")]
    pub history_weight: f64,
    #[serde(default = "default_penalty_weight")]
    pub penalty_weight: f64,
    /// Minimum analysis confidence for `api-replay` to be considered at all.
    #[serde(default = "default_api_threshold")]
    pub api_threshold: f64,
    /// Below this blended confidence no automated modality is trusted.
    #[serde(default = "default_floor_confidence")]
    pub floor_confidence: f64,
    /// Half-life of a detection's weight, counted in ledger attempts.
    #[serde(default = "default_detection_half_life")]
    pub detection_half_life: f64,
    /// Success rate assumed for a modality with no history.
    #[serde(default = "default_prior_success_rate")]
    pub prior_success_rate: f64,
    /// Weight of the prior, in pseudo-attempts.
    #[serde(default = "default_prior_weight")]
    pub prior_weight: f64,
    #[serde(default)]
    pub cost_table: CostTable,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            analysis_weight: default_analysis_weight(),
            history_weight: default_history_weight(),
            penalty_weight: default_penalty_weight(),
            api_threshold: default_api_threshold(),
            floor_confidence: default_floor_confidence(),
            detection_half_life: default_detection_half_life(),
            prior_success_rate: default_prior_success_rate(),
            prior_weight: default_prior_weight(),
            cost_table: CostTable::default(),
        }
    }
}

fn default_analysis_weight() -> f64 {
    0.5
}

fn default_history_weight() -> f64 {
    0.4
}

fn default_penalty_weight() -> f64 {
    0.1
}

fn default_api_threshold() -> f64 {
    0.85
}

fn default_floor_confidence() -> f64 {
    0.3
}

fn default_detection_half_life() -> f64 {
    20.0
}

fn default_prior_success_rate() -> f64 {
    0.5
}

fn default_prior_weight() -> f64 {
    2.0
}

/// Expected cost per modality when nothing better is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostTable {
    #[serde(default = "default_api_replay_cost_ms")]
    pub api_replay_ms: u64,
    #[serde(default = "default_headless_cost_ms")]
    pub headless_automation_ms: u64,
    #[serde(default = "default_manual_cost_ms")]
    pub manual_fallback_ms: u64,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            api_replay_ms: default_api_replay_cost_ms(),
            headless_automation_ms: default_headless_cost_ms(),
            manual_fallback_ms: default_manual_cost_ms(),
        }
    }
}

impl CostTable {
    pub fn cost_of(&self, modality: Modality) -> u64 {
        match modality {
            Modality::ApiReplay => self.api_replay_ms,
            Modality::HeadlessAutomation => self.headless_automation_ms,
            Modality::ManualFallback => self.manual_fallback_ms,
        }
    }
}

fn default_api_replay_cost_ms() -> u64 {
    2_000
}

fn default_headless_cost_ms() -> u64 {
    30_000
}

fn default_manual_cost_ms() -> u64 {
    120_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_api_replay_timeout_ms")]
    pub api_replay_timeout_ms: u64,
    #[serde(default = "default_headless_timeout_ms")]
    pub headless_timeout_ms: u64,
    #[serde(default = "default_manual_timeout_ms")]
    pub manual_timeout_ms: u64,
    /// In-place retries after an ordinary failure. Detection is never retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Fraction of non-navigation steps a headless replay may fail and still succeed.
    #[serde(default = "default_step_failure_tolerance")]
    pub step_failure_tolerance: f64,
    /// Sleep until each step's recorded offset before replaying it.
    #[serde(default)]
    pub preserve_pacing: bool,
    /// Restore the recorded cookies and storage before a headless replay.
    #[serde(default = "default_true")]
    pub restore_state: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            api_replay_timeout_ms: default_api_replay_timeout_ms(),
            headless_timeout_ms: default_headless_timeout_ms(),
            manual_timeout_ms: default_manual_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            step_failure_tolerance: default_step_failure_tolerance(),
            preserve_pacing: false,
            restore_state: true,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout_for(&self, modality: Modality) -> Duration {
        let ms = match modality {
            Modality::ApiReplay => self.api_replay_timeout_ms,
            Modality::HeadlessAutomation => self.headless_timeout_ms,
            Modality::ManualFallback => self.manual_timeout_ms,
        };
        Duration::from_millis(ms)
    }
}

fn default_api_replay_timeout_ms() -> u64 {
    15_000
}

fn default_headless_timeout_ms() -> u64 {
    90_000
}

fn default_manual_timeout_ms() -> u64 {
    180_000
}

fn default_max_retries() -> u32 {
    1
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_step_failure_tolerance() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub capture_level: CaptureLevel,
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            capture_level: CaptureLevel::default(),
            max_actions: default_max_actions(),
        }
    }
}

fn default_max_actions() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

impl StorageConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.root.join("ledger.jsonl")
    }
}

fn default_storage_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".reprise")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiReplayConfig {
    /// Program used to run a generated artifact, e.g. `python3`.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Exit code the artifact uses to report that it was blocked by the site.
    #[serde(default = "default_detected_exit_code")]
    pub detected_exit_code: i32,
}

impl Default for ApiReplayConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: Vec::new(),
            detected_exit_code: default_detected_exit_code(),
        }
    }
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_detected_exit_code() -> i32 {
    3
}
