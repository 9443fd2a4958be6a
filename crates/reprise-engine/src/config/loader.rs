use super::schema::RepriseConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./reprise.yaml
    /// 2. ~/.reprise/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<RepriseConfig, ConfigError> {
        let local_config = PathBuf::from("./reprise.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".reprise").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(RepriseConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<RepriseConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<RepriseConfig, ConfigError> {
        let config: RepriseConfig = serde_yaml::from_str(content)?;
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &RepriseConfig) -> Result<(), ConfigError> {
    let d = &config.decision;
    for (name, value) in [
        ("decision.analysis_weight", d.analysis_weight),
        ("decision.history_weight", d.history_weight),
        ("decision.penalty_weight", d.penalty_weight),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be a non-negative number, got {}",
                name, value
            )));
        }
    }
    for (name, value) in [
        ("decision.api_threshold", d.api_threshold),
        ("decision.floor_confidence", d.floor_confidence),
        ("decision.prior_success_rate", d.prior_success_rate),
        ("execution.step_failure_tolerance", config.execution.step_failure_tolerance),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::Invalid(format!(
                "{} must be within [0, 1], got {}",
                name, value
            )));
        }
    }
    if !(d.detection_half_life > 0.0) {
        return Err(ConfigError::Invalid(
            "decision.detection_half_life must be positive".into(),
        ));
    }
    if !(d.prior_weight > 0.0) {
        return Err(ConfigError::Invalid(
            "decision.prior_weight must be positive".into(),
        ));
    }
    Ok(())
}
