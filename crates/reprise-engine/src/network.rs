//! Network-capture boundary: reads the traffic log written by the recording proxy
//! (`network_activity.json`) and reduces it to the summary a session keeps.

use chrono::{DateTime, NaiveDateTime, Utc};
use reprise_common::error::EngineError;
use reprise_common::protocol::NetworkSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficKind {
    Request,
    Response,
    Websocket,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: TrafficKind,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub flow_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TrafficLog {
    pub entries: Vec<TrafficEntry>,
}

impl TrafficLog {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<TrafficEntry> = serde_json::from_str(json)?;
        Ok(Self { entries })
    }

    pub async fn load(path: &Path) -> Result<Self, EngineError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::persistence(path, e))?;
        Self::parse(&content).map_err(|e| EngineError::persistence(path, e))
    }

    /// Request count, distinct hosts, and the span between the first and last
    /// timestamped entry. Entries with unparseable timestamps or URLs are skipped for
    /// the part they cannot contribute to.
    pub fn summarize(&self) -> NetworkSummary {
        let request_count = self
            .entries
            .iter()
            .filter(|e| e.kind == TrafficKind::Request)
            .count();

        let domains: BTreeSet<String> = self
            .entries
            .iter()
            .filter_map(|e| e.url.as_deref())
            .filter_map(|u| Url::parse(u).ok())
            .filter_map(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .collect();

        let times: Vec<DateTime<Utc>> = self
            .entries
            .iter()
            .filter_map(|e| parse_timestamp(&e.timestamp))
            .collect();
        let duration_ms = match (times.iter().min(), times.iter().max()) {
            (Some(first), Some(last)) => (*last - *first).num_milliseconds().max(0) as u64,
            _ => 0,
        };

        NetworkSummary {
            request_count,
            domains,
            duration_ms,
        }
    }
}

/// The proxy writes local ISO-8601 timestamps without an offset; those are read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
