mod manual;
mod repl;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use manual::TerminalAssistant;
use reprise_engine::ReplayEngine;
use reprise_engine::analysis::load_analysis;
use reprise_engine::backend::{PageHandle, SharedPage, share};
use reprise_engine::config::{ConfigLoader, RepriseConfig};
use reprise_engine::error::EngineError;
use reprise_engine::network::TrafficLog;
use reprise_engine::protocol::{CaptureLevel, NetworkSummary, RecordedAction, Session};
use reprise_engine::recorder::SessionRecorder;
use reprise_engine::snapshot::diff;
use reprise_h::{CdpPage, LaunchOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reprise", version, about = "Record browser sessions and replay them")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (defaults to ./reprise.yaml, then ~/.reprise/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Record a session interactively, or from a JSON action script
    Record {
        /// What the session accomplishes
        #[arg(long)]
        task: String,
        /// actions, network or visual
        #[arg(long, value_parser = parse_level)]
        level: Option<CaptureLevel>,
        /// Page to open before recording starts
        #[arg(long)]
        url: Option<String>,
        /// Traffic log captured by an intercepting proxy
        #[arg(long)]
        network_log: Option<PathBuf>,
        /// Launch browser in visible mode (not headless)
        #[arg(long)]
        visible: bool,
        /// JSON list of actions to perform instead of the interactive prompt
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Print the modality decision for a recorded session
    Decide {
        #[arg(long)]
        session: PathBuf,
        #[arg(long)]
        analysis: PathBuf,
    },
    /// Decide, then execute the fallback chain
    Run {
        #[arg(long)]
        session: PathBuf,
        #[arg(long)]
        analysis: PathBuf,
        /// Launch browser in visible mode (needed for manual fallback)
        #[arg(long)]
        visible: bool,
        /// Start the browser from a profile bundle built from the session state
        #[arg(long)]
        profile: Option<String>,
    },
    /// Compare two saved browser states
    Diff { a: PathBuf, b: PathBuf },
    /// Build a portable profile directory from a saved state
    Bundle {
        #[arg(long)]
        state: PathBuf,
        #[arg(long)]
        profile: String,
    },
    /// Print per-signature outcome statistics
    Ledger,
}

fn parse_level(raw: &str) -> Result<CaptureLevel, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase()))
        .map_err(|_| format!("unknown capture level '{}' (actions, network, visual)", raw))
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<RepriseConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_from(path)
            .await
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ConfigLoader::load_default().await?,
    };
    Ok(config)
}

async fn launch(options: LaunchOptions) -> anyhow::Result<SharedPage> {
    let page = CdpPage::launch(options)
        .await
        .context("failed to launch browser")?;
    Ok(share(page))
}

async fn close(page: &SharedPage) {
    if let Err(e) = page.lock().await.close().await {
        warn!("Failed to close browser: {}", e);
    }
}

async fn load_script(path: &Path) -> anyhow::Result<Vec<RecordedAction>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading script {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing script {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Returns `None` when the operator aborted.
async fn drive_recording(
    recorder: &mut SessionRecorder,
    url: Option<String>,
    steps: Option<Vec<RecordedAction>>,
    network: Option<NetworkSummary>,
) -> anyhow::Result<Option<Session>> {
    if let Some(url) = url {
        recorder.perform(RecordedAction::navigate(url)).await?;
    }
    let keep = match steps {
        Some(steps) => {
            for step in steps {
                recorder.perform(step).await?;
            }
            true
        }
        None => repl::run_recording(recorder).await?,
    };
    if !keep {
        return Ok(None);
    }
    if let Some(summary) = network {
        recorder.attach_network(summary)?;
    }
    Ok(Some(recorder.stop().await?))
}

async fn record(
    engine: &ReplayEngine,
    task: &str,
    level: Option<CaptureLevel>,
    url: Option<String>,
    network_log: Option<PathBuf>,
    visible: bool,
    script: Option<PathBuf>,
) -> anyhow::Result<()> {
    let steps = match &script {
        Some(path) => Some(load_script(path).await?),
        None => None,
    };
    let network = match &network_log {
        Some(path) => Some(TrafficLog::load(path).await?.summarize()),
        None => None,
    };

    let page = launch(LaunchOptions {
        visible,
        user_data_dir: None,
    })
    .await?;
    let mut recorder = engine.start_recording(page.clone(), task, level);
    let outcome = drive_recording(&mut recorder, url, steps, network).await;

    close(&page).await;
    match outcome? {
        Some(session) => {
            let path = engine.store().session_path(&session.id);
            info!("Recorded {} action(s)", session.actions.len());
            println!("{}", path.display());
        }
        None => eprintln!("Recording aborted; nothing saved."),
    }
    Ok(())
}

async fn run(
    engine: &ReplayEngine,
    session: &Session,
    analysis: &Path,
    visible: bool,
    profile: Option<String>,
) -> anyhow::Result<()> {
    let analysis = load_analysis(analysis).await?;
    let decision = engine.decide(session, &analysis).await?;
    info!("Chose {}: {}", decision.chosen, decision.reasoning);

    let user_data_dir = match profile {
        Some(id) => Some(engine.store().build_profile_bundle(&session.state, &id).await?),
        None => None,
    };
    let page = launch(LaunchOptions {
        visible,
        user_data_dir,
    })
    .await?;

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted; cancelling run...");
                cancel.cancel();
            }
        })
    };

    let outcome = engine
        .execute_until(&page, session, &decision, cancel)
        .await;
    watcher.abort();
    close(&page).await;

    let report = match outcome {
        Ok(report) => report,
        Err(EngineError::Exhausted { attempts }) => {
            for attempt in &attempts {
                eprintln!(
                    "  attempt {} {} {:?}: {}",
                    attempt.attempt_index,
                    attempt.modality_used,
                    attempt.status,
                    attempt.errors.join("; ")
                );
            }
            bail!("all modalities exhausted after {} attempt(s)", attempts.len());
        }
        Err(e) => return Err(e.into()),
    };

    print_json(&report)?;
    if report.result.trace.is_some() {
        let score = engine.evaluate(session, &report.result)?;
        info!("Fidelity {:.3}", score.overall());
        print_json(&score)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries results.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref()).await?;

    let visible = matches!(&args.command, Command::Run { visible: true, .. });
    let engine = ReplayEngine::open(config, Arc::new(TerminalAssistant::new(visible))).await?;

    match args.command {
        Command::Record {
            task,
            level,
            url,
            network_log,
            visible,
            script,
        } => record(&engine, &task, level, url, network_log, visible, script).await?,
        Command::Decide { session, analysis } => {
            let session = engine.store().load_session(&session).await?;
            let analysis = load_analysis(&analysis).await?;
            print_json(&engine.decide(&session, &analysis).await?)?;
        }
        Command::Run {
            session,
            analysis,
            visible,
            profile,
        } => {
            let session = engine.store().load_session(&session).await?;
            run(&engine, &session, &analysis, visible, profile).await?;
        }
        Command::Diff { a, b } => {
            let a = engine.store().load(&a).await?;
            let b = engine.store().load(&b).await?;
            print_json(&diff(&a, &b))?;
        }
        Command::Bundle { state, profile } => {
            let state = engine.store().load(&state).await?;
            let dir = engine.store().build_profile_bundle(&state, &profile).await?;
            println!("{}", dir.display());
        }
        Command::Ledger => print_json(&engine.ledger().all_stats().await)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("visual").unwrap(), CaptureLevel::Visual);
        assert_eq!(parse_level("Actions").unwrap(), CaptureLevel::Actions);
        assert!(parse_level("everything").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let args = Args::try_parse_from([
            "reprise",
            "run",
            "--session",
            "s.json",
            "--analysis",
            "a.json",
            "--visible",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::Run { visible: true, .. }));
    }
}
