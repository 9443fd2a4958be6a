use reprise_engine::protocol::RecordedAction;
use reprise_engine::recorder::SessionRecorder;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

pub const HELP: &[&str] = &[
    "Commands:",
    "  goto <url>            navigate and record",
    "  click <selector>      click and record",
    "  type <selector> <text>",
    "  wait <ms>",
    "  eval <script>",
    "  did <command>         record something you already did in the window",
    "  stop                  capture state and save the session",
    "  abort                 quit without saving",
];

#[derive(Debug, PartialEq)]
pub enum ReplCommand {
    /// Drive the action on the page, then record it.
    Perform(RecordedAction),
    /// Record an action the operator performed by hand.
    Note(RecordedAction),
    Help,
    Stop,
    Abort,
}

/// Bare hosts get an https scheme.
fn normalize_url(raw: &str) -> Result<String, String> {
    match Url::parse(raw) {
        Ok(url) => Ok(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", raw))
            .map(|u| u.to_string())
            .map_err(|e| format!("invalid url '{}': {}", raw, e)),
        Err(e) => Err(format!("invalid url '{}': {}", raw, e)),
    }
}

fn parse_action(line: &str) -> Result<RecordedAction, String> {
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let require = |what: &str| {
        if rest.is_empty() {
            Err(format!("{} needs {}", verb, what))
        } else {
            Ok(())
        }
    };
    match verb {
        "goto" => {
            require("a url")?;
            Ok(RecordedAction::navigate(normalize_url(rest)?))
        }
        "click" => {
            require("a selector")?;
            Ok(RecordedAction::click(rest))
        }
        "type" => {
            let (selector, text) = rest
                .split_once(' ')
                .ok_or_else(|| "type needs a selector and text".to_string())?;
            Ok(RecordedAction::type_text(selector, text))
        }
        "wait" => {
            let ms = rest
                .parse::<u64>()
                .map_err(|_| format!("wait needs milliseconds, got '{}'", rest))?;
            Ok(RecordedAction::wait(ms))
        }
        "eval" => {
            require("a script")?;
            Ok(RecordedAction::custom(rest))
        }
        other => Err(format!("unknown command '{}'", other)),
    }
}

pub fn parse_line(line: &str) -> Result<ReplCommand, String> {
    let line = line.trim();
    match line {
        "help" | "?" => return Ok(ReplCommand::Help),
        "stop" | "exit" | "quit" => return Ok(ReplCommand::Stop),
        "abort" => return Ok(ReplCommand::Abort),
        _ => {}
    }
    match line.strip_prefix("did ") {
        Some(rest) => parse_action(rest.trim()).map(ReplCommand::Note),
        None => parse_action(line).map(ReplCommand::Perform),
    }
}

/// Read commands from stdin until `stop` or `abort`. Returns true when the operator
/// asked to keep the recording.
pub async fn run_recording(recorder: &mut SessionRecorder) -> anyhow::Result<bool> {
    for line in HELP {
        eprintln!("{}", line);
    }

    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    let mut stderr = io::stderr();

    loop {
        eprint!("rec[{}]> ", recorder.actions().len());
        stderr.flush()?;

        let Some(line) = reader.next_line().await? else {
            return Ok(true);
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = match parse_line(&line) {
            Ok(ReplCommand::Help) => {
                for line in HELP {
                    eprintln!("{}", line);
                }
                continue;
            }
            Ok(ReplCommand::Stop) => return Ok(true),
            Ok(ReplCommand::Abort) => return Ok(false),
            Ok(ReplCommand::Perform(action)) => recorder.perform(action).await,
            Ok(ReplCommand::Note(action)) => recorder.record_action(action).await,
            Err(e) => {
                eprintln!("Error: {}", e);
                continue;
            }
        };
        match result {
            Ok(index) => eprintln!("recorded #{}", index),
            Err(e) => eprintln!("Error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reprise_engine::protocol::ActionKind;

    #[test]
    fn test_parse_actions() {
        assert_eq!(
            parse_line("goto example.com").unwrap(),
            ReplCommand::Perform(RecordedAction::navigate("https://example.com/"))
        );
        assert_eq!(
            parse_line("type #email ada@example.com").unwrap(),
            ReplCommand::Perform(RecordedAction::type_text("#email", "ada@example.com"))
        );
        assert_eq!(
            parse_line("  wait 250 ").unwrap(),
            ReplCommand::Perform(RecordedAction::wait(250))
        );
        match parse_line("did click button.primary").unwrap() {
            ReplCommand::Note(action) => {
                assert_eq!(action.kind, ActionKind::Click);
                assert_eq!(action.target.as_deref(), Some("button.primary"));
            }
            other => panic!("expected Note, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_control_and_errors() {
        assert_eq!(parse_line("stop").unwrap(), ReplCommand::Stop);
        assert_eq!(parse_line("abort").unwrap(), ReplCommand::Abort);
        assert_eq!(parse_line("?").unwrap(), ReplCommand::Help);
        assert!(parse_line("click").is_err());
        assert!(parse_line("wait soon").is_err());
        assert!(parse_line("type #only-selector").is_err());
        assert!(parse_line("scroll down").is_err());
    }
}
