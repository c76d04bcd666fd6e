use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

const BROWSER_DISCONNECTED_ERROR: &str = "BrowserDisconnectedError: browser channel closed";

/// Everything that can end a scenario early.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The page reached for part of the host API the mock does not provide.
    #[error("page called unmocked host API: {}", apis.join(", "))]
    MockGap { apis: Vec<String> },

    #[error("TimeoutError: waiting for {predicate} failed: timeout {}ms exceeded", elapsed.as_millis())]
    SelectorTimeout {
        predicate: String,
        elapsed: Duration,
    },

    #[error("required asset not found: {}", path.display())]
    MissingAsset { path: PathBuf },

    #[error("{step} failed: {message}")]
    Step { step: String, message: String },

    #[error("scenario abandoned after exceeding its {}ms bound", bound.as_millis())]
    ScenarioTimeout { bound: Duration },

    #[error("{0}")]
    Browser(String),

    #[error("static server error: {0}")]
    Server(String),

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HarnessError {
    /// Wrap a CDP/browser failure, tagging lost-transport errors so they are
    /// not mistaken for page misbehaviour.
    pub fn browser(context: &str, err: impl std::fmt::Display) -> Self {
        let err = err.to_string();
        if is_transport_disconnected_error(&err) {
            return Self::Browser(format!("{BROWSER_DISCONNECTED_ERROR} ({context}: {err})"));
        }
        Self::Browser(format!("{context}: {err}"))
    }

    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Stable short name used in reports and CLI output.
    pub fn category(&self) -> &'static str {
        match self {
            Self::MockGap { .. } => "mock_gap",
            Self::SelectorTimeout { .. } => "selector_timeout",
            Self::MissingAsset { .. } => "asset",
            Self::Step { .. } => "step",
            Self::ScenarioTimeout { .. } => "scenario_timeout",
            Self::Browser(_) => "browser",
            Self::Server(_) => "server",
            Self::InvalidScenario(_) => "invalid_scenario",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

fn is_transport_disconnected_error(err: &str) -> bool {
    let lower = err.to_ascii_lowercase();
    lower.contains("receiver is gone")
        || lower.contains("send failed")
        || lower.contains("channel closed")
        || lower.contains("connection closed")
        || lower.contains("broken pipe")
        || lower.contains("not connected")
        || (lower.contains("websocket") && lower.contains("closed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_error_flags_lost_transport() {
        let err = HarnessError::browser("click", "WebSocket connection closed");
        let message = err.to_string();
        assert!(message.starts_with("BrowserDisconnectedError"), "{message}");
        assert!(message.contains("click: WebSocket connection closed"));
    }

    #[test]
    fn browser_error_keeps_plain_failures_plain() {
        let err = HarnessError::browser("goto", "net::ERR_FILE_NOT_FOUND");
        assert_eq!(err.to_string(), "goto: net::ERR_FILE_NOT_FOUND");
        assert_eq!(err.category(), "browser");
    }

    #[test]
    fn selector_timeout_names_predicate_and_elapsed() {
        let err = HarnessError::SelectorTimeout {
            predicate: "\".otf-toast\" to have class \"visible\"".to_string(),
            elapsed: Duration::from_millis(5_000),
        };
        let message = err.to_string();
        assert!(message.contains(".otf-toast"));
        assert!(message.contains("5000ms"));
        assert_eq!(err.category(), "selector_timeout");
    }

    #[test]
    fn mock_gap_lists_every_api() {
        let err = HarnessError::MockGap {
            apis: vec!["chrome.bookmarks".to_string(), "chrome.alarms".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "page called unmocked host API: chrome.bookmarks, chrome.alarms"
        );
    }
}
