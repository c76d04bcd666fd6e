//! Console output, uncaught errors and JavaScript dialogs raised by the page
//! under test.

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::{
    DialogType, EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    EventConsoleApiCalled, EventExceptionThrown, RemoteObject,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{HarnessError, Result};

/// How long `detach` waits for already-queued events once the tab is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageMessage {
    /// Console method (`log`, `error`, ...), `exception`, or the dialog
    /// type (`alert`, `confirm`, ...).
    pub level: String,
    pub text: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DiagnosticsLog {
    pub console: Vec<PageMessage>,
    pub errors: Vec<PageMessage>,
    pub dialogs: Vec<PageMessage>,
}

/// Listens to the tab's console, exception and dialog events for the life
/// of a scenario, logging each one as it arrives.
///
/// An open dialog blocks `Runtime.evaluate`, so every dialog is answered
/// straight away: alerts and before-unload prompts are accepted, confirms
/// and prompts dismissed.
pub struct PageDiagnostics {
    log: Arc<Mutex<DiagnosticsLog>>,
    tasks: Vec<JoinHandle<()>>,
}

impl PageDiagnostics {
    pub async fn attach(page: &Page, scenario: &str) -> Result<Self> {
        let log = Arc::new(Mutex::new(DiagnosticsLog::default()));

        let mut console = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|e| HarnessError::browser("subscribing to console events", e))?;
        let mut exceptions = page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(|e| HarnessError::browser("subscribing to page errors", e))?;
        let mut dialogs = page
            .event_listener::<EventJavascriptDialogOpening>()
            .await
            .map_err(|e| HarnessError::browser("subscribing to dialogs", e))?;

        let console_log = Arc::clone(&log);
        let label = scenario.to_string();
        let console_task = tokio::spawn(async move {
            while let Some(event) = console.next().await {
                let level = format!("{:?}", event.r#type).to_ascii_lowercase();
                let text = format_console_args(&event.args);
                log::info!("[{label}] PAGE LOG ({level}): {text}");
                console_log.lock().await.console.push(PageMessage {
                    level,
                    text,
                    at: chrono::Utc::now(),
                });
            }
        });

        let error_log = Arc::clone(&log);
        let label = scenario.to_string();
        let error_task = tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                let details = &event.exception_details;
                let text = details
                    .exception
                    .as_ref()
                    .and_then(|exception| exception.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                log::warn!("[{label}] PAGE ERROR: {text}");
                error_log.lock().await.errors.push(PageMessage {
                    level: "exception".to_string(),
                    text,
                    at: chrono::Utc::now(),
                });
            }
        });

        let dialog_log = Arc::clone(&log);
        let dialog_page = page.clone();
        let label = scenario.to_string();
        let dialog_task = tokio::spawn(async move {
            while let Some(event) = dialogs.next().await {
                let level = format!("{:?}", event.r#type).to_ascii_lowercase();
                let accept = accepts_dialog(&event.r#type);
                log::warn!(
                    "[{label}] PAGE DIALOG ({level}): {} -> {}",
                    event.message,
                    if accept { "accepted" } else { "dismissed" }
                );
                dialog_log.lock().await.dialogs.push(PageMessage {
                    level,
                    text: event.message.clone(),
                    at: chrono::Utc::now(),
                });
                if let Err(err) = dialog_page
                    .execute(HandleJavaScriptDialogParams::new(accept))
                    .await
                {
                    log::warn!("[{label}] failed to answer dialog: {err}");
                }
            }
        });

        Ok(Self {
            log,
            tasks: vec![console_task, error_task, dialog_task],
        })
    }

    /// Copy of everything captured so far.
    pub async fn snapshot(&self) -> DiagnosticsLog {
        self.log.lock().await.clone()
    }

    /// Hand back what was captured. Call after the tab is closed: events
    /// still queued get a short window to land before the listeners stop.
    pub async fn detach(mut self) -> DiagnosticsLog {
        for task in &mut self.tasks {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut *task).await.is_err() {
                task.abort();
            }
        }
        self.snapshot().await
    }
}

/// Only dialogs with a single button are accepted.
fn accepts_dialog(kind: &DialogType) -> bool {
    matches!(kind, DialogType::Alert | DialogType::Beforeunload)
}

fn format_console_args(args: &[RemoteObject]) -> String {
    args.iter()
        .map(|arg| match (&arg.value, &arg.description) {
            (Some(serde_json::Value::String(text)), _) => text.clone(),
            (Some(value), _) => value.to_string(),
            (None, Some(description)) => description.clone(),
            (None, None) => format!("{:?}", arg.r#type).to_ascii_lowercase(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
