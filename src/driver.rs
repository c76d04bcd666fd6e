//! Scenario Driver: runs steps against a live tab, one at a time, each
//! blocking on a DOM predicate rather than a fixed delay.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{HarnessError, Result};
use crate::loader::{self, PageUrls};
use crate::mock;
use crate::recorder::EvidenceRecorder;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const POLL_INTERVAL_MS: u64 = 100;
const GAP_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// A DOM (or page global) condition a step can wait on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Attached { selector: String },
    Visible { selector: String },
    HasClass { selector: String, class: String },
    TextNonEmpty { selector: String },
    TextContains { selector: String, text: String },
    /// A dotted global path, e.g. `feedbackModalFeature.handleSubmit`,
    /// resolves to something other than `undefined`.
    Defined { path: String },
}

impl Predicate {
    pub fn attached(selector: &str) -> Self {
        Self::Attached {
            selector: selector.to_string(),
        }
    }

    pub fn visible(selector: &str) -> Self {
        Self::Visible {
            selector: selector.to_string(),
        }
    }

    pub fn has_class(selector: &str, class: &str) -> Self {
        Self::HasClass {
            selector: selector.to_string(),
            class: class.to_string(),
        }
    }

    pub fn text_non_empty(selector: &str) -> Self {
        Self::TextNonEmpty {
            selector: selector.to_string(),
        }
    }

    pub fn text_contains(selector: &str, text: &str) -> Self {
        Self::TextContains {
            selector: selector.to_string(),
            text: text.to_string(),
        }
    }

    pub fn defined(path: &str) -> Self {
        Self::Defined {
            path: path.to_string(),
        }
    }

    /// Page expression yielding `true`, `false`, or `{ error }` for a
    /// malformed selector.
    pub(crate) fn probe_expression(&self) -> Result<String> {
        let check = match self {
            Self::Attached { selector } => {
                format!("!!document.querySelector({})", js_string(selector)?)
            }
            Self::Visible { selector } => format!(
                "(() => {{ const el = document.querySelector({}); return !!el && isVisible(el); }})()",
                js_string(selector)?
            ),
            Self::HasClass { selector, class } => format!(
                "(() => {{ const el = document.querySelector({}); return !!el && el.classList.contains({}); }})()",
                js_string(selector)?,
                js_string(class)?
            ),
            Self::TextNonEmpty { selector } => format!(
                "(() => {{ const el = document.querySelector({}); return !!el && (el.textContent || '').trim().length > 0; }})()",
                js_string(selector)?
            ),
            Self::TextContains { selector, text } => format!(
                "(() => {{ const el = document.querySelector({}); return !!el && (el.textContent || '').includes({}); }})()",
                js_string(selector)?,
                js_string(text)?
            ),
            // Paths through the mock global must not count as page gaps.
            Self::Defined { path } => {
                let segments: Vec<&str> = path.split('.').collect();
                format!(
                    r#"(() => {{
                        const mock = window.{state};
                        if (mock) mock.quiet = true;
                        try {{
                            return {segments}.reduce((obj, key) => (obj === null || obj === undefined) ? undefined : obj[key], window) !== undefined;
                        }} finally {{
                            if (mock) mock.quiet = false;
                        }}
                    }})()"#,
                    state = mock::MOCK_STATE_GLOBAL,
                    segments = serde_json::to_string(&segments)?
                )
            }
        };
        Ok(wrap_probe(&check))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attached { selector } => write!(f, "selector \"{selector}\""),
            Self::Visible { selector } => write!(f, "selector \"{selector}\" to be visible"),
            Self::HasClass { selector, class } => {
                write!(f, "selector \"{selector}\" to have class \"{class}\"")
            }
            Self::TextNonEmpty { selector } => {
                write!(f, "selector \"{selector}\" to have non-empty text")
            }
            Self::TextContains { selector, text } => {
                write!(f, "selector \"{selector}\" to contain text \"{text}\"")
            }
            Self::Defined { path } => write!(f, "window.{path} to be defined"),
        }
    }
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Reload the entry page, or go to a sibling `path` of it.
    Navigate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Click {
        selector: String,
    },
    Fill {
        selector: String,
        text: String,
    },
    /// Choose an option by value, falling back to its visible label.
    Select {
        selector: String,
        value: String,
    },
    Focus {
        selector: String,
    },
    WaitFor {
        predicate: Predicate,
    },
    /// Run `script` in the page once `after` (if given) holds.
    Evaluate {
        script: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<Predicate>,
    },
    Screenshot {
        checkpoint: String,
        #[serde(default)]
        full_page: bool,
    },
    ExtractText {
        selector: String,
        checkpoint: String,
    },
    HostCalls {
        checkpoint: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl From<Action> for Step {
    fn from(action: Action) -> Self {
        Self {
            action,
            timeout_ms: None,
        }
    }
}

impl Step {
    pub fn navigate(path: Option<&str>) -> Self {
        Action::Navigate {
            path: path.map(str::to_string),
        }
        .into()
    }

    pub fn click(selector: &str) -> Self {
        Action::Click {
            selector: selector.to_string(),
        }
        .into()
    }

    pub fn fill(selector: &str, text: &str) -> Self {
        Action::Fill {
            selector: selector.to_string(),
            text: text.to_string(),
        }
        .into()
    }

    pub fn select(selector: &str, value: &str) -> Self {
        Action::Select {
            selector: selector.to_string(),
            value: value.to_string(),
        }
        .into()
    }

    pub fn focus(selector: &str) -> Self {
        Action::Focus {
            selector: selector.to_string(),
        }
        .into()
    }

    pub fn wait_for(predicate: Predicate) -> Self {
        Action::WaitFor { predicate }.into()
    }

    pub fn evaluate(script: &str, after: Option<Predicate>) -> Self {
        Action::Evaluate {
            script: script.to_string(),
            after,
        }
        .into()
    }

    pub fn screenshot(checkpoint: &str) -> Self {
        Action::Screenshot {
            checkpoint: checkpoint.to_string(),
            full_page: false,
        }
        .into()
    }

    pub fn full_page_screenshot(checkpoint: &str) -> Self {
        Action::Screenshot {
            checkpoint: checkpoint.to_string(),
            full_page: true,
        }
        .into()
    }

    pub fn extract_text(selector: &str, checkpoint: &str) -> Self {
        Action::ExtractText {
            selector: selector.to_string(),
            checkpoint: checkpoint.to_string(),
        }
        .into()
    }

    pub fn host_calls(checkpoint: &str) -> Self {
        Action::HostCalls {
            checkpoint: checkpoint.to_string(),
        }
        .into()
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            Action::Navigate { path: None } => write!(f, "navigate"),
            Action::Navigate { path: Some(path) } => write!(f, "navigate to {path}"),
            Action::Click { selector } => write!(f, "click \"{selector}\""),
            Action::Fill { selector, .. } => write!(f, "fill \"{selector}\""),
            Action::Select { selector, value } => {
                write!(f, "select \"{value}\" in \"{selector}\"")
            }
            Action::Focus { selector } => write!(f, "focus \"{selector}\""),
            Action::WaitFor { predicate } => write!(f, "wait for {predicate}"),
            Action::Evaluate { .. } => write!(f, "evaluate"),
            Action::Screenshot { checkpoint, .. } => write!(f, "screenshot '{checkpoint}'"),
            Action::ExtractText { checkpoint, .. } => write!(f, "extract text '{checkpoint}'"),
            Action::HostCalls { checkpoint } => write!(f, "record host calls '{checkpoint}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DriverState {
    NotStarted,
    Running { step: usize },
    Completed,
    Failed { step: usize },
}

pub struct Driver<'a> {
    page: &'a Page,
    recorder: &'a mut EvidenceRecorder,
    urls: Option<PageUrls>,
    default_timeout: Duration,
    state: DriverState,
}

impl<'a> Driver<'a> {
    pub fn new(page: &'a Page, recorder: &'a mut EvidenceRecorder, default_timeout: Duration) -> Self {
        Self {
            page,
            recorder,
            urls: None,
            default_timeout,
            state: DriverState::NotStarted,
        }
    }

    /// URLs `navigate` steps resolve against.
    pub fn with_urls(mut self, urls: PageUrls) -> Self {
        self.urls = Some(urls);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Execute `steps` in order, stopping at the first failure.
    pub async fn run(&mut self, steps: &[Step]) -> Result<()> {
        if self.state != DriverState::NotStarted {
            return Err(HarnessError::InvalidScenario(format!(
                "driver cannot start from state {:?}",
                self.state
            )));
        }
        for (index, step) in steps.iter().enumerate() {
            self.state = DriverState::Running { step: index };
            log::info!("step {}/{}: {step}", index + 1, steps.len());
            let started = Instant::now();
            let outcome = self.execute(step).await;

            // An unmocked host API usually surfaces as some later symptom
            // (a timeout, a thrown script); report the cause instead.
            let gaps = match tokio::time::timeout(GAP_CHECK_TIMEOUT, self.mock_gaps()).await {
                Ok(Ok(gaps)) => gaps,
                Ok(Err(err)) => {
                    log::debug!("could not read mock gaps: {err}");
                    Vec::new()
                }
                Err(_) => {
                    log::warn!(
                        "mock gap check got no reply within {}ms",
                        GAP_CHECK_TIMEOUT.as_millis()
                    );
                    Vec::new()
                }
            };
            let outcome = if gaps.is_empty() {
                outcome
            } else {
                Err(HarnessError::MockGap { apis: gaps })
            };
            if let Err(err) = outcome {
                self.state = DriverState::Failed { step: index };
                log::warn!("step {}/{} ({step}) failed: {err}", index + 1, steps.len());
                return Err(err);
            }
            log::debug!("step {} done in {}ms", index + 1, started.elapsed().as_millis());
        }
        self.state = DriverState::Completed;
        Ok(())
    }

    async fn execute(&mut self, step: &Step) -> Result<()> {
        let timeout = step.timeout(self.default_timeout);
        let deadline = Instant::now() + timeout;
        let label = step.to_string();
        match &step.action {
            Action::Navigate { path } => {
                let urls = self
                    .urls
                    .as_ref()
                    .ok_or_else(|| HarnessError::step(&label, "no page has been loaded"))?;
                let url = urls.resolve(path.as_deref());
                loader::navigate(self.page, &url, timeout).await
            }
            Action::Click { selector } => {
                self.wait_interactable(selector, deadline).await?;
                self.click(selector, &label, deadline).await
            }
            Action::Fill { selector, text } => {
                self.wait_interactable(selector, deadline).await?;
                let script = format!(
                    r#"(() => {{
                        const el = document.querySelector({selector});
                        if (!el) return 'element not found';
                        el.focus();
                        el.value = {text};
                        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        return '';
                    }})()"#,
                    selector = js_string(selector)?,
                    text = js_string(text)?,
                );
                self.run_action_script(&label, script, deadline).await
            }
            Action::Select { selector, value } => {
                self.wait_interactable(selector, deadline).await?;
                let script = format!(
                    r#"(() => {{
                        const el = document.querySelector({selector});
                        if (!el) return 'element not found';
                        if (!(el instanceof HTMLSelectElement)) return 'element is not a <select>';
                        const wanted = {value};
                        const options = Array.from(el.options);
                        const option = options.find((o) => o.value === wanted) ||
                            options.find((o) => o.label.trim() === wanted || o.text.trim() === wanted);
                        if (!option) return 'no option with value or label ' + JSON.stringify(wanted);
                        el.value = option.value;
                        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        return '';
                    }})()"#,
                    selector = js_string(selector)?,
                    value = js_string(value)?,
                );
                self.run_action_script(&label, script, deadline).await
            }
            Action::Focus { selector } => {
                self.wait_interactable(selector, deadline).await?;
                let script = format!(
                    r#"(() => {{
                        const el = document.querySelector({selector});
                        if (!el) return 'element not found';
                        el.focus();
                        return document.activeElement === el ? '' : 'element did not take focus';
                    }})()"#,
                    selector = js_string(selector)?,
                );
                self.run_action_script(&label, script, deadline).await
            }
            Action::WaitFor { predicate } => {
                self.wait_until(&predicate.to_string(), &predicate.probe_expression()?, deadline)
                    .await
            }
            Action::Evaluate { script, after } => {
                if let Some(after) = after {
                    self.wait_until(&after.to_string(), &after.probe_expression()?, deadline)
                        .await?;
                }
                let outcome = bounded(&label, deadline, evaluate(self.page, script.clone())).await;
                outcome
                    .map(|_| ())
                    .map_err(|err| match err {
                        HarnessError::Step { .. } => err,
                        other => HarnessError::step(&label, other.to_string()),
                    })
            }
            Action::Screenshot {
                checkpoint,
                full_page,
            } => {
                let page = self.page;
                let recorder = &mut *self.recorder;
                bounded(&label, deadline, async move {
                    recorder.screenshot(page, checkpoint, *full_page).await.map(|_| ())
                })
                .await
            }
            Action::ExtractText {
                selector,
                checkpoint,
            } => {
                self.wait_until(
                    &Predicate::attached(selector).to_string(),
                    &Predicate::attached(selector).probe_expression()?,
                    deadline,
                )
                .await?;
                let page = self.page;
                let recorder = &mut *self.recorder;
                bounded(&label, deadline, async move {
                    recorder.text(page, selector, checkpoint).await.map(|_| ())
                })
                .await
            }
            Action::HostCalls { checkpoint } => {
                let page = self.page;
                let recorder = &mut *self.recorder;
                bounded(&label, deadline, async move {
                    recorder.host_calls(page, checkpoint).await.map(|_| ())
                })
                .await
            }
        }
    }

    /// Wait until `selector` is attached, visible and enabled.
    async fn wait_interactable(&self, selector: &str, deadline: Instant) -> Result<()> {
        let probe = wrap_probe(&format!(
            "(() => {{ const el = document.querySelector({}); return !!el && isVisible(el) && !el.disabled; }})()",
            js_string(selector)?
        ));
        self.wait_until(&format!("selector \"{selector}\" to be interactable"), &probe, deadline)
            .await
    }

    /// Poll `probe` every 100ms until it yields `true`. Each probe is itself
    /// bounded by the time left, so the deadline holds even if the page hangs.
    async fn wait_until(&self, description: &str, probe: &str, deadline: Instant) -> Result<()> {
        let started = Instant::now();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, evaluate(self.page, probe.to_string())).await {
                Ok(Ok(Some(Value::Bool(true)))) => return Ok(()),
                Ok(Ok(Some(Value::Object(map)))) => {
                    let reason = map
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("probe failed");
                    return Err(HarnessError::step(
                        format!("waiting for {description}"),
                        reason.to_string(),
                    ));
                }
                // The execution context is torn down while a navigation commits.
                Ok(Err(err)) => log::debug!("probe for {description} failed: {err}"),
                Ok(Ok(_)) | Err(_) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(HarnessError::SelectorTimeout {
                    predicate: description.to_string(),
                    elapsed: now.duration_since(started),
                });
            }
            let pause = Duration::from_millis(POLL_INTERVAL_MS).min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    /// Click through CDP pointer input once nothing covers the element's
    /// centre. An overlay that is still animating away gets until the
    /// deadline to clear.
    async fn click(&self, selector: &str, label: &str, deadline: Instant) -> Result<()> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = tokio::time::timeout(remaining, async {
                let element = self
                    .page
                    .find_element(selector)
                    .await
                    .map_err(|e| format!("element lookup failed: {e}"))?;
                ensure_element_receives_pointer_events(&element).await?;
                element
                    .click()
                    .await
                    .map_err(|e| format!("click failed: {e}"))?;
                Ok::<(), String>(())
            })
            .await;
            let reason = match attempt {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(reason)) => reason,
                Err(_) => format!("timed out after {}ms", remaining.as_millis()),
            };
            if Instant::now() >= deadline {
                return Err(HarnessError::step(label, reason));
            }
            log::debug!("{label}: {reason}; retrying");
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    /// Run a script that returns `''` on success or a failure reason.
    async fn run_action_script(&self, label: &str, script: String, deadline: Instant) -> Result<()> {
        let page = self.page;
        bounded(label, deadline, async move {
            match evaluate(page, script).await? {
                Some(Value::String(reason)) if !reason.is_empty() => {
                    Err(HarnessError::step(label, reason))
                }
                _ => Ok(()),
            }
        })
        .await
    }

    async fn mock_gaps(&self) -> Result<Vec<String>> {
        let raw = evaluate(self.page, mock::gaps_expression()).await?;
        match raw {
            Some(Value::String(raw)) => Ok(serde_json::from_str(&raw)?),
            _ => Ok(Vec::new()),
        }
    }
}

async fn bounded<T>(label: &str, deadline: Instant, fut: impl Future<Output = Result<T>>) -> Result<T> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match tokio::time::timeout(remaining, fut).await {
        Ok(result) => result,
        Err(_) => Err(HarnessError::step(
            label,
            format!("did not finish within {}ms", remaining.as_millis()),
        )),
    }
}

/// Evaluate `expression` in the page, awaiting promises, and return its
/// by-value result (`None` for `undefined`).
async fn evaluate(page: &Page, expression: String) -> Result<Option<Value>> {
    let params = EvaluateParams::builder()
        .expression(expression)
        .await_promise(true)
        .return_by_value(true)
        .build()
        .map_err(|e| HarnessError::Browser(format!("evaluate invalid params: {e}")))?;
    let result = page
        .evaluate_expression(params)
        .await
        .map_err(|e| HarnessError::browser("evaluate", e))?;
    Ok(result.value().cloned())
}

async fn ensure_element_receives_pointer_events(
    element: &chromiumoxide::Element,
) -> std::result::Result<(), String> {
    let check = element
        .call_js_fn(
            r#"function() {
                if (!this.isConnected) return 'Node is detached from document';
                this.scrollIntoView({ block: 'center', inline: 'center', behavior: 'instant' });
                const rect = this.getBoundingClientRect();
                if (rect.width <= 0 || rect.height <= 0) return 'Element is not visible';
                const x = rect.left + rect.width / 2;
                const y = rect.top + rect.height / 2;
                if (x < 0 || y < 0 || x > window.innerWidth || y > window.innerHeight) {
                    return 'Element is outside of the viewport';
                }
                const hit = document.elementFromPoint(x, y);
                if (!hit) return 'Element is outside of the viewport';
                if (this === hit || this.contains(hit)) return '';
                let out = hit.tagName.toLowerCase();
                if (hit.id) out += '#' + hit.id;
                if (hit.classList && hit.classList.length) {
                    out += '.' + Array.from(hit.classList).slice(0, 3).join('.');
                }
                return out + ' intercepts pointer events';
            }"#,
            false,
        )
        .await
        .map_err(|e| format!("pointer check failed: {e}"))?;

    let message = check
        .result
        .value
        .as_ref()
        .and_then(Value::as_str)
        .unwrap_or_default();
    if message.is_empty() {
        Ok(())
    } else {
        Err(message.to_string())
    }
}

fn js_string(value: &str) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Give a probe the shared visibility helper and turn selector syntax
/// errors into `{ error }` instead of a thrown exception.
fn wrap_probe(check: &str) -> String {
    format!(
        r#"(() => {{
            const isVisible = (el) => {{
                if (!el.isConnected) return false;
                const rect = el.getBoundingClientRect();
                if (!(rect.width > 0 && rect.height > 0)) return false;
                const style = window.getComputedStyle(el);
                return style.visibility !== 'hidden' &&
                    style.display !== 'none' &&
                    style.opacity !== '0';
            }};
            try {{
                return {check};
            }} catch (err) {{
                return {{ error: String(err) }};
            }}
        }})()"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn predicate_descriptions_name_selector_and_condition() {
        assert_eq!(
            Predicate::has_class(".otf-toast", "visible").to_string(),
            "selector \".otf-toast\" to have class \"visible\""
        );
        assert_eq!(
            Predicate::defined("feedbackModalFeature.handleSubmit").to_string(),
            "window.feedbackModalFeature.handleSubmit to be defined"
        );
    }

    #[test]
    fn predicate_check_escapes_selector_quotes() {
        let probe = Predicate::attached(r#".tab-button[data-tab="stats"]"#)
            .probe_expression()
            .unwrap_or_else(|err| panic!("probe: {err}"));
        assert!(probe.contains(r#"document.querySelector(".tab-button[data-tab=\"stats\"]")"#));
    }

    #[test]
    fn steps_read_from_json_with_optional_timeout() {
        let steps: Vec<Step> = serde_json::from_value(json!([
            { "action": "click", "selector": "#open-feedback-modal" },
            {
                "action": "wait_for",
                "predicate": { "kind": "has_class", "selector": "#otf-step-2", "class": "active" },
                "timeout_ms": 5000
            },
            { "action": "screenshot", "checkpoint": "feedback_modal" },
            { "action": "navigate" }
        ]))
        .unwrap_or_else(|err| panic!("failed to parse steps: {err}"));

        assert_eq!(steps[0], Step::click("#open-feedback-modal"));
        assert_eq!(
            steps[1],
            Step::wait_for(Predicate::has_class("#otf-step-2", "active")).with_timeout_ms(5000)
        );
        assert_eq!(steps[2], Step::screenshot("feedback_modal"));
        assert_eq!(steps[3], Step::navigate(None));
    }

    #[test]
    fn step_timeout_falls_back_to_default() {
        let default = Duration::from_millis(DEFAULT_TIMEOUT_MS);
        assert_eq!(Step::click("#a").timeout(default), default);
        assert_eq!(
            Step::click("#a").with_timeout_ms(250).timeout(default),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn step_labels_are_readable() {
        assert_eq!(
            Step::select("#otf-section", "General/Other").to_string(),
            "select \"General/Other\" in \"#otf-section\""
        );
        assert_eq!(Step::host_calls("calls").to_string(), "record host calls 'calls'");
    }
}
