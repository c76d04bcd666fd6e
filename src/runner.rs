//! Scenario Runner: owns every resource a scenario touches and guarantees it
//! is released, whatever the outcome.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Serialize;
use tokio::time::Instant;

use crate::browser::{self, BrowserSession, LaunchOptions};
use crate::diagnostics::{DiagnosticsLog, PageDiagnostics, PageMessage};
use crate::driver::{Driver, DriverState, DEFAULT_TIMEOUT_MS};
use crate::error::{HarnessError, Result};
use crate::loader::{PageLoader, PreparedPage};
use crate::recorder::{Artifact, EvidenceRecorder};
use crate::scenario::Scenario;

const PAGE_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub pages_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Explicit Chrome/Edge binary; discovered when absent.
    pub chrome: Option<PathBuf>,
    /// Download Chromium instead of discovering a local install.
    pub fetch_chromium: bool,
    pub headed: bool,
    pub default_timeout: Duration,
    pub jobs: usize,
    /// Parent for browser profiles and staged pages; the system temp dir
    /// when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl HarnessConfig {
    pub fn new(pages_dir: impl Into<PathBuf>) -> Self {
        Self {
            pages_dir: pages_dir.into(),
            results_dir: PathBuf::from("results"),
            chrome: None,
            fetch_chromium: false,
            headed: false,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            jobs: 1,
            scratch_dir: None,
        }
    }

    /// Explicit path, else a fetched Chromium, else the first local install.
    pub async fn resolve_chrome(&self) -> Result<PathBuf> {
        if let Some(path) = &self.chrome {
            if !path.exists() {
                return Err(HarnessError::Browser(format!(
                    "browser binary not found: {}",
                    path.display()
                )));
            }
            return Ok(path.clone());
        }
        if self.fetch_chromium {
            return browser::fetch_chromium(&browser::default_fetch_dir()).await;
        }
        browser::find_chrome_binary()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed {
        category: String,
        message: String,
        /// Zero-based index of the step that failed, if the driver got that far.
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<usize>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub run_id: String,
    pub scenario: String,
    pub outcome: Outcome,
    pub artifacts: Vec<Artifact>,
    pub console: Vec<PageMessage>,
    pub page_errors: Vec<PageMessage>,
    /// JavaScript dialogs the page opened; each was answered automatically.
    pub dialogs: Vec<PageMessage>,
    pub teardown_errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    /// One-line summary for terminal output.
    pub fn summary(&self) -> String {
        match &self.outcome {
            Outcome::Passed => format!(
                "PASS {} ({} artifacts, {}ms)",
                self.scenario,
                self.artifacts.len(),
                self.duration_ms
            ),
            Outcome::Failed {
                category,
                message,
                step,
            } => {
                let at = step.map(|s| format!(" at step {}", s + 1)).unwrap_or_default();
                format!("FAIL {}{at} [{category}]: {message}", self.scenario)
            }
        }
    }
}

/// Everything acquired for one run, released in reverse order. The tab goes
/// before the diagnostics so events it flushes while closing are kept.
#[derive(Default)]
struct Resources {
    prepared: Option<PreparedPage>,
    browser: Option<BrowserSession>,
    page: Option<Page>,
    diagnostics: Option<PageDiagnostics>,
}

impl Resources {
    async fn release(self) -> (DiagnosticsLog, Vec<String>) {
        let mut problems = Vec::new();
        if let Some(page) = self.page {
            match tokio::time::timeout(PAGE_CLOSE_TIMEOUT, page.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => problems.push(format!("closing tab: {err}")),
                Err(_) => problems.push("closing tab: timed out".to_string()),
            }
        }
        let log = match self.diagnostics {
            Some(diagnostics) => diagnostics.detach().await,
            None => DiagnosticsLog::default(),
        };
        if let Some(browser) = self.browser {
            problems.extend(browser.close().await);
        }
        if let Some(prepared) = self.prepared {
            problems.extend(prepared.release().await);
        }
        (log, problems)
    }
}

/// Run one scenario end to end and write its report. Never fails: problems
/// end up in the report's outcome and teardown errors.
pub async fn run_scenario(config: &HarnessConfig, scenario: &Scenario) -> ScenarioReport {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let clock = Instant::now();
    log::info!("[{}] starting run {run_id}", scenario.name);

    let mut recorder = match EvidenceRecorder::new(&config.results_dir, &scenario.name) {
        Ok(recorder) => recorder,
        Err(err) => {
            log::error!("[{}] cannot create results dir: {err}", scenario.name);
            let mut report = empty_report(run_id, scenario, started_at);
            report.outcome = failed(&err, None);
            return report;
        }
    };

    let mut resources = Resources::default();
    let mut failed_step = None;
    let result = drive(
        config,
        scenario,
        &mut recorder,
        &mut resources,
        &mut failed_step,
    )
    .await;

    let (diagnostics, teardown_errors) = resources.release().await;
    for problem in &teardown_errors {
        log::warn!("[{}] teardown: {problem}", scenario.name);
    }

    let outcome = match &result {
        Ok(()) => Outcome::Passed,
        Err(err) => failed(err, failed_step),
    };
    let report = ScenarioReport {
        run_id,
        scenario: scenario.name.clone(),
        outcome,
        artifacts: recorder.artifacts().to_vec(),
        console: diagnostics.console,
        page_errors: diagnostics.errors,
        dialogs: diagnostics.dialogs,
        teardown_errors,
        started_at,
        finished_at: Utc::now(),
        duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
    };

    let report_path = recorder.dir().join("report.json");
    match serde_json::to_vec_pretty(&report) {
        Ok(json) => {
            if let Err(err) = tokio::fs::write(&report_path, json).await {
                log::warn!("failed to write {}: {err}", report_path.display());
            }
        }
        Err(err) => log::warn!("failed to serialize report: {err}"),
    }
    log::info!("[{}] {}", scenario.name, report.summary());
    report
}

async fn drive(
    config: &HarnessConfig,
    scenario: &Scenario,
    recorder: &mut EvidenceRecorder,
    resources: &mut Resources,
    failed_step: &mut Option<usize>,
) -> Result<()> {
    // 1. Validate and stage the page before any browser exists
    scenario.validate()?;
    let loader = PageLoader::new(
        config.pages_dir.clone(),
        scenario.page.clone(),
        scenario.mock.clone(),
    )
    .with_scratch_dir(config.scratch_dir.clone());
    let prepared: &PreparedPage = resources.prepared.insert(loader.prepare().await?);

    // 2. Launch the browser and grab its tab
    let chrome_path = config.resolve_chrome().await?;
    let browser = resources.browser.insert(
        BrowserSession::launch(LaunchOptions {
            chrome_path,
            headed: config.headed,
            label: scenario.name.clone(),
            scratch_dir: config.scratch_dir.clone(),
        })
        .await?,
    );
    let page: &Page = resources.page.insert(browser.open_page().await?);
    resources.diagnostics = Some(PageDiagnostics::attach(page, &scenario.name).await?);

    // 3. Load and drive, all within the scenario's overall bound
    let step_timeout = scenario.step_timeout(config.default_timeout);
    let bound = scenario.overall_bound(config.default_timeout);
    let mut driver = Driver::new(page, recorder, step_timeout).with_urls(prepared.urls().clone());
    let outcome = tokio::time::timeout(bound, async {
        prepared.load(page, step_timeout).await?;
        driver.run(&scenario.steps).await
    })
    .await;

    if let DriverState::Failed { step } | DriverState::Running { step } = driver.state() {
        *failed_step = Some(step);
    }
    match outcome {
        Ok(result) => result,
        Err(_) => {
            log::warn!(
                "[{}] abandoned after exceeding {}ms",
                scenario.name,
                bound.as_millis()
            );
            Err(HarnessError::ScenarioTimeout { bound })
        }
    }
}

/// Run independent scenarios, at most `jobs` at a time. Reports come back in
/// input order; one scenario failing never stops the others.
pub async fn run_scenarios(
    config: &HarnessConfig,
    scenarios: &[Scenario],
    jobs: usize,
) -> Vec<ScenarioReport> {
    // Resolve once so parallel runs do not race a Chromium download.
    let mut config = config.clone();
    match config.resolve_chrome().await {
        Ok(path) => {
            log::info!("using browser: {}", path.display());
            config.chrome = Some(path);
        }
        Err(err) => {
            log::error!("{err}");
            return scenarios
                .iter()
                .map(|scenario| {
                    let mut report = empty_report(uuid::Uuid::new_v4().to_string(), scenario, Utc::now());
                    report.outcome = failed(&err, None);
                    report
                })
                .collect();
        }
    }

    let config = &config;
    futures::stream::iter(scenarios)
        .map(|scenario| run_scenario(config, scenario))
        .buffered(jobs.max(1))
        .collect()
        .await
}

fn failed(err: &HarnessError, step: Option<usize>) -> Outcome {
    Outcome::Failed {
        category: err.category().to_string(),
        message: err.to_string(),
        step,
    }
}

fn empty_report(run_id: String, scenario: &Scenario, started_at: DateTime<Utc>) -> ScenarioReport {
    ScenarioReport {
        run_id,
        scenario: scenario.name.clone(),
        outcome: Outcome::Passed,
        artifacts: Vec::new(),
        console: Vec::new(),
        page_errors: Vec::new(),
        dialogs: Vec::new(),
        teardown_errors: Vec::new(),
        started_at,
        finished_at: Utc::now(),
        duration_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario;

    fn sandbox_config(prefix: &str) -> (tempfile::TempDir, HarnessConfig) {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .unwrap_or_else(|err| panic!("tempdir: {err}"));
        let mut config = HarnessConfig::new(dir.path().join("pages"));
        config.results_dir = dir.path().join("results");
        // Never reached: asset checks fail first.
        config.chrome = Some(dir.path().join("no-such-chrome"));
        (dir, config)
    }

    #[tokio::test]
    async fn missing_assets_fail_before_browser_launch() {
        let (dir, config) = sandbox_config("pagecheck-runner-");
        std::fs::create_dir_all(&config.pages_dir).unwrap_or_else(|err| panic!("mkdir: {err}"));
        let scenario = scenario::builtin("stats_tab").unwrap_or_else(|| panic!("no stats_tab"));

        let report = run_scenario(&config, &scenario).await;

        match &report.outcome {
            Outcome::Failed {
                category, message, step,
            } => {
                assert_eq!(category, "asset");
                assert!(message.contains("toolshed.html"), "{message}");
                assert_eq!(*step, None);
            }
            Outcome::Passed => panic!("expected failure"),
        }
        assert!(report.teardown_errors.is_empty(), "{:?}", report.teardown_errors);
        let written = dir.path().join("results/stats_tab/report.json");
        let json = std::fs::read_to_string(&written)
            .unwrap_or_else(|err| panic!("read {}: {err}", written.display()));
        assert!(json.contains("\"status\": \"failed\""), "{json}");
    }

    #[tokio::test]
    async fn unresolvable_browser_fails_every_scenario() {
        let (_dir, config) = sandbox_config("pagecheck-runner-");
        let scenarios = vec![
            scenario::builtin("feedback_modal").unwrap_or_else(|| panic!("missing")),
            scenario::builtin("settings_feedback").unwrap_or_else(|| panic!("missing")),
        ];

        let reports = run_scenarios(&config, &scenarios, 2).await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].scenario, "feedback_modal");
        assert_eq!(reports[1].scenario, "settings_feedback");
        for report in &reports {
            assert!(!report.passed());
            assert!(report.summary().starts_with("FAIL"), "{}", report.summary());
            assert!(report.summary().contains("[browser]"), "{}", report.summary());
        }
    }

    #[test]
    fn summary_names_failing_step_one_based() {
        let mut report = empty_report("id".to_string(), &scenario::builtins()[0], Utc::now());
        report.outcome = Outcome::Failed {
            category: "selector_timeout".to_string(),
            message: "TimeoutError".to_string(),
            step: Some(1),
        };
        assert_eq!(
            report.summary(),
            "FAIL feedback_modal at step 2 [selector_timeout]: TimeoutError"
        );
    }
}
