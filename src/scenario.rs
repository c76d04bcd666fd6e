//! Scenario definitions: JSON scenario files and the builtin scenarios for
//! the toolshed, settings and feedback pages.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::driver::{Predicate, Step};
use crate::error::{HarnessError, Result};
use crate::loader::PageSource;
use crate::mock::{MockSpec, StorageArea};

/// Extension version the builtin mocks report from `runtime.getManifest`.
const EXTENSION_VERSION: &str = "1.4";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub page: PageSource,
    #[serde(default)]
    pub mock: MockSpec,
    pub steps: Vec<Step>,
    /// Step timeout for steps that do not set their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Scenario {
    pub fn step_timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    /// Navigation plus every step's timeout. Past this the run is abandoned.
    pub fn overall_bound(&self, default: Duration) -> Duration {
        let step_default = self.step_timeout(default);
        self.steps
            .iter()
            .map(|step| step.timeout(step_default))
            .fold(step_default, |total, timeout| total + timeout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::InvalidScenario(
                "scenario name must not be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(HarnessError::InvalidScenario(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }
        self.mock.validate()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScenarioFile {
    Many(Vec<Scenario>),
    One(Box<Scenario>),
}

/// Read a JSON file holding one scenario or a list of them.
pub fn load_file(path: &Path) -> Result<Vec<Scenario>> {
    let content = std::fs::read_to_string(path)?;
    let parsed: ScenarioFile = serde_json::from_str(&content).map_err(|e| {
        HarnessError::InvalidScenario(format!("{}: {e}", path.display()))
    })?;
    let scenarios = match parsed {
        ScenarioFile::Many(scenarios) => scenarios,
        ScenarioFile::One(scenario) => vec![*scenario],
    };
    for scenario in &scenarios {
        scenario.validate()?;
    }
    Ok(scenarios)
}

/// Reject a run list that names a scenario twice: both runs would write to
/// the same `<results>/<name>/` directory.
pub fn ensure_unique_names(scenarios: &[Scenario]) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for scenario in scenarios {
        let dir = crate::recorder::sanitize_name(&scenario.name);
        if !seen.insert(dir) {
            return Err(HarnessError::InvalidScenario(format!(
                "scenario '{}' is selected more than once",
                scenario.name
            )));
        }
    }
    Ok(())
}

pub const BUILTIN_NAMES: &[&str] = &[
    "feedback_modal",
    "feedback_submission",
    "feedback_modal_focus",
    "settings_sync_storage",
    "settings_feedback",
    "stats_tab",
];

pub fn builtin(name: &str) -> Option<Scenario> {
    match name {
        "feedback_modal" => Some(feedback_modal()),
        "feedback_submission" => Some(feedback_submission()),
        "feedback_modal_focus" => Some(feedback_modal_focus()),
        "settings_sync_storage" => Some(settings_sync_storage()),
        "settings_feedback" => Some(settings_feedback()),
        "stats_tab" => Some(stats_tab()),
        _ => None,
    }
}

pub fn builtins() -> Vec<Scenario> {
    BUILTIN_NAMES.iter().filter_map(|name| builtin(name)).collect()
}

const FEEDBACK_TRIGGER: &str = "#open-feedback-modal";
const FEEDBACK_ROOT: &str = "#ops-toolshed-feedback-root";
const FEEDBACK_NEXT: &str = "#otf-next-btn";

/// Replaces the submit handler so no mail client opens while the success
/// toast still shows.
const SUPPRESS_SUBMIT_SCRIPT: &str = r#"
window.feedbackModalFeature.handleSubmit = function () {
  window.feedbackModalFeature.showToast('Email opening: look for it now.', 'success');
  console.log('Mock submit: navigation prevented');
};
"#;

fn open_feedback_modal() -> Vec<Step> {
    vec![
        Step::click(FEEDBACK_TRIGGER),
        Step::wait_for(Predicate::attached(FEEDBACK_ROOT)).with_timeout_ms(5_000),
    ]
}

fn feedback_modal() -> Scenario {
    let mut steps = open_feedback_modal();
    steps.push(Step::screenshot("feedback_modal"));
    Scenario {
        name: "feedback_modal".to_string(),
        page: PageSource::file("toolshed.html"),
        mock: MockSpec::extension(EXTENSION_VERSION),
        steps,
        timeout_ms: None,
    }
}

fn feedback_submission() -> Scenario {
    let mut steps = open_feedback_modal();
    steps.extend([
        Step::select("#otf-section", "General/Other"),
        Step::select("#otf-type", "Feedback"),
        Step::fill("#otf-tip", "This is a test feedback."),
        Step::fill("#otf-ideaBy", "Test User"),
        Step::fill("#otf-name", "Tester"),
        Step::click(FEEDBACK_NEXT),
        Step::wait_for(Predicate::has_class("#otf-step-2", "active")),
        Step::screenshot("feedback_slider_step2"),
        Step::evaluate(
            SUPPRESS_SUBMIT_SCRIPT,
            Some(Predicate::defined("feedbackModalFeature.handleSubmit")),
        ),
        Step::click(FEEDBACK_NEXT),
        Step::wait_for(Predicate::has_class(".otf-toast", "visible")).with_timeout_ms(5_000),
        Step::screenshot("feedback_toast"),
    ]);
    Scenario {
        name: "feedback_submission".to_string(),
        page: PageSource::file("toolshed.html"),
        mock: MockSpec::extension(EXTENSION_VERSION),
        steps,
        timeout_ms: None,
    }
}

fn feedback_modal_focus() -> Scenario {
    let mut steps = open_feedback_modal();
    steps.extend([
        Step::focus("#otf-tip"),
        Step::screenshot("feedback_modal_focus"),
    ]);
    Scenario {
        name: "feedback_modal_focus".to_string(),
        page: PageSource::file("toolshed.html"),
        mock: MockSpec::extension(EXTENSION_VERSION),
        steps,
        timeout_ms: None,
    }
}

fn settings_sync_storage() -> Scenario {
    let sync = json!({
        "alwaysShowCommentsEnabled": true,
        "logoReplaceEnabled": true,
        "customReminders": [],
        "prismaReminderFrequency": "daily",
        "prismaCountdownDuration": "5",
        "metaReminderEnabled": true,
        "iasReminderEnabled": true,
        "fontSizeToggleEnabled": false,
        "resizableChatToggleEnabled": false,
        "scheduledChatToggleEnabled": false,
        "addCampaignShortcutEnabled": false,
        "hidingSectionsEnabled": false,
        "automateFormFieldsEnabled": false,
        "countPlacementsSelectedEnabled": false,
        "approverWidgetOptimiseEnabled": false,
        "swapAccountsEnabled": false,
        "timesheetReminderEnabled": false,
        "reminderDay": "Friday",
        "reminderTime": "14:30"
    });
    let mock = MockSpec::extension(EXTENSION_VERSION)
        .with_storage(StorageArea::Sync, as_object(sync))
        .with_storage(StorageArea::Local, as_object(json!({ "timeBombActive": false })));
    Scenario {
        name: "settings_sync_storage".to_string(),
        page: PageSource::file("settings.html"),
        mock,
        steps: vec![
            Step::wait_for(Predicate::text_contains("h1", "Settings")),
            Step::wait_for(Predicate::text_contains("body", "See Comments on Locked Buys")),
            Step::wait_for(Predicate::attached("#seeCommentsOnLockedBuysToggle")),
            Step::wait_for(Predicate::text_non_empty("#build-info")),
            Step::extract_text("#build-info", "build_info"),
            Step::host_calls("settings_host_calls"),
            Step::full_page_screenshot("settings"),
        ],
        timeout_ms: None,
    }
}

fn settings_feedback() -> Scenario {
    let mut steps = open_feedback_modal();
    steps.push(Step::screenshot("settings_feedback"));
    Scenario {
        name: "settings_feedback".to_string(),
        page: PageSource::file("settings.html"),
        mock: MockSpec::extension(EXTENSION_VERSION),
        steps,
        timeout_ms: None,
    }
}

fn stats_tab() -> Scenario {
    let local = json!({
        "prismaUserStats": {
            "visitedCampaigns": ["1", "2", "3"],
            "totalLoadingTime": 12.3456,
            "placementsAdded": 5
        },
        "statsStartDate": "2023-01-01T12:00:00.000Z",
        "visitTimestamps": [
            "2023-01-01T12:00:00.000Z",
            "2023-01-02T12:00:00.000Z",
            "2023-01-02T18:00:00.000Z",
            "2023-01-03T12:00:00.000Z"
        ]
    });
    Scenario {
        name: "stats_tab".to_string(),
        page: PageSource::served(
            "toolshed.html",
            &["toolshed.js", "toolshed.css", "style.css"],
        ),
        mock: MockSpec::extension(EXTENSION_VERSION).with_storage(StorageArea::Local, as_object(local)),
        steps: vec![
            Step::click(r#".tab-button[data-tab="stats"]"#),
            Step::wait_for(Predicate::text_non_empty("#campaigns-visited-stat")).with_timeout_ms(5_000),
            Step::extract_text("#campaigns-visited-stat", "campaigns_visited"),
            Step::screenshot("stats_tab"),
        ],
        timeout_ms: None,
    }
}

fn as_object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}
