//! Headless-browser verification harness for extension pages.
//!
//! A [`scenario::Scenario`] names a page, the host API mock it runs under and
//! the steps to drive through it. [`runner::run_scenario`] stages the page,
//! launches Chrome, installs the mock before any page script runs, drives the
//! steps and records evidence under `<results>/<scenario>/`.

pub mod browser;
pub mod cli;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod loader;
pub mod mock;
pub mod recorder;
pub mod runner;
pub mod scenario;
pub mod server;

pub use error::{HarnessError, Result};
pub use mock::{MockSpec, StorageArea, Stub};
pub use runner::{run_scenario, run_scenarios, HarnessConfig, ScenarioReport};
pub use scenario::Scenario;
