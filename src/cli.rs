use clap::{Args, Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use crate::mock::MockSpec;
use crate::runner::{self, HarnessConfig};
use crate::scenario::{self, Scenario};

#[derive(Parser)]
#[command(
    name = "pagecheck",
    version,
    about = "Drive extension pages in headless Chrome and record evidence"
)]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the builtin scenarios
    List,
    /// Run builtin and/or file scenarios
    Run(RunArgs),
    /// Print the host API mock script a scenario would install
    MockScript(MockScriptArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Builtin scenario names
    #[arg(value_name = "NAME")]
    names: Vec<String>,
    /// JSON file holding one scenario or a list of them
    #[arg(long = "scenario-file", value_name = "FILE")]
    scenario_files: Vec<PathBuf>,
    /// Run every builtin scenario
    #[arg(long, default_value_t = false)]
    all: bool,
    /// Directory holding the extension pages
    #[arg(long, value_name = "DIR")]
    pages: PathBuf,
    #[arg(long, value_name = "DIR", default_value = "results")]
    results: PathBuf,
    /// Chrome/Edge binary (discovered when omitted)
    #[arg(long, value_name = "PATH")]
    chrome: Option<PathBuf>,
    /// Download Chromium instead of using a local install
    #[arg(long, default_value_t = false)]
    fetch_chromium: bool,
    #[arg(long, default_value_t = false)]
    headed: bool,
    /// Default per-step timeout
    #[arg(long, value_name = "MS", default_value_t = crate::driver::DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,
    /// Scenarios to run at once
    #[arg(long, default_value_t = 1)]
    jobs: usize,
    /// Where browser profiles and staged pages go (system temp dir by default)
    #[arg(long, value_name = "DIR")]
    scratch_dir: Option<PathBuf>,
}

#[derive(Args)]
struct MockScriptArgs {
    /// Builtin scenario whose mock to render
    #[arg(value_name = "NAME", conflicts_with = "scenario_file")]
    name: Option<String>,
    #[arg(long = "scenario-file", value_name = "FILE")]
    scenario_file: Option<PathBuf>,
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::List => run_list(),
        Commands::Run(args) => run_scenarios(args),
        Commands::MockScript(args) => run_mock_script(args),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .try_init();
}

fn run_list() -> Result<(), Box<dyn Error>> {
    for scenario in scenario::builtins() {
        println!("{}\t{} steps", scenario.name, scenario.steps.len());
    }
    Ok(())
}

fn run_scenarios(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let scenarios = select_scenarios(&args)?;

    let mut config = HarnessConfig::new(args.pages);
    config.results_dir = args.results;
    config.chrome = args.chrome;
    config.fetch_chromium = args.fetch_chromium;
    config.headed = args.headed;
    config.default_timeout = Duration::from_millis(args.timeout_ms);
    config.jobs = args.jobs.max(1);
    config.scratch_dir = args.scratch_dir;

    let rt = tokio::runtime::Runtime::new()?;
    let reports = rt.block_on(runner::run_scenarios(&config, &scenarios, config.jobs));

    for report in &reports {
        println!("{}", report.summary());
        for problem in &report.teardown_errors {
            println!("  teardown: {problem}");
        }
    }
    let failed = reports.iter().filter(|report| !report.passed()).count();
    println!(
        "{} passed, {failed} failed; evidence in {}",
        reports.len() - failed,
        config.results_dir.display()
    );
    if failed > 0 {
        return Err(format!("{failed} of {} scenarios failed", reports.len()).into());
    }
    Ok(())
}

fn select_scenarios(args: &RunArgs) -> Result<Vec<Scenario>, Box<dyn Error>> {
    let mut selected = Vec::new();
    if args.all {
        selected.extend(scenario::builtins());
    }
    for name in &args.names {
        if args.all {
            continue;
        }
        let found = scenario::builtin(name).ok_or_else(|| {
            format!(
                "unknown scenario '{name}'; builtins are: {}",
                scenario::BUILTIN_NAMES.join(", ")
            )
        })?;
        selected.push(found);
    }
    for path in &args.scenario_files {
        selected.extend(scenario::load_file(path)?);
    }
    scenario::ensure_unique_names(&selected)?;
    if selected.is_empty() {
        return Err("no scenarios selected; name builtins, pass --scenario-file, or use --all".into());
    }
    Ok(selected)
}

fn run_mock_script(args: MockScriptArgs) -> Result<(), Box<dyn Error>> {
    let mock = match (args.name, args.scenario_file) {
        (Some(name), _) => {
            scenario::builtin(&name)
                .ok_or_else(|| format!("unknown scenario '{name}'"))?
                .mock
        }
        (None, Some(path)) => scenario::load_file(&path)?
            .into_iter()
            .next()
            .map(|scenario| scenario.mock)
            .ok_or("scenario file is empty")?,
        (None, None) => MockSpec::default(),
    };
    println!("{}", mock.init_script()?);
    Ok(())
}
