//! deploy-gcp CLI entrypoint.
//!
//! Rendered plans, reports and check results go to stdout; logs go to
//! stderr.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use deploy_gcp::cli::{Cli, Commands, Detail, LogFormat, OutputFormatter, SelectionArgs};
use deploy_gcp::config::{ConfigLoader, ConfigStore, ConfigValidator, ProgressSettings, RuntimeSettings};
use deploy_gcp::driver::{CommandRunner, DriverSet, ProcessRunner};
use deploy_gcp::error::{DeployError, Result};
use deploy_gcp::planner::{CancelHandle, ExecuteOptions, Executor, Planner};
use deploy_gcp::preflight::Preflight;
use deploy_gcp::scaffold;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Everything succeeded or there was nothing to do.
const EXIT_OK: u8 = 0;
/// A section failed, or `check` found runtime issues.
const EXIT_FAILED: u8 = 1;
/// Configuration, validation or planning error.
const EXIT_CONFIG: u8 = 2;
/// The operator interrupted the run.
const EXIT_CANCELLED: u8 = 130;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    ExitCode::from(runtime.block_on(run(cli)))
}

/// Initializes the logging system. `RUST_LOG` applies unless `-v` is given.
fn init_logging(verbose: u8, format: LogFormat) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli) -> u8 {
    let root = cli.root_dir();
    let output = cli.output;

    let result = match cli.command {
        Commands::Init { force } => {
            cmd_init(&root, force, &OutputFormatter::new(output, Detail::Summary))
        }
        Commands::Plan { selection, all } => {
            cmd_plan(&root, &selection, OutputFormatter::new(output, detail(all))).await
        }
        Commands::Check { selection, all } => {
            cmd_check(&root, &selection, OutputFormatter::new(output, detail(all))).await
        }
        Commands::Deploy {
            selection,
            dry_run,
            stop_on_first_failure,
            yes,
        } => {
            let options = DeployOptions {
                dry_run,
                stop_on_first_failure,
                yes,
            };
            cmd_deploy(&root, &selection, options, OutputFormatter::new(output, Detail::Summary)).await
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("{}", OutputFormatter::new(output, Detail::Summary).format_error(&e.to_string()));
            if e.is_pre_execution() { EXIT_CONFIG } else { EXIT_FAILED }
        }
    }
}

const fn detail(all: bool) -> Detail {
    if all { Detail::Full } else { Detail::Summary }
}

/// Flags of `deploy`.
#[derive(Debug, Clone, Copy)]
struct DeployOptions {
    dry_run: bool,
    stop_on_first_failure: bool,
    yes: bool,
}

/// Write example files.
fn cmd_init(root: &Path, force: bool, formatter: &OutputFormatter) -> Result<u8> {
    let report = scaffold::init(root, force)?;
    println!("{}", formatter.format_init(&report));
    Ok(EXIT_OK)
}

/// Show the plan.
async fn cmd_plan(root: &Path, selection: &SelectionArgs, formatter: OutputFormatter) -> Result<u8> {
    let config = load_validated(root)?;
    let formatter = formatter.with_secrets(&config);
    let settings = RuntimeSettings::from_config(&config)?;
    let drivers = DriverSet::for_gcp(&config, runner(settings.progress))?;

    let plan = Planner::new(drivers, settings)
        .plan(&config, &selection.request())
        .await?;
    println!("{}", formatter.format_plan(&plan, &config));
    Ok(EXIT_OK)
}

/// Run preflight checks.
async fn cmd_check(root: &Path, selection: &SelectionArgs, formatter: OutputFormatter) -> Result<u8> {
    let config = ConfigLoader::new(root).load()?;
    let formatter = formatter.with_secrets(&config);
    // Malformed progress keys are reported by the checks themselves.
    let runner = runner(ProgressSettings::from_config(&config).unwrap_or_default());
    let drivers = DriverSet::for_gcp(&config, Arc::clone(&runner))?;

    let report = Preflight::new(runner, drivers)
        .run(&config, &selection.request())
        .await?;
    println!("{}", formatter.format_check(&report));

    let code = report.exit_code();
    debug!("Check finished with exit code {code}");
    u8::try_from(code).map_err(|_| DeployError::internal(format!("unexpected check exit code {code}")))
}

/// Plan, confirm and execute.
async fn cmd_deploy(
    root: &Path,
    selection: &SelectionArgs,
    options: DeployOptions,
    formatter: OutputFormatter,
) -> Result<u8> {
    let config = load_validated(root)?;
    let formatter = formatter.with_secrets(&config);
    let settings = RuntimeSettings::from_config(&config)?;
    let drivers = DriverSet::for_gcp(&config, runner(settings.progress))?;

    let plan = Planner::new(drivers.clone(), settings)
        .plan(&config, &selection.request())
        .await?;
    println!("{}", formatter.format_plan(&plan, &config));

    if !options.dry_run && plan.change_count() > 0 && !options.yes && !confirm()? {
        eprintln!("Deploy cancelled.");
        return Ok(EXIT_OK);
    }

    let mut execute = ExecuteOptions::from_settings(&settings);
    execute.dry_run = options.dry_run;
    execute.stop_on_first_failure |= options.stop_on_first_failure;

    let handle = CancelHandle::new();
    let signal = handle.signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the run");
            handle.cancel();
        }
    });

    let report = Executor::new(drivers, execute).execute(&plan, &signal).await;
    println!("{}", formatter.format_report(&report));

    if report.was_cancelled() {
        Ok(EXIT_CANCELLED)
    } else if report.success {
        info!("Deploy finished");
        Ok(EXIT_OK)
    } else {
        Ok(EXIT_FAILED)
    }
}

/// Loads configuration and fails on missing or invalid keys.
fn load_validated(root: &Path) -> Result<ConfigStore> {
    let config = ConfigLoader::new(root).load()?;
    let validation = ConfigValidator::new().validate(&config);
    for warning in &validation.warnings {
        warn!("{warning}");
    }
    validation.into_result()?;
    Ok(config)
}

fn runner(progress: ProgressSettings) -> Arc<dyn CommandRunner> {
    Arc::new(ProcessRunner::with_progress(progress))
}

/// Asks the operator on stderr; anything but `y`/`yes` declines.
fn confirm() -> Result<bool> {
    eprint!("Do you want to apply this plan? [y/N]: ");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let answer = input.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}
