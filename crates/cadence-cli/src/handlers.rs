//! Command handlers for CLI operations

use anyhow::{Context as _, Result, bail};
use cadence_agent::{Orchestrator, PlanningOutcome, RunReport, StepStatus, StopReason};
use cadence_core::{CadenceConfig, ModelProvider};
use cadence_providers::OpenRouterProvider;
use cadence_tooling::{AutoApprove, ChannelApprovalSurface};
use console::{Term, style};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

use crate::cli::{Cli, Commands, RequestArgs};
use crate::prompt::serve_approvals;

const DEFAULT_LOG_FILTER: &str = "cadence_agent=info,cadence_tooling=info";

/// Runs the parsed command line.
///
/// # Errors
/// Returns an error if configuration, logging or the provider cannot be set up,
/// planning fails, or a run ends without succeeding.
pub async fn dispatch(cli: Cli) -> Result<()> {
    let LoadedConfig { config, warnings } = load_config(cli.config.as_deref(), cli.project)?;
    init_logging(&config.workspace.root_path, cli.log_stderr)?;
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    let mut provider = OpenRouterProvider::from_config(&config.provider, config.api_key())?;
    if let Some(model) = cli.model {
        provider = provider.with_model(model);
    }
    let provider: Arc<dyn ModelProvider> = Arc::new(provider);
    let approval_timeout = config.execution.approval_timeout();
    let orchestrator = Orchestrator::new(provider, config).with_role(cli.role);

    match cli.command {
        Commands::Plan { target } => handle_plan(&orchestrator, &target).await,
        Commands::Run { target, yes } => {
            let report = if yes {
                orchestrator
                    .run(&target.request, target.file.as_deref(), &AutoApprove)
                    .await?
            } else {
                let (surface, events) = ChannelApprovalSurface::new(approval_timeout);
                let prompter = tokio::spawn(serve_approvals(events));
                let report = orchestrator
                    .run(&target.request, target.file.as_deref(), &surface)
                    .await;
                drop(surface);
                prompter.await?;
                report?
            };
            write_stdout(&render_run(&report)?)?;
            if !report.succeeded() {
                bail!("run stopped: {}", describe_stop(&report.stop));
            }
            Ok(())
        }
    }
}

/// Loads `path`, or `~/.cadence/config.toml` when no path is given, and applies
/// the project override.
///
/// # Errors
/// Returns an error if an explicitly named config file cannot be loaded.
pub fn load_config(path: Option<&Path>, project: Option<PathBuf>) -> Result<LoadedConfig> {
    let mut loaded = match path {
        Some(path) => LoadedConfig {
            config: CadenceConfig::load_from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            warnings: Vec::new(),
        },
        None => LoadedConfig::or_default(CadenceConfig::load_or_create()),
    };
    if let Some(project) = project {
        loaded.config.workspace.root_path = project;
    }
    Ok(loaded)
}

/// A config and the problems met while loading it.
///
/// Loading happens before logging is set up, so warnings are carried out and
/// logged by the caller.
#[derive(Debug)]
pub struct LoadedConfig {
    /// Settings to run with
    pub config: CadenceConfig,
    /// Messages to log once logging is initialized
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    fn or_default(result: cadence_core::Result<CadenceConfig>) -> Self {
        match result {
            Ok(config) => Self {
                config,
                warnings: Vec::new(),
            },
            Err(error) => Self {
                config: CadenceConfig::default(),
                warnings: vec![
                    format!("Failed to load config from ~/.cadence/config.toml: {error}"),
                    "Using default configuration".to_owned(),
                ],
            },
        }
    }
}

/// Folder for run artifacts inside the project.
pub fn cadence_folder(project_root: &Path) -> PathBuf {
    project_root.join(".cadence")
}

fn init_logging(project_root: &Path, log_stderr: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    if log_stderr {
        Registry::default()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr).with_target(true))
            .try_init()?;
        return Ok(());
    }

    let folder = cadence_folder(project_root);
    fs::create_dir_all(&folder)
        .with_context(|| format!("creating {}", folder.display()))?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(folder.join("debug.log"))?;

    Registry::default()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(Arc::new(log_file))
                .with_ansi(false)
                .with_target(true)
                .with_level(true),
        )
        .try_init()?;
    Ok(())
}

async fn handle_plan(orchestrator: &Orchestrator, target: &RequestArgs) -> Result<()> {
    let outcome = orchestrator
        .plan(&target.request, target.file.as_deref())
        .await?;
    write_stdout(&render_planning(&outcome)?)
}

fn render_planning(outcome: &PlanningOutcome) -> Result<String> {
    let mut text = String::new();
    let analysis = &outcome.analysis;
    writeln!(
        text,
        "{} {} ({} tier, confidence {:.2})",
        style("Analysis:").bold(),
        analysis.analysis.summary,
        analysis.tier,
        analysis.analysis.confidence
    )?;
    let plan = &outcome.plan.plan;
    writeln!(
        text,
        "{} {} tier, {} file changes, {} commands",
        style("Plan:").bold(),
        outcome.plan.tier,
        plan.file_steps().count(),
        plan.terminal_steps().count()
    )?;
    text.push_str(&plan.to_string());
    for diagnostic in &outcome.plan.diagnostics {
        writeln!(text, "  {} {diagnostic}", style("dropped:").yellow())?;
    }
    Ok(text)
}

fn render_run(report: &RunReport) -> Result<String> {
    let mut text = render_planning(&report.planning)?;
    for (index, round) in report.rounds.iter().enumerate() {
        let label = if index == 0 {
            "Primary plan".to_owned()
        } else {
            format!("Recovery round {index}")
        };
        writeln!(text, "\n{}", style(label).bold())?;
        if index > 0 {
            text.push_str(&round.plan.to_string());
        }
        for step in &round.execution.steps {
            writeln!(
                text,
                "  [p{}] {} {}: {}",
                step.priority,
                step.kind,
                step.file_path,
                describe_status(&step.status)
            )?;
        }
    }
    writeln!(text, "\n{}", describe_stop(&report.stop))?;
    Ok(text)
}

fn describe_status(status: &StepStatus) -> String {
    match status {
        StepStatus::Applied(change) => format!("applied ({change:?})"),
        StepStatus::Pending => "not applied".to_owned(),
        StepStatus::ApplyFailed(reason) => format!("apply failed: {reason}"),
        StepStatus::Succeeded => "succeeded".to_owned(),
        StepStatus::Failed {
            exit_code: Some(code),
        } => format!("failed with exit code {code}"),
        StepStatus::Failed { exit_code: None } => "killed by a signal".to_owned(),
        StepStatus::TimedOut { timeout_ms } => format!("timed out after {timeout_ms}ms"),
        StepStatus::SpawnFailed(reason) => format!("could not start: {reason}"),
        StepStatus::Denied(decision) => format!("not run ({decision:?})"),
        StepStatus::Skipped => "skipped".to_owned(),
    }
}

fn describe_stop(stop: &StopReason) -> String {
    match stop {
        StopReason::Completed => "Completed".to_owned(),
        StopReason::NotRecoverable => "Stopped: failure judged not recoverable".to_owned(),
        StopReason::EmptyRecoveryPlan => "Stopped: recovery produced no steps".to_owned(),
        StopReason::Halted(halt) => format!("Stopped: {halt:?}"),
        StopReason::RoundLimit => "Stopped: recovery round limit reached".to_owned(),
    }
}

fn write_stdout(text: &str) -> Result<()> {
    Term::stdout().write_str(text)?;
    Ok(())
}
