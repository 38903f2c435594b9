//! Running a scenario against a list of hosts, one after another

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use declarative::{ApplyResult, ExecuteSummary, ExecutionPlan, Phase, ProgressCallback, Scenario};

use crate::config::{AuthMethod, Config};
use crate::location::{self, Location};
use crate::paths;
use crate::session::{Session, SessionError, SessionOptions};
use crate::transport::{SshTransport, Transport};
use crate::ui;

/// What `apply` was asked to do
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub scenario: PathBuf,
    pub locations: String,
    pub rehearsal: bool,
    /// Prompt for a password before the first connection
    pub password: bool,
    pub timeout: Option<u64>,
    pub agent_binary: Option<PathBuf>,
}

/// Prints one line per resource as the executor reports progress.
#[derive(Default)]
pub struct ConsoleProgress {
    line_open: bool,
}

impl ConsoleProgress {
    /// Terminate a resource line left open by an aborted run
    pub fn close_line(&mut self) {
        if self.line_open {
            ui::finish_line(&"aborted".red().to_string());
            self.line_open = false;
        }
    }
}

/// Text printed after a resource's description
pub fn outcome_text(result: &ApplyResult) -> String {
    match result {
        ApplyResult::Changed => "done".to_string(),
        ApplyResult::NoChange => "nothing to do".to_string(),
        ApplyResult::Failed { error } => format!("error: {error}"),
    }
}

impl ProgressCallback for ConsoleProgress {
    fn on_phase_start(&mut self, phase: Phase, count: usize) {
        if phase == Phase::Rehearsal {
            ui::info("rehearsal mode: no changes will be made");
        } else {
            ui::section(&format!("{phase} ({count})"));
        }
    }

    fn on_resource_start(&mut self, _id: &str, description: &str) {
        ui::begin_line(description);
        self.line_open = true;
    }

    fn on_resource_complete(&mut self, _id: &str, result: &ApplyResult) {
        let text = outcome_text(result);
        let text = match result {
            ApplyResult::Changed => text.green(),
            ApplyResult::NoChange => text.dimmed(),
            ApplyResult::Failed { .. } => text.red(),
        };
        ui::finish_line(&text.to_string());
        self.line_open = false;
    }

    fn on_phase_complete(&mut self, _phase: Phase) {}
}

/// Agent binary to upload: flag, then config, then this executable.
pub fn resolve_agent_binary(flag: Option<&Path>, config: &Config) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = config.session.agent_binary.as_deref() {
        return Ok(paths::expand(path));
    }
    std::env::current_exe().context("Could not determine the running executable")
}

/// Load the scenario and converge every location in turn.
///
/// Returns `Ok(false)` when any host failed or reported errors.
pub fn apply(config: &Config, request: &ApplyRequest) -> Result<bool> {
    let scenario = Scenario::load(&request.scenario)
        .with_context(|| format!("Could not load scenario {}", request.scenario.display()))?;
    let plan = ExecutionPlan::from_scenario(&scenario, request.rehearsal);

    let locations = location::parse_list(&request.locations);
    if locations.is_empty() {
        bail!("No locations given");
    }

    let options = SessionOptions {
        remote_tmp: config.session.remote_tmp.clone(),
        agent_binary: resolve_agent_binary(request.agent_binary.as_deref(), config)?,
        response_timeout: Duration::from_secs(
            request.timeout.unwrap_or(config.session.response_timeout_secs),
        ),
    };

    let mut password = None;
    if request.password || config.ssh.auth == AuthMethod::Password {
        password = Some(prompt_password(None)?);
    }

    let file = request.scenario.display().to_string();
    let mut all_ok = true;
    for (entry, parsed) in locations {
        ui::rule();
        let location = match parsed {
            Ok(location) => location,
            Err(e) => {
                ui::error(&format!("skipping '{entry}': {e}"));
                all_ok = false;
                continue;
            }
        };
        ui::header(&format!(
            "executing scenario '{file}' against location '{location}'"
        ));

        let mut progress = ConsoleProgress::default();
        let ssh = &config.ssh;
        let result = connect(
            |password| SshTransport::new(location.clone(), ssh.clone(), password),
            &options,
            config.session.max_auth_attempts,
            &mut password,
            || prompt_password(Some(&location)),
        )
        .and_then(|session| run_host(session, &plan, &mut progress));

        match result {
            Ok(summary) => {
                report(&summary);
                all_ok &= summary.is_success();
            }
            Err(e) => {
                progress.close_line();
                ui::error(&format!("execution failed: {e:#}"));
                all_ok = false;
            }
        }
    }
    ui::rule();
    Ok(all_ok)
}

/// Start a session, re-prompting for a password while authentication fails.
pub fn connect<T, F, P>(
    mut transport: F,
    options: &SessionOptions,
    max_attempts: u32,
    password: &mut Option<String>,
    mut prompt: P,
) -> Result<Session<T>>
where
    T: Transport,
    F: FnMut(Option<String>) -> T,
    P: FnMut() -> Result<String>,
{
    let mut retries = 0;
    loop {
        match Session::start(transport(password.clone()), options) {
            Ok(session) => return Ok(session),
            Err(SessionError::Auth(target)) if retries < max_attempts => {
                retries += 1;
                ui::warn(&format!("authentication to {target} failed"));
                *password = Some(prompt()?);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn run_host<T: Transport>(
    mut session: Session<T>,
    plan: &ExecutionPlan,
    progress: &mut ConsoleProgress,
) -> Result<ExecuteSummary> {
    log::debug!("dispatcher running in '{}'", session.workdir());
    let summary = declarative::execute(plan, &mut session, progress)?;
    session.stop().context("Could not stop the dispatcher")?;
    Ok(summary)
}

fn report(summary: &ExecuteSummary) {
    println!();
    let line = format!(
        "scenario execution completed with {} error(s) in {:.1} seconds",
        summary.errors(),
        summary.elapsed.as_secs_f64()
    );
    if summary.is_success() {
        ui::success(&line);
    } else {
        ui::warn(&line);
    }
    ui::kv("changed", &summary.changed.to_string());
    ui::kv("unchanged", &summary.no_change.to_string());
    if !summary.restarted.is_empty() {
        ui::kv("restarted", &summary.restarted.join(", "));
    }
}

fn prompt_password(location: Option<&Location>) -> Result<String> {
    let prompt = match location {
        Some(location) => format!("Password for {location}"),
        None => "SSH password".to_string(),
    };
    dialoguer::Password::new()
        .with_prompt(prompt)
        .interact()
        .context("Could not read password")
}

/// Validate a scenario and print its phases without contacting any host.
pub fn check(path: &Path) -> Result<()> {
    let scenario = Scenario::load(path)
        .with_context(|| format!("Could not load scenario {}", path.display()))?;
    let plan = ExecutionPlan::from_scenario(&scenario, false);

    ui::header(&format!("scenario '{}'", path.display()));
    for phase in Phase::ALL {
        let resources = plan.phase(phase);
        if resources.is_empty() {
            continue;
        }
        ui::section(&format!("{phase} ({})", resources.len()));
        for resource in resources {
            ui::dim(&resource.description());
        }
    }

    let restarts = plan.possible_restarts();
    if !restarts.is_empty() {
        ui::section("service restarts (if changed)");
        for service in restarts.names() {
            ui::dim(service);
        }
    }

    println!();
    ui::success(&format!("{} resource(s), scenario is valid", plan.total_resources()));
    Ok(())
}
