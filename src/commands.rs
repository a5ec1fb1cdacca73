//! Command dispatch: builds the collaborators once and runs what the CLI asked for.

use crate::audit::FileAuditSink;
use crate::authorize::{AuthorizationProvider, AutoApprove, AutoDeny, StdinAuthorizer};
use crate::breach::{self, BreachStatus, HttpRangeClient};
use crate::cli::{AideCommands, Cli, Commands};
use crate::command_runner::SystemRunner;
use crate::config::HardenConfig;
use crate::engine::MutationEngine;
use crate::error::HardenError;
use crate::menu;
use crate::preflight;
use crate::routines::{self, Routine, RoutineEnv, RoutineReport};
use crate::service::SystemdController;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

/// Map a CLI subcommand to its routine
pub fn routine_for(command: &Commands) -> Option<Routine> {
    Some(match command {
        Commands::Ntp => Routine::Ntp,
        Commands::Ssh => Routine::Ssh,
        Commands::PasswordPolicy => Routine::PasswordPolicy,
        Commands::Sysctl => Routine::Sysctl,
        Commands::Grub => Routine::Grub,
        Commands::Logrotate => Routine::Logrotate,
        Commands::Selinux => Routine::Selinux,
        Commands::Fail2ban => Routine::Fail2ban,
        Commands::Aide { action: AideCommands::Init } => Routine::AideInit,
        Commands::Aide { action: AideCommands::Check } => Routine::AideCheck,
        Commands::Oscap { .. } => Routine::Oscap,
        Commands::Processes => Routine::Processes,
        _ => return None,
    })
}

/// Run the parsed command line; returns the process exit code
pub fn execute(cli: &Cli) -> Result<i32> {
    if let Some(Commands::ValidateConfig { config }) = &cli.command {
        return Ok(validate_config(config));
    }

    let config = HardenConfig::load(cli.config.as_deref())?;
    if let Some(Commands::CheckPassword { stdin }) = &cli.command {
        return check_password(&config, *stdin);
    }

    let runner = SystemRunner;
    let services = SystemdController::new(&runner).with_timeout(Duration::from_secs(config.restart_timeout_secs));
    let audit = FileAuditSink::new(&config.audit_log);
    let authorizer: Box<dyn AuthorizationProvider> = if cli.yes {
        Box::new(AutoApprove)
    } else if cli.check {
        Box::new(AutoDeny)
    } else {
        Box::new(StdinAuthorizer)
    };
    let mut engine = MutationEngine::new(&services, authorizer.as_ref(), &audit);
    if preflight::should_skip_root_check() {
        engine = engine.without_root_check();
    }
    let env = RoutineEnv {
        config: &config,
        runner: &runner,
        engine: &engine,
    };

    match &cli.command {
        None | Some(Commands::Menu) => menu::run(&env),
        Some(Commands::All) => run_all(&env),
        Some(Commands::Oscap { profile, datastream }) => {
            let report = routines::oscap::run(&env, profile.as_deref(), datastream.as_deref())?;
            Ok(print_report(&report))
        }
        Some(command) => match routine_for(command) {
            Some(routine) => run_routine(routine, &env),
            None => anyhow::bail!("unsupported command {:?}", command),
        },
    }
}

/// Print a report and return its exit code
pub fn print_report(report: &RoutineReport) -> i32 {
    for line in report.summary_lines() {
        println!("{}", line);
    }
    report.exit_code()
}

pub fn run_routine(routine: Routine, env: &RoutineEnv<'_>) -> Result<i32> {
    let report = routines::run(routine, env)?;
    Ok(print_report(&report))
}

/// True if the error chain holds a failure that needs manual intervention
pub fn is_unrecoverable(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<HardenError>())
        .any(HardenError::is_unrecoverable)
}

/// Every configuration routine in menu order. A failing routine does not
/// stop the others unless a rollback failed.
pub fn run_all(env: &RoutineEnv<'_>) -> Result<i32> {
    let mut exit_code = 0;
    for &routine in Routine::CONFIGURATION {
        match routines::run(routine, env) {
            Ok(report) => exit_code = exit_code.max(print_report(&report)),
            Err(e) if is_unrecoverable(&e) => {
                return Err(e.context(format!("{} stopped the run", routine.name())));
            }
            Err(e) => {
                error!("{}: {:#}", routine.name(), e);
                println!("== {} ==\n  error: {:#}", routine, e);
                exit_code = 1;
            }
        }
    }
    Ok(exit_code)
}

/// `validate-config FILE`
pub fn validate_config(path: &Path) -> i32 {
    info!("Validating configuration file: {:?}", path);
    match HardenConfig::load_from_file(path).and_then(|config| config.validate()) {
        Ok(()) => {
            println!("✓ Configuration file is valid: {}", path.display());
            0
        }
        Err(e) => {
            eprintln!("✗ Configuration file is invalid: {:#}", e);
            1
        }
    }
}

/// `check-password`: 0 not found, 2 found, 3 lookup failed
pub fn check_password(config: &HardenConfig, from_stdin: bool) -> Result<i32> {
    let password = if from_stdin {
        breach::read_line_stdin()
    } else {
        breach::read_secret("Password to check: ")
    }
    .context("Failed to read password")?;
    if password.is_empty() {
        anyhow::bail!("no password given");
    }

    let status = match HttpRangeClient::new(
        &config.breach_check.api_url,
        Duration::from_secs(config.breach_check.timeout_secs),
    ) {
        Ok(client) => breach::check(&password, &client),
        Err(e) => BreachStatus::ResolverError(e.to_string()),
    };
    match &status {
        BreachStatus::NotFound => println!("Not found in known breaches."),
        BreachStatus::Found(count) => {
            println!("FOUND: this password appears {} time(s) in known breaches. Do not use it.", count)
        }
        BreachStatus::ResolverError(reason) => eprintln!("Breach lookup failed: {}", reason),
    }
    Ok(status.exit_code())
}
