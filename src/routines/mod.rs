//! Hardening routines.
//!
//! Each routine is a thin caller: it checks its tools, builds the
//! directives and policies for its config file, and hands them to the
//! [`MutationEngine`]. Audits that change nothing (AIDE check, OpenSCAP,
//! process scan) only report.

pub mod aide;
pub mod fail2ban;
pub mod grub;
pub mod logrotate;
pub mod ntp;
pub mod oscap;
pub mod password_policy;
pub mod processes;
pub mod selinux;
pub mod ssh;
pub mod sysctl;

use crate::authorize::AuthorizationRequest;
use crate::command_runner::CommandRunner;
use crate::config::HardenConfig;
use crate::engine::{MutationContext, MutationEngine, MutationOutcome, MutationReport};
use anyhow::{Context, Result};
use std::fmt;
use strum::{EnumIter, EnumString, IntoStaticStr};
use tracing::info;

/// A named hardening task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Routine {
    Ntp,
    Ssh,
    PasswordPolicy,
    Sysctl,
    Grub,
    Logrotate,
    Selinux,
    Fail2ban,
    AideInit,
    AideCheck,
    Oscap,
    Processes,
}

impl Routine {
    /// Routines that change configuration, in menu order
    pub const CONFIGURATION: &'static [Self] = &[
        Self::Ntp,
        Self::Ssh,
        Self::PasswordPolicy,
        Self::Sysctl,
        Self::Grub,
        Self::Logrotate,
        Self::Selinux,
        Self::Fail2ban,
    ];

    pub const fn description(self) -> &'static str {
        match self {
            Self::Ntp => "Configure NTP time synchronisation (chrony)",
            Self::Ssh => "Harden SSH daemon options",
            Self::PasswordPolicy => "Enforce password ageing in login.defs",
            Self::Sysctl => "Harden kernel network parameters",
            Self::Grub => "Restrict GRUB config permissions",
            Self::Logrotate => "Enforce log rotation and compression",
            Self::Selinux => "Set SELinux mode",
            Self::Fail2ban => "Enable Fail2Ban SSH jail",
            Self::AideInit => "Create AIDE integrity baseline",
            Self::AideCheck => "Run AIDE integrity check",
            Self::Oscap => "Run OpenSCAP compliance scan",
            Self::Processes => "Audit zombie processes",
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Shared collaborators handed to every routine
pub struct RoutineEnv<'a> {
    pub config: &'a HardenConfig,
    pub runner: &'a dyn CommandRunner,
    pub engine: &'a MutationEngine<'a>,
}

impl RoutineEnv<'_> {
    /// Ask the operator before a change that is not a file edit
    pub fn authorize(&self, subject: &str, current: &str, desired: &str) -> bool {
        let request = AuthorizationRequest::new(subject, current, desired);
        let approved = self.engine.authorizer().authorize(&request);
        if !approved {
            self.engine
                .audit()
                .record(&format!("{}: change to {} denied (current {})", subject, desired, current));
        }
        approved
    }

    /// Enable a unit at boot if it is not already (with consent)
    pub fn ensure_enabled(&self, service: &str, report: &mut RoutineReport) -> Result<()> {
        let services = self.engine.services();
        if services.is_enabled(service)? {
            report.note(format!("{} is enabled at boot", service));
            return Ok(());
        }
        if !self.authorize(&format!("service {}", service), "disabled", "enabled") {
            report.problem(format!("{} is not enabled at boot (change denied)", service));
            return Ok(());
        }
        services
            .enable(service)
            .with_context(|| format!("Failed to enable {}", service))?;
        self.engine.audit().record(&format!("service {}: enabled at boot", service));
        report.note(format!("{} enabled at boot", service));
        Ok(())
    }

    /// Run one directive through the engine and record it
    pub fn mutate(&self, ctx: &MutationContext<'_>, report: &mut RoutineReport) -> Result<MutationOutcome> {
        let mutation = self
            .engine
            .run(ctx)
            .with_context(|| format!("{} failed", ctx.subject()))?;
        let outcome = mutation.outcome;
        report.push(mutation);
        Ok(outcome)
    }
}

/// What a routine did
#[derive(Debug, Clone)]
pub struct RoutineReport {
    pub routine: Routine,
    pub mutations: Vec<MutationReport>,
    pub notes: Vec<String>,
    /// Findings that make the run non-compliant outside of a mutation
    pub problems: Vec<String>,
}

impl RoutineReport {
    pub fn new(routine: Routine) -> Self {
        Self {
            routine,
            mutations: Vec::new(),
            notes: Vec::new(),
            problems: Vec::new(),
        }
    }

    pub fn push(&mut self, mutation: MutationReport) {
        self.mutations.push(mutation);
    }

    pub fn note(&mut self, note: impl Into<String>) {
        let note = note.into();
        info!("{}", note);
        self.notes.push(note);
    }

    pub fn problem(&mut self, problem: impl Into<String>) {
        let problem = problem.into();
        tracing::warn!("{}", problem);
        self.problems.push(problem);
    }

    pub fn is_compliant(&self) -> bool {
        self.problems.is_empty() && self.mutations.iter().all(|m| m.outcome.is_compliant())
    }

    /// 0 when everything ends compliant, 1 otherwise (denied, rolled back, findings)
    pub fn exit_code(&self) -> i32 {
        if self.is_compliant() { 0 } else { 1 }
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("== {} ==", self.routine)];
        for m in &self.mutations {
            let mut line = format!("  {}: {} (was {})", m.subject, m.outcome, m.previous);
            if let Some(after) = &m.final_value {
                line.push_str(&format!(", now {}", after));
            }
            if let Some(backup) = &m.backup {
                line.push_str(&format!(", backup {}", backup.display()));
            }
            lines.push(line);
            if let Some(diagnostics) = &m.diagnostics {
                lines.extend(diagnostics.lines().map(|l| format!("      {}", l)));
            }
        }
        lines.extend(self.notes.iter().map(|n| format!("  note: {}", n)));
        lines.extend(self.problems.iter().map(|p| format!("  problem: {}", p)));
        lines.push(format!(
            "  result: {}",
            if self.is_compliant() { "compliant" } else { "NOT compliant" }
        ));
        lines
    }
}

/// Run a routine by name
pub fn run(routine: Routine, env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    info!("Running routine: {}", routine.name());
    match routine {
        Routine::Ntp => ntp::run(env),
        Routine::Ssh => ssh::run(env),
        Routine::PasswordPolicy => password_policy::run(env),
        Routine::Sysctl => sysctl::run(env),
        Routine::Grub => grub::run(env),
        Routine::Logrotate => logrotate::run(env),
        Routine::Selinux => selinux::run(env),
        Routine::Fail2ban => fail2ban::run(env),
        Routine::AideInit => aide::init(env),
        Routine::AideCheck => aide::check(env),
        Routine::Oscap => oscap::run(env, None, None),
        Routine::Processes => processes::run(env),
    }
}
