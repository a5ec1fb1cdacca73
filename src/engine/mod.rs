//! Safe configuration mutation.
//!
//! [`MutationEngine::run`] drives one directive through
//! evaluate → authorize → backup → edit → validate → apply → verify, restoring
//! the snapshot whenever a later step fails. Routines only describe *what*
//! to change; every change to a config file goes through here.

pub mod permissions;
pub mod stage;

use crate::audit::AuditSink;
use crate::authorize::{AuthorizationProvider, AuthorizationRequest};
use crate::directive::{ConfigTarget, Directive, Existence};
use crate::editor;
use crate::error::{HardenError, Result};
use crate::policy::{Policy, is_compliant};
use crate::resolver::{EffectiveValueResolver, Resolution};
use crate::service::ServiceController;
use crate::snapshot::{self, ConfigSnapshot};
use crate::validate::ConfigValidator;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use strum::Display;
use tracing::{error, info, warn};

pub use stage::{MutationStage, StageTracker};

/// Terminal result of one engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MutationOutcome {
    NoChangeNeeded,
    Denied,
    AppliedAndVerified,
    AppliedButVerificationFailed,
    ValidationFailed,
    RestartFailed,
}

impl MutationOutcome {
    /// The host ends up compliant
    pub const fn is_compliant(self) -> bool {
        matches!(self, Self::NoChangeNeeded | Self::AppliedAndVerified)
    }

    /// The change was attempted and undone
    pub const fn was_rolled_back(self) -> bool {
        matches!(
            self,
            Self::AppliedButVerificationFailed | Self::ValidationFailed | Self::RestartFailed
        )
    }
}

/// Everything the engine needs for one directive
pub struct MutationContext<'a> {
    pub target: ConfigTarget,
    pub directive: Directive,
    pub policy: Policy,
    /// Service that reads the target, restarted after the edit
    pub service: Option<String>,
    pub resolver: &'a dyn EffectiveValueResolver,
    pub validator: &'a dyn ConfigValidator,
}

impl MutationContext<'_> {
    /// `<path> <key>`, used in prompts and audit entries
    pub fn subject(&self) -> String {
        format!("{} {}", self.target.path.display(), self.directive.key)
    }
}

/// What happened during a run
#[derive(Debug, Clone)]
pub struct MutationReport {
    pub subject: String,
    pub outcome: MutationOutcome,
    pub previous: Resolution,
    pub final_value: Option<Resolution>,
    pub backup: Option<PathBuf>,
    /// Validator output or the error that triggered a rollback
    pub diagnostics: Option<String>,
    pub history: Vec<(MutationStage, DateTime<Local>)>,
}

impl MutationReport {
    pub fn stages(&self) -> Vec<MutationStage> {
        self.history.iter().map(|(stage, _)| *stage).collect()
    }
}

/// Drives directives through the mutation protocol
pub struct MutationEngine<'a> {
    services: &'a dyn ServiceController,
    authorizer: &'a dyn AuthorizationProvider,
    audit: &'a dyn AuditSink,
    require_root: bool,
}

/// Per-run state shared by the steps after Backup
struct InFlight<'r> {
    tracker: StageTracker,
    snapshot: ConfigSnapshot,
    was_active: Option<bool>,
    previous: Resolution,
    subject: &'r str,
}

impl<'a> MutationEngine<'a> {
    pub fn new(
        services: &'a dyn ServiceController,
        authorizer: &'a dyn AuthorizationProvider,
        audit: &'a dyn AuditSink,
    ) -> Self {
        Self {
            services,
            authorizer,
            audit,
            require_root: true,
        }
    }

    /// Allow runs without root (tests, `HOSTHARDEN_SKIP_ROOT_CHECK`)
    pub fn without_root_check(mut self) -> Self {
        self.require_root = false;
        self
    }

    pub fn audit(&self) -> &dyn AuditSink {
        self.audit
    }

    pub fn services(&self) -> &dyn ServiceController {
        self.services
    }

    pub fn authorizer(&self) -> &dyn AuthorizationProvider {
        self.authorizer
    }

    pub fn requires_root(&self) -> bool {
        self.require_root
    }

    pub(crate) fn check_privileges(&self) -> Result<()> {
        if self.require_root && !nix::unistd::geteuid().is_root() {
            return Err(HardenError::precondition(
                "root privileges are required to change system configuration",
            ));
        }
        Ok(())
    }

    /// Report backups left behind by earlier runs
    pub(crate) fn report_stray_backups(&self, target: &std::path::Path) {
        for stray in snapshot::find_stray_backups(target) {
            warn!("Stray backup from an earlier run: {}", stray.display());
            self.audit
                .record(&format!("Stray backup from an earlier run: {}", stray.display()));
        }
    }

    /// Run one directive through the full protocol
    pub fn run(&self, ctx: &MutationContext<'_>) -> Result<MutationReport> {
        let subject = ctx.subject();
        let mut tracker = StageTracker::new();

        // Start
        self.check_privileges()?;
        let path = ctx.target.path();
        if ctx.target.existence == Existence::MustExist && !path.exists() {
            return Err(HardenError::precondition(format!("{} does not exist", path.display())));
        }
        self.report_stray_backups(path);
        let was_active = match &ctx.service {
            Some(name) => Some(self.services.is_active(name)?),
            None => None,
        };

        // Evaluate
        tracker.advance(MutationStage::Evaluate)?;
        let (previous, ambiguity) = match ctx.resolver.resolve(&ctx.target, &ctx.directive) {
            Ok(resolution) => (resolution, None),
            Err(e @ HardenError::ResolutionAmbiguous { .. }) => {
                warn!("{}: {}; treating as non-compliant", subject, e);
                (Resolution::Unknown, Some(e.to_string()))
            }
            Err(e) => return Err(e),
        };
        if ambiguity.is_none() && is_compliant(&previous, &ctx.policy) {
            tracker.advance(MutationStage::Done)?;
            info!("{}: compliant ({})", subject, previous);
            self.audit.record(&format!("{}: compliant ({})", subject, previous));
            return Ok(Self::finish(subject, MutationOutcome::NoChangeNeeded, previous, None, None, None, tracker));
        }

        // AwaitingAuthorization
        tracker.advance(MutationStage::AwaitingAuthorization)?;
        let request = AuthorizationRequest::new(
            subject.clone(),
            previous.to_string(),
            ctx.directive.desired_display(),
        );
        if !self.authorizer.authorize(&request) {
            tracker.advance(MutationStage::Done)?;
            info!("{}: change denied, current {}", subject, previous);
            self.audit
                .record(&format!("{}: change to {} denied (current {})", subject, ctx.directive.desired_display(), previous));
            return Ok(Self::finish(subject, MutationOutcome::Denied, previous, None, None, ambiguity, tracker));
        }

        // Backup: failure aborts before any write. From here on the tracker
        // holds the critical section, so signals wait for a terminal stage.
        tracker.advance(MutationStage::Backup)?;
        let snapshot = ConfigSnapshot::capture(path).inspect_err(|e| {
            error!("{}: {}", subject, e);
            self.audit.record(&format!("{}: backup failed, nothing changed: {}", subject, e));
        })?;
        if let Some(artifact) = snapshot.artifact() {
            self.audit
                .record(&format!("Backed up {} to {}", path.display(), artifact.display()));
        }

        let mut run = InFlight {
            tracker,
            snapshot,
            was_active,
            previous,
            subject: &subject,
        };

        // Edit
        run.tracker.advance(MutationStage::Edit)?;
        if let Err(e) = self.edit(ctx, &run.snapshot) {
            error!("{}: {}", subject, e);
            run.tracker.advance(MutationStage::Rollback)?;
            self.rollback(ctx, &run, false)?;
            self.audit.record(&format!("{}: edit failed, restored original: {}", subject, e));
            return Err(e);
        }

        // Validate
        run.tracker.advance(MutationStage::Validate)?;
        let validation = match ctx.validator.validate(path) {
            Ok(report) if report.passed => None,
            Ok(report) => Some(report.diagnostics),
            Err(e) => Some(e.to_string()),
        };
        if let Some(diagnostics) = validation {
            warn!("{}: {} rejected the edit: {}", subject, ctx.validator.name(), diagnostics);
            self.audit.record(&format!(
                "{}: validation failed ({}), restored original: {}",
                subject,
                ctx.validator.name(),
                diagnostics
            ));
            return self.roll_back_to(ctx, run, MutationOutcome::ValidationFailed, diagnostics, false);
        }

        // Apply
        if let Some(name) = &ctx.service {
            run.tracker.advance(MutationStage::Apply)?;
            if let Err(e) = self.services.restart(name) {
                warn!("{}: restart of {} failed: {}", subject, name, e);
                self.audit
                    .record(&format!("{}: restart of {} failed, restoring original: {}", subject, name, e));
                return self.roll_back_to(ctx, run, MutationOutcome::RestartFailed, e.to_string(), true);
            }
        }

        // Verify
        run.tracker.advance(MutationStage::Verify)?;
        let after = match ctx.resolver.resolve(&ctx.target, &ctx.directive) {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("{}: cannot re-read value after change: {}", subject, e);
                Resolution::Unknown
            }
        };
        if !is_compliant(&after, &ctx.policy) {
            let diagnostics = format!("effective value is {} after the change, wanted {}", after, ctx.policy);
            warn!("{}: {}", subject, diagnostics);
            self.audit
                .record(&format!("{}: verification failed, restoring original: {}", subject, diagnostics));
            let touched = ctx.service.is_some();
            let mut report = self.roll_back_to(ctx, run, MutationOutcome::AppliedButVerificationFailed, diagnostics, touched)?;
            report.final_value = Some(after);
            return Ok(report);
        }

        run.tracker.advance(MutationStage::Done)?;
        info!("{}: {} -> {}", subject, run.previous, after);
        self.audit
            .record(&format!("{}: changed from {} to {}", subject, run.previous, after));
        let backup = run.snapshot.artifact().map(|p| p.to_path_buf());
        Ok(Self::finish(
            subject.clone(),
            MutationOutcome::AppliedAndVerified,
            run.previous,
            Some(after),
            backup,
            None,
            run.tracker,
        ))
    }

    /// Rewrite the target from the snapshot's bytes
    fn edit(&self, ctx: &MutationContext<'_>, snapshot: &ConfigSnapshot) -> Result<()> {
        let path = ctx.target.path();
        let original = match snapshot.contents() {
            Some(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| HardenError::edit(path, format!("not valid UTF-8: {}", e)))?,
            None => "",
        };
        let edit = editor::apply(original, &ctx.directive)?;
        if !edit.changed {
            info!("{}: file already holds the desired text", ctx.subject());
            return Ok(());
        }

        let meta = snapshot.meta();
        let mode = ctx
            .target
            .required_mode
            .or(meta.map(|m| m.mode))
            .unwrap_or(0o644);
        snapshot::write_replacing(path, edit.content.as_bytes(), mode)
            .map_err(|e| HardenError::edit(path, e.to_string()))?;

        let owner = ctx.target.required_owner.or(meta.map(|m| (m.uid, m.gid)));
        if let Some((uid, gid)) = owner {
            std::os::unix::fs::chown(path, Some(uid), Some(gid))
                .map_err(|e| HardenError::edit(path, format!("cannot set owner {}:{}: {}", uid, gid, e)))?;
        }
        info!("{}: wrote {}", ctx.subject(), ctx.directive);
        Ok(())
    }

    fn roll_back_to(
        &self,
        ctx: &MutationContext<'_>,
        mut run: InFlight<'_>,
        outcome: MutationOutcome,
        diagnostics: String,
        service_touched: bool,
    ) -> Result<MutationReport> {
        run.tracker.advance(MutationStage::Rollback)?;
        self.rollback(ctx, &run, service_touched)?;
        run.tracker.advance(MutationStage::Done)?;
        let backup = run.snapshot.artifact().map(|p| p.to_path_buf());
        let restored = ctx.resolver.resolve(&ctx.target, &ctx.directive).ok();
        Ok(Self::finish(
            run.subject.to_string(),
            outcome,
            run.previous,
            restored,
            backup,
            Some(diagnostics),
            run.tracker,
        ))
    }

    /// Restore the snapshot and put the service back in its prior state
    fn rollback(&self, ctx: &MutationContext<'_>, run: &InFlight<'_>, service_touched: bool) -> Result<()> {
        if let Err(e) = run.snapshot.restore() {
            error!("{}: ROLLBACK FAILED: {}", run.subject, e);
            self.audit
                .record(&format!("{}: ROLLBACK FAILED, manual intervention required: {}", run.subject, e));
            return Err(e);
        }
        self.audit
            .record(&format!("{}: restored {} from snapshot", run.subject, ctx.target.path.display()));

        let (Some(name), Some(was_active), true) = (&ctx.service, run.was_active, service_touched) else {
            return Ok(());
        };
        if was_active {
            if let Err(e) = self.services.restart(name) {
                let err = HardenError::rollback_failed(
                    ctx.target.path(),
                    format!("original config restored but {} did not come back: {}", name, e),
                );
                error!("{}: {}", run.subject, err);
                self.audit
                    .record(&format!("{}: ROLLBACK FAILED, manual intervention required: {}", run.subject, err));
                return Err(err);
            }
            self.audit.record(&format!("{}: restarted {} with original config", run.subject, name));
        } else if self.services.is_active(name).unwrap_or(true) {
            match self.services.stop(name) {
                Ok(()) => self.audit.record(&format!("{}: stopped {} (was inactive before)", run.subject, name)),
                Err(e) => {
                    warn!("{}: could not stop {}: {}", run.subject, name, e);
                    self.audit.record(&format!("{}: could not stop {}: {}", run.subject, name, e));
                }
            }
        }
        Ok(())
    }

    fn finish(
        subject: String,
        outcome: MutationOutcome,
        previous: Resolution,
        final_value: Option<Resolution>,
        backup: Option<PathBuf>,
        diagnostics: Option<String>,
        tracker: StageTracker,
    ) -> MutationReport {
        MutationReport {
            subject,
            outcome,
            previous,
            final_value,
            backup,
            diagnostics,
            history: tracker.into_history(),
        }
    }
}
