//! End-to-end runs of the mutation protocol against temp files.
//!
//! Services, validators and consent are faked; the files, snapshots and
//! rollbacks are real.

use hostharden::audit::MemoryAuditSink;
use hostharden::authorize::{AuthorizationProvider, AuthorizationRequest, AutoApprove, AutoDeny};
use hostharden::directive::{ConfigTarget, Directive};
use hostharden::engine::{MutationContext, MutationEngine, MutationOutcome, MutationStage};
use hostharden::error::{HardenError, Result};
use hostharden::policy::Policy;
use hostharden::resolver::{CurrentValue, EffectiveValueResolver, LayeredResolver, Resolution, ValueSource};
use hostharden::service::ServiceController;
use hostharden::snapshot;
use hostharden::validate::{ConfigValidator, SkipValidation, ValidationReport};
use hostharden::PermissionTarget;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const SSHD_CONFIG: &str = "# sshd\nPort 22\nLoginGraceTime 120\nPermitRootLogin yes\n";

/// Records calls; restarts fail for the first `fail_restarts` attempts
#[derive(Default)]
struct FakeServices {
    active: Cell<bool>,
    fail_restarts: Cell<u32>,
    calls: RefCell<Vec<String>>,
}

impl FakeServices {
    fn active() -> Self {
        let services = Self::default();
        services.active.set(true);
        services
    }

    fn failing_restarts(self, count: u32) -> Self {
        self.fail_restarts.set(count);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn log(&self, verb: &str, name: &str) {
        self.calls.borrow_mut().push(format!("{} {}", verb, name));
    }
}

impl ServiceController for FakeServices {
    fn is_enabled(&self, _name: &str) -> Result<bool> {
        Ok(true)
    }

    fn enable(&self, name: &str) -> Result<()> {
        self.log("enable", name);
        Ok(())
    }

    fn is_active(&self, _name: &str) -> Result<bool> {
        Ok(self.active.get())
    }

    fn start(&self, name: &str) -> Result<()> {
        self.log("start", name);
        self.active.set(true);
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.log("stop", name);
        self.active.set(false);
        Ok(())
    }

    fn restart(&self, name: &str) -> Result<()> {
        self.log("restart", name);
        let remaining = self.fail_restarts.get();
        if remaining > 0 {
            self.fail_restarts.set(remaining - 1);
            self.active.set(false);
            return Err(HardenError::apply(format!("{} failed to start", name)));
        }
        self.active.set(true);
        Ok(())
    }
}

/// Rejects any file containing `needle`
struct RejectContaining(&'static str);

impl ConfigValidator for RejectContaining {
    fn validate(&self, path: &Path) -> Result<ValidationReport> {
        let text = fs::read_to_string(path)?;
        Ok(if text.contains(self.0) {
            ValidationReport::fail(format!("line containing {:?} rejected", self.0))
        } else {
            ValidationReport::pass()
        })
    }

    fn name(&self) -> String {
        "reject-containing".into()
    }
}

/// Always reports the same value, whatever the file says
struct StuckResolver(&'static str);

impl EffectiveValueResolver for StuckResolver {
    fn resolve(&self, _target: &ConfigTarget, _directive: &Directive) -> Result<Resolution> {
        Ok(Resolution::Value(CurrentValue::single(self.0, ValueSource::Live)))
    }
}

/// Hands out queued answers first, then defers to the file
struct QueuedResolver {
    queue: RefCell<VecDeque<Result<Resolution>>>,
}

impl QueuedResolver {
    fn new(answers: Vec<Result<Resolution>>) -> Self {
        Self {
            queue: RefCell::new(answers.into()),
        }
    }
}

impl EffectiveValueResolver for QueuedResolver {
    fn resolve(&self, target: &ConfigTarget, directive: &Directive) -> Result<Resolution> {
        match self.queue.borrow_mut().pop_front() {
            Some(answer) => answer,
            None => LayeredResolver::file_only().resolve(target, directive),
        }
    }
}

/// Counts how often consent was asked for
struct CountingApprover(Cell<u32>);

impl AuthorizationProvider for CountingApprover {
    fn authorize(&self, _request: &AuthorizationRequest) -> bool {
        self.0.set(self.0.get() + 1);
        true
    }
}

fn sshd_fixture() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sshd_config");
    fs::write(&path, SSHD_CONFIG).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
    (dir, path)
}

fn grace_time<'r>(
    path: &Path,
    resolver: &'r dyn EffectiveValueResolver,
    validator: &'r dyn ConfigValidator,
) -> MutationContext<'r> {
    MutationContext {
        target: ConfigTarget::existing(path),
        directive: Directive::setting("LoginGraceTime", "60").with_default("120"),
        policy: Policy::range(1, 60),
        service: Some("sshd".into()),
        resolver,
        validator,
    }
}

fn backups(path: &Path) -> Vec<PathBuf> {
    snapshot::find_stray_backups(path)
}

#[test]
fn already_compliant_touches_nothing() {
    let (_dir, path) = sshd_fixture();
    fs::write(&path, "LoginGraceTime 45\n").unwrap();
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();

    let report = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap();

    assert_eq!(report.outcome, MutationOutcome::NoChangeNeeded);
    assert_eq!(report.stages(), vec![MutationStage::Start, MutationStage::Evaluate, MutationStage::Done]);
    assert_eq!(fs::read_to_string(&path).unwrap(), "LoginGraceTime 45\n");
    assert!(backups(&path).is_empty());
    assert!(services.calls().is_empty());
    assert!(audit.contains("compliant"));
}

#[test]
fn approved_change_is_applied_and_verified() {
    let (_dir, path) = sshd_fixture();
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();

    let report = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap();

    assert_eq!(report.outcome, MutationOutcome::AppliedAndVerified);
    assert_eq!(
        report.stages(),
        vec![
            MutationStage::Start,
            MutationStage::Evaluate,
            MutationStage::AwaitingAuthorization,
            MutationStage::Backup,
            MutationStage::Edit,
            MutationStage::Validate,
            MutationStage::Apply,
            MutationStage::Verify,
            MutationStage::Done,
        ]
    );
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "# sshd\nPort 22\nLoginGraceTime 60\nPermitRootLogin yes\n"
    );
    assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);

    let backup = report.backup.expect("backup artifact");
    assert_eq!(fs::read_to_string(&backup).unwrap(), SSHD_CONFIG);
    assert_eq!(services.calls(), vec!["restart sshd"]);
    assert!(audit.contains("changed from \"120\" to \"60\""));
}

#[test]
fn second_run_needs_no_change() {
    let (_dir, path) = sshd_fixture();
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();

    let first = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap();
    assert_eq!(first.outcome, MutationOutcome::AppliedAndVerified);
    let after_first = fs::read(&path).unwrap();

    let second = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap();
    assert_eq!(second.outcome, MutationOutcome::NoChangeNeeded);
    assert_eq!(fs::read(&path).unwrap(), after_first);
    assert_eq!(services.calls(), vec!["restart sshd"]);
}

#[test]
fn validation_failure_restores_original_without_restart() {
    let (_dir, path) = sshd_fixture();
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();
    let validator = RejectContaining("LoginGraceTime 60");

    let report = engine.run(&grace_time(&path, &resolver, &validator)).unwrap();

    assert_eq!(report.outcome, MutationOutcome::ValidationFailed);
    assert!(report.outcome.was_rolled_back());
    assert_eq!(fs::read_to_string(&path).unwrap(), SSHD_CONFIG);
    assert!(report.diagnostics.as_ref().unwrap().contains("rejected"));
    assert!(report.stages().contains(&MutationStage::Rollback));
    assert!(!report.stages().contains(&MutationStage::Apply));
    assert!(services.calls().is_empty());
    assert!(audit.contains("validation failed"));
}

#[test]
fn restart_failure_rolls_back_and_brings_service_back() {
    let (_dir, path) = sshd_fixture();
    let services = FakeServices::active().failing_restarts(1);
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();

    let report = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap();

    assert_eq!(report.outcome, MutationOutcome::RestartFailed);
    assert_eq!(fs::read_to_string(&path).unwrap(), SSHD_CONFIG);
    assert_eq!(services.calls(), vec!["restart sshd", "restart sshd"]);
    assert!(services.active.get());
    assert!(audit.contains("restarted sshd with original config"));
}

#[test]
fn service_that_stays_down_is_unrecoverable() {
    let (_dir, path) = sshd_fixture();
    let services = FakeServices::active().failing_restarts(2);
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();

    let err = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap_err();

    assert!(matches!(err, HardenError::RollbackFailed { .. }));
    assert!(err.is_unrecoverable());
    // The file itself is back even though the service is not
    assert_eq!(fs::read_to_string(&path).unwrap(), SSHD_CONFIG);
    assert!(audit.contains("ROLLBACK FAILED"));
}

#[test]
fn inactive_service_is_stopped_again_after_rollback() {
    let (_dir, path) = sshd_fixture();
    let services = FakeServices::default();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = StuckResolver("120");

    let report = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap();

    assert_eq!(report.outcome, MutationOutcome::AppliedButVerificationFailed);
    assert_eq!(fs::read_to_string(&path).unwrap(), SSHD_CONFIG);
    assert_eq!(services.calls(), vec!["restart sshd", "stop sshd"]);
    assert!(!services.active.get());
}

#[test]
fn verification_failure_restores_snapshot() {
    let (_dir, path) = sshd_fixture();
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = StuckResolver("120");

    let report = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap();

    assert_eq!(report.outcome, MutationOutcome::AppliedButVerificationFailed);
    assert_eq!(fs::read_to_string(&path).unwrap(), SSHD_CONFIG);
    assert!(report.diagnostics.unwrap().contains("after the change"));
    assert_eq!(services.calls(), vec!["restart sshd", "restart sshd"]);
    assert!(audit.contains("verification failed"));
}

#[test]
fn denied_change_leaves_file_untouched() {
    let (_dir, path) = sshd_fixture();
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoDeny, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();

    let report = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap();

    assert_eq!(report.outcome, MutationOutcome::Denied);
    assert!(!report.outcome.is_compliant());
    assert_eq!(fs::read_to_string(&path).unwrap(), SSHD_CONFIG);
    assert!(backups(&path).is_empty());
    assert!(services.calls().is_empty());
    assert!(audit.contains("denied"));
}

#[test]
fn ambiguous_value_is_treated_as_non_compliant() {
    let (_dir, path) = sshd_fixture();
    fs::write(&path, "LoginGraceTime 30\n").unwrap();
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let approver = CountingApprover(Cell::new(0));
    let engine = MutationEngine::new(&services, &approver, &audit).without_root_check();
    let resolver = QueuedResolver::new(vec![Err(HardenError::ResolutionAmbiguous {
        key: "LoginGraceTime".into(),
        path: path.clone(),
        reason: "live query failed".into(),
    })]);

    let report = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap();

    // Consent was still required even though the file turned out fine
    assert_eq!(approver.0.get(), 1);
    assert_eq!(report.previous, Resolution::Unknown);
    assert_eq!(report.outcome, MutationOutcome::AppliedAndVerified);
    assert_eq!(fs::read_to_string(&path).unwrap(), "LoginGraceTime 60\n");
}

#[test]
fn missing_required_file_is_a_precondition_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent_config");
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();

    let err = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap_err();

    assert!(matches!(err, HardenError::Precondition(_)));
    assert!(!path.exists());
    assert!(services.calls().is_empty());
}

#[test]
fn created_drop_in_is_removed_on_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("99-hostharden.conf");
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();
    let validator = RejectContaining("ip_forward");
    let ctx = MutationContext {
        target: ConfigTarget::drop_in(&path, 0o644),
        directive: Directive::setting("net.ipv4.ip_forward", "0").with_separator(hostharden::Separator::SpacedEquals),
        policy: Policy::Exact("0".into()),
        service: None,
        resolver: &resolver,
        validator: &validator,
    };

    let report = engine.run(&ctx).unwrap();

    assert_eq!(report.outcome, MutationOutcome::ValidationFailed);
    assert!(report.backup.is_none());
    assert!(!path.exists());
}

#[test]
fn drop_in_is_created_with_required_mode() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("99-hostharden.conf");
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();
    let ctx = MutationContext {
        target: ConfigTarget::drop_in(&path, 0o644),
        directive: Directive::setting("kernel.kptr_restrict", "2").with_separator(hostharden::Separator::SpacedEquals),
        policy: Policy::Exact("2".into()),
        service: None,
        resolver: &resolver,
        validator: &SkipValidation,
    };

    let report = engine.run(&ctx).unwrap();

    assert_eq!(report.outcome, MutationOutcome::AppliedAndVerified);
    assert!(!report.stages().contains(&MutationStage::Apply));
    assert_eq!(fs::read_to_string(&path).unwrap(), "kernel.kptr_restrict = 2\n");
    assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o644);
}

#[test]
fn stray_backups_are_reported_before_the_run() {
    let (_dir, path) = sshd_fixture();
    let stray = snapshot::artifact_path(&path, "20200101000000", 0);
    fs::write(&stray, SSHD_CONFIG).unwrap();
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoDeny, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();

    engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap();

    assert!(audit.contains("Stray backup"));
    assert!(audit.contains("20200101000000"));
    // Reported, never deleted
    assert!(stray.exists());
}

#[test]
fn permissions_are_tightened_and_left_alone_when_compliant() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grub.cfg");
    fs::write(&path, "set timeout=5\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    let services = FakeServices::default();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let target = PermissionTarget::new(&path, 600);

    let report = engine.enforce_permissions(&target).unwrap();
    assert_eq!(report.outcome, MutationOutcome::AppliedAndVerified);
    assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
    assert_eq!(fs::read_to_string(&path).unwrap(), "set timeout=5\n");

    let again = engine.enforce_permissions(&target).unwrap();
    assert_eq!(again.outcome, MutationOutcome::NoChangeNeeded);
}

#[test]
fn permission_change_can_be_denied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grub.cfg");
    fs::write(&path, "set timeout=5\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    let services = FakeServices::default();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoDeny, &audit).without_root_check();

    let report = engine.enforce_permissions(&PermissionTarget::new(&path, 600)).unwrap();

    assert_eq!(report.outcome, MutationOutcome::Denied);
    assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o644);
}

#[test]
fn absent_key_is_appended_and_service_restarted() {
    let (_dir, path) = sshd_fixture();
    fs::write(&path, "Port 22\n").unwrap();
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();

    let report = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap();

    assert_eq!(report.outcome, MutationOutcome::AppliedAndVerified);
    // Absent key falls back to the compiled-in default
    assert!(report.previous.to_string().contains("120"));
    assert!(report.stages().contains(&MutationStage::Apply));
    assert_eq!(report.stages().last(), Some(&MutationStage::Done));
    assert_eq!(fs::read_to_string(&path).unwrap(), "Port 22\nLoginGraceTime 60\n");
    assert_eq!(services.calls(), vec!["restart sshd"]);
    assert!(audit.contains("to \"60\""));
}

#[test]
fn edit_failure_restores_original_bytes() {
    let (_dir, path) = sshd_fixture();
    let original: &[u8] = b"Port 22\nBanner \xff\xfe\n";
    fs::write(&path, original).unwrap();
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = QueuedResolver::new(vec![Err(HardenError::ResolutionAmbiguous {
        key: "LoginGraceTime".into(),
        path: path.clone(),
        reason: "live query failed".into(),
    })]);

    let err = engine.run(&grace_time(&path, &resolver, &SkipValidation)).unwrap_err();

    assert!(matches!(err, HardenError::Edit { .. }), "{}", err);
    assert_eq!(fs::read(&path).unwrap(), original);
    assert!(audit.contains("edit failed, restored original"));
    assert!(services.calls().is_empty());
}

#[test]
fn appended_key_lands_above_match_block() {
    let (_dir, path) = sshd_fixture();
    fs::write(&path, "Port 22\nMatch User backup\n    #LoginGraceTime 10\n").unwrap();
    let services = FakeServices::active();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();
    let resolver = LayeredResolver::file_only();
    let mut ctx = grace_time(&path, &resolver, &SkipValidation);
    ctx.directive = ctx.directive.with_insert_before(hostharden::routines::ssh::MATCH_BLOCK);

    let report = engine.run(&ctx).unwrap();

    assert_eq!(report.outcome, MutationOutcome::AppliedAndVerified);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "Port 22\nLoginGraceTime 60\nMatch User backup\n    #LoginGraceTime 10\n"
    );

    let again = engine.run(&ctx).unwrap();
    assert_eq!(again.outcome, MutationOutcome::NoChangeNeeded);
}

#[test]
fn owner_fix_keeps_a_stricter_mode() {
    use std::os::unix::fs::MetadataExt;

    // chown needs root
    if !nix::unistd::geteuid().is_root() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grub.cfg");
    fs::write(&path, "set timeout=5\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o400)).unwrap();
    std::os::unix::fs::chown(&path, Some(1000), Some(1000)).unwrap();
    let services = FakeServices::default();
    let audit = MemoryAuditSink::default();
    let engine = MutationEngine::new(&services, &AutoApprove, &audit).without_root_check();

    let report = engine
        .enforce_permissions(&PermissionTarget::new(&path, 600).with_owner(0, 0))
        .unwrap();

    assert_eq!(report.outcome, MutationOutcome::AppliedAndVerified);
    let meta = fs::metadata(&path).unwrap();
    assert_eq!((meta.uid(), meta.gid()), (0, 0));
    assert_eq!(meta.permissions().mode() & 0o7777, 0o400);
}
