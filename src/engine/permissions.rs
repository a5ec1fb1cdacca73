//! Mode and ownership enforcement.
//!
//! Same protocol as a content edit, applied to file metadata: the snapshot is
//! the original mode/uid/gid and rollback puts them back.

use super::{MutationEngine, MutationOutcome, MutationReport, MutationStage, StageTracker};
use crate::authorize::AuthorizationRequest;
use crate::error::{HardenError, Result};
use crate::policy::{Policy, is_compliant, mode_digits};
use crate::resolver::{CurrentValue, Resolution, ValueSource};
use crate::snapshot::FileMeta;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Required metadata for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTarget {
    pub path: PathBuf,
    /// Mode digits as written (`600`), compared as a plain integer
    pub mode_ceiling: u32,
    pub owner: Option<(u32, u32)>,
}

impl PermissionTarget {
    pub fn new(path: impl Into<PathBuf>, mode_ceiling: u32) -> Self {
        Self {
            path: path.into(),
            mode_ceiling,
            owner: None,
        }
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.owner = Some((uid, gid));
        self
    }

    /// The ceiling as permission bits (`600` → `0o600`)
    pub fn mode_bits(&self) -> Result<u32> {
        u32::from_str_radix(&self.mode_ceiling.to_string(), 8)
            .map_err(|_| HardenError::config(format!("{} is not an octal mode", self.mode_ceiling)))
    }

    fn mode_compliant(&self, mode: u32) -> bool {
        is_compliant(
            &Resolution::Value(CurrentValue::single(mode_digits(mode), ValueSource::Live)),
            &Policy::ModeCeiling(self.mode_ceiling),
        )
    }

    fn is_compliant(&self, meta: &FileMeta) -> bool {
        let owner_ok = match self.owner {
            Some((uid, gid)) => is_compliant(
                &Resolution::Value(CurrentValue::single(format!("{}:{}", meta.uid, meta.gid), ValueSource::Live)),
                &Policy::Owner { uid, gid },
            ),
            None => true,
        };
        self.mode_compliant(meta.mode) && owner_ok
    }

    /// Mode to write: the current one when it is already under the
    /// ceiling, else the ceiling itself
    pub fn mode_to_apply(&self, current: u32) -> Result<u32> {
        if self.mode_compliant(current) {
            Ok(current)
        } else {
            self.mode_bits()
        }
    }

    fn desired_display(&self) -> String {
        match self.owner {
            Some((uid, gid)) => format!("mode <= {}, owner {}:{}", self.mode_ceiling, uid, gid),
            None => format!("mode <= {}", self.mode_ceiling),
        }
    }
}

fn describe(meta: &FileMeta) -> Resolution {
    Resolution::Value(CurrentValue::new(
        vec![mode_digits(meta.mode), format!("{}:{}", meta.uid, meta.gid)],
        ValueSource::Live,
    ))
}

fn set_meta(path: &Path, mode: u32, owner: Option<(u32, u32)>) -> std::io::Result<()> {
    if let Some((uid, gid)) = owner {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))?;
    }
    // chown may clear setuid bits, so the mode goes last
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

impl MutationEngine<'_> {
    /// Bring a file's mode under the ceiling and fix its owner
    pub fn enforce_permissions(&self, target: &PermissionTarget) -> Result<MutationReport> {
        let subject = format!("{} permissions", target.path.display());
        let mut tracker = StageTracker::new();

        self.check_privileges()?;
        target.mode_bits()?;
        let original = FileMeta::of(&target.path)
            .map_err(|e| HardenError::precondition(format!("{}: {}", target.path.display(), e)))?;
        let new_mode = target.mode_to_apply(original.mode)?;

        tracker.advance(MutationStage::Evaluate)?;
        let previous = describe(&original);
        if target.is_compliant(&original) {
            tracker.advance(MutationStage::Done)?;
            info!("{}: compliant ({})", subject, previous);
            self.audit.record(&format!("{}: compliant ({})", subject, previous));
            return Ok(Self::finish(subject, MutationOutcome::NoChangeNeeded, previous, None, None, None, tracker));
        }

        tracker.advance(MutationStage::AwaitingAuthorization)?;
        let request = AuthorizationRequest::new(subject.clone(), previous.to_string(), target.desired_display());
        if !self.authorizer.authorize(&request) {
            tracker.advance(MutationStage::Done)?;
            self.audit.record(&format!(
                "{}: change to {} denied (current {})",
                subject,
                target.desired_display(),
                previous
            ));
            return Ok(Self::finish(subject, MutationOutcome::Denied, previous, None, None, None, tracker));
        }

        tracker.advance(MutationStage::Backup)?;
        self.audit.record(&format!(
            "{}: recorded original mode {} owner {}:{}",
            subject,
            mode_digits(original.mode),
            original.uid,
            original.gid
        ));

        tracker.advance(MutationStage::Edit)?;
        let new_owner = target.owner.or(Some((original.uid, original.gid)));
        if let Err(e) = set_meta(&target.path, new_mode, new_owner) {
            let err = HardenError::edit(&target.path, e.to_string());
            error!("{}: {}", subject, err);
            tracker.advance(MutationStage::Rollback)?;
            self.restore_meta(&subject, &target.path, &original)?;
            return Err(err);
        }

        // The file must still be a regular file we can stat
        tracker.advance(MutationStage::Validate)?;
        let stat = fs::metadata(&target.path).map(|m| m.is_file());
        if !matches!(stat, Ok(true)) {
            let diagnostics = format!("{} is no longer a regular file", target.path.display());
            tracker.advance(MutationStage::Rollback)?;
            self.restore_meta(&subject, &target.path, &original)?;
            tracker.advance(MutationStage::Done)?;
            return Ok(Self::finish(
                subject,
                MutationOutcome::ValidationFailed,
                previous,
                None,
                None,
                Some(diagnostics),
                tracker,
            ));
        }

        tracker.advance(MutationStage::Verify)?;
        let after = FileMeta::of(&target.path).ok();
        match after {
            Some(meta) if target.is_compliant(&meta) => {
                tracker.advance(MutationStage::Done)?;
                let after = describe(&meta);
                info!("{}: {} -> {}", subject, previous, after);
                self.audit.record(&format!("{}: changed from {} to {}", subject, previous, after));
                Ok(Self::finish(
                    subject,
                    MutationOutcome::AppliedAndVerified,
                    previous,
                    Some(after),
                    None,
                    None,
                    tracker,
                ))
            }
            other => {
                let after = other.as_ref().map(describe).unwrap_or(Resolution::Unknown);
                let diagnostics = format!("metadata is {} after the change, wanted {}", after, target.desired_display());
                warn!("{}: {}", subject, diagnostics);
                tracker.advance(MutationStage::Rollback)?;
                self.restore_meta(&subject, &target.path, &original)?;
                tracker.advance(MutationStage::Done)?;
                Ok(Self::finish(
                    subject,
                    MutationOutcome::AppliedButVerificationFailed,
                    previous,
                    Some(after),
                    None,
                    Some(diagnostics),
                    tracker,
                ))
            }
        }
    }

    fn restore_meta(&self, subject: &str, path: &Path, original: &FileMeta) -> Result<()> {
        match set_meta(path, original.mode, Some((original.uid, original.gid))) {
            Ok(()) => {
                self.audit.record(&format!("{}: restored original metadata", subject));
                Ok(())
            }
            Err(e) => {
                let err = HardenError::rollback_failed(path, e.to_string());
                error!("{}: ROLLBACK FAILED: {}", subject, err);
                self.audit
                    .record(&format!("{}: ROLLBACK FAILED, manual intervention required: {}", subject, err));
                Err(err)
            }
        }
    }
}
