//! Whole-file backups taken before a mutation.
//!
//! A snapshot is written next to the target as
//! `<original-path>.bak.<YYYYmmddHHMMSS>` and read back before the caller
//! may touch the original. Artifacts are never overwritten: a collision in
//! the same second gets a `-N` suffix.

use crate::error::{HardenError, Result};
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Timestamp format used in backup artifact names
pub const BACKUP_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const MAX_NAME_COLLISIONS: u32 = 100;

/// File metadata restored together with the content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl FileMeta {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            mode: metadata.permissions().mode() & 0o7777,
            uid: metadata.uid(),
            gid: metadata.gid(),
        })
    }
}

/// Immutable backup of a config target
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    target: PathBuf,
    /// None when the target did not exist before the run
    contents: Option<Vec<u8>>,
    meta: Option<FileMeta>,
    artifact: Option<PathBuf>,
    taken_at: DateTime<Local>,
}

impl ConfigSnapshot {
    /// Back up `target`, verifying the artifact reads back byte-for-byte.
    ///
    /// A missing target is recorded as absent (no artifact is written).
    pub fn capture(target: &Path) -> Result<Self> {
        let taken_at = Local::now();
        let contents = match fs::read(target) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} absent, recording empty snapshot", target.display());
                return Ok(Self {
                    target: target.to_path_buf(),
                    contents: None,
                    meta: None,
                    artifact: None,
                    taken_at,
                });
            }
            Err(e) => return Err(HardenError::backup(target, format!("cannot read: {}", e))),
        };
        let meta = FileMeta::of(target).map_err(|e| HardenError::backup(target, e.to_string()))?;

        let artifact = write_artifact(target, &contents, &taken_at)?;
        let readback = fs::read(&artifact)
            .map_err(|e| HardenError::backup(target, format!("cannot read back {}: {}", artifact.display(), e)))?;
        if readback != contents {
            return Err(HardenError::backup(
                target,
                format!("{} does not match the original", artifact.display()),
            ));
        }

        info!("Backed up {} to {}", target.display(), artifact.display());
        Ok(Self {
            target: target.to_path_buf(),
            contents: Some(contents),
            meta: Some(meta),
            artifact: Some(artifact),
            taken_at,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Path of the backup artifact, if the target existed
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    pub fn contents(&self) -> Option<&[u8]> {
        self.contents.as_deref()
    }

    pub fn meta(&self) -> Option<FileMeta> {
        self.meta
    }

    pub fn taken_at(&self) -> DateTime<Local> {
        self.taken_at
    }

    pub fn existed(&self) -> bool {
        self.contents.is_some()
    }

    /// Put the target back exactly as it was (or remove it if it was absent)
    pub fn restore(&self) -> Result<()> {
        match (&self.contents, self.meta) {
            (Some(bytes), Some(meta)) => {
                write_replacing(&self.target, bytes, meta.mode)
                    .map_err(|e| HardenError::rollback_failed(&self.target, e.to_string()))?;
                std::os::unix::fs::chown(&self.target, Some(meta.uid), Some(meta.gid))
                    .map_err(|e| HardenError::rollback_failed(&self.target, e.to_string()))?;
            }
            _ => match fs::remove_file(&self.target) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(HardenError::rollback_failed(&self.target, e.to_string())),
            },
        }
        info!("Restored {} from snapshot", self.target.display());
        Ok(())
    }
}

/// Artifact path for a given stamp and collision index
pub fn artifact_path(target: &Path, stamp: &str, collision: u32) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(format!(".bak.{}", stamp));
    if collision > 0 {
        name.push(format!("-{}", collision));
    }
    PathBuf::from(name)
}

fn write_artifact(target: &Path, contents: &[u8], taken_at: &DateTime<Local>) -> Result<PathBuf> {
    let stamp = taken_at.format(BACKUP_STAMP_FORMAT).to_string();
    for collision in 0..MAX_NAME_COLLISIONS {
        let path = artifact_path(target, &stamp, collision);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(HardenError::backup(target, format!("cannot create {}: {}", path.display(), e))),
        };
        // Artifacts are owner-only regardless of the original's mode
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .and_then(|_| file.write_all(contents))
            .and_then(|_| file.sync_all())
            .map_err(|e| HardenError::backup(target, format!("cannot write {}: {}", path.display(), e)))?;
        return Ok(path);
    }
    Err(HardenError::backup(target, "too many backups with the same timestamp"))
}

/// Replace `path` with `bytes` via a sibling temp file and rename
pub fn write_replacing(path: &Path, bytes: &[u8], mode: u32) -> std::io::Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(format!(".hostharden-tmp.{}", std::process::id()));
    let tmp = PathBuf::from(tmp_name);

    let result = (|| {
        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(&tmp)?;
        file.set_permissions(fs::Permissions::from_mode(mode))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Backup artifacts left next to `target` by earlier runs, oldest first
pub fn find_stray_backups(target: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(name)) = (target.parent(), target.file_name()) else {
        return Vec::new();
    };
    let prefix = format!("{}.bak.", name.to_string_lossy());
    let Ok(entries) = fs::read_dir(if dir.as_os_str().is_empty() { Path::new(".") } else { dir }) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.path())
        .collect();
    found.sort();
    found
}
