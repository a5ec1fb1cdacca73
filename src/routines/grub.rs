//! GRUB config permissions.

use super::{Routine, RoutineEnv, RoutineReport};
use crate::engine::permissions::PermissionTarget;
use crate::preflight;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// First candidate that exists
pub fn locate(candidates: &[PathBuf]) -> Option<&Path> {
    candidates.iter().map(PathBuf::as_path).find(|p| p.is_file())
}

pub fn run(env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    let cfg = &env.config.grub;
    preflight::require(&[], env.engine.requires_root())?;

    let mut report = RoutineReport::new(Routine::Grub);
    let Some(path) = locate(&cfg.candidates) else {
        let searched: Vec<String> = cfg.candidates.iter().map(|p| p.display().to_string()).collect();
        report.problem(format!("no GRUB config found (searched {})", searched.join(", ")));
        return Ok(report);
    };

    let target = PermissionTarget::new(path, cfg.mode_ceiling).with_owner(0, 0);
    let mutation = env
        .engine
        .enforce_permissions(&target)
        .with_context(|| format!("{} permissions", path.display()))?;
    report.push(mutation);
    Ok(report)
}
