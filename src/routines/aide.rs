//! AIDE file integrity baseline and checks.

use super::{Routine, RoutineEnv, RoutineReport};
use crate::preflight;
use anyhow::{Context, Result};
use std::fs;
use tracing::info;

/// Meaning of `aide --check` exit codes 1-7 (a bitmask); 0 is clean
pub fn describe_check_exit(code: i32) -> Result<Vec<&'static str>> {
    match code {
        0 => Ok(Vec::new()),
        1..=7 => Ok([(1, "new files"), (2, "removed files"), (4, "changed files")]
            .into_iter()
            .filter(|(bit, _)| code & bit != 0)
            .map(|(_, what)| what)
            .collect()),
        14 => anyhow::bail!("aide: error writing the report"),
        15 => anyhow::bail!("aide: invalid argument"),
        16 => anyhow::bail!("aide: unimplemented function"),
        17 => anyhow::bail!("aide: invalid configuration"),
        18 => anyhow::bail!("aide: I/O error"),
        19 => anyhow::bail!("aide: version mismatch"),
        other => anyhow::bail!("aide exited with unexpected code {}", other),
    }
}

/// Create the baseline database if there is none, then promote it
pub fn init(env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    let cfg = &env.config.aide;
    preflight::require(&[cfg.binary.as_str()], env.engine.requires_root())?;
    let mut report = RoutineReport::new(Routine::AideInit);

    if cfg.database.exists() {
        report.note(format!("baseline {} already exists", cfg.database.display()));
        return Ok(report);
    }
    let subject = format!("AIDE database {}", cfg.database.display());
    if !env.authorize(&subject, "absent", "initialised") {
        report.problem(format!("{} not created (change denied)", subject));
        return Ok(report);
    }

    info!("Initialising AIDE database; this can take several minutes");
    let output = env.runner.run(&cfg.binary, &["--init"])?;
    output.ensure_success("aide --init")?;

    if !cfg.new_database.exists() {
        anyhow::bail!(
            "aide --init succeeded but {} was not created",
            cfg.new_database.display()
        );
    }
    fs::rename(&cfg.new_database, &cfg.database).with_context(|| {
        format!(
            "Failed to promote {} to {}",
            cfg.new_database.display(),
            cfg.database.display()
        )
    })?;
    env.engine
        .audit()
        .record(&format!("{}: baseline created", subject));
    report.note(format!("baseline written to {}", cfg.database.display()));
    Ok(report)
}

/// Compare the file system with the baseline
pub fn check(env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    let cfg = &env.config.aide;
    preflight::require(&[cfg.binary.as_str()], env.engine.requires_root())?;
    let mut report = RoutineReport::new(Routine::AideCheck);

    if !cfg.database.exists() {
        report.problem(format!(
            "no baseline at {}; run `hostharden aide init` first",
            cfg.database.display()
        ));
        return Ok(report);
    }

    let output = env.runner.run(&cfg.binary, &["--check"])?;
    let code = output.exit_code.context("aide --check was killed by a signal")?;
    let findings = describe_check_exit(code)?;
    if findings.is_empty() {
        report.note("no differences from the baseline");
    } else {
        report.problem(format!("integrity check found {}", findings.join(", ")));
    }
    env.engine.audit().record(&format!(
        "AIDE check: {}",
        if findings.is_empty() { "clean".to_string() } else { findings.join(", ") }
    ));
    Ok(report)
}
