//! OpenSCAP XCCDF evaluation.

use super::{Routine, RoutineEnv, RoutineReport};
use crate::preflight;
use anyhow::Result;
use std::path::Path;

/// Rule results counted from `oscap xccdf eval` output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub pass: usize,
    pub fail: usize,
    /// notapplicable, notchecked, error, unknown, informational, ...
    pub other: usize,
}

impl ScanSummary {
    pub fn total(&self) -> usize {
        self.pass + self.fail + self.other
    }
}

/// Count `Result <status>` lines
pub fn parse_results(stdout: &str) -> ScanSummary {
    let mut summary = ScanSummary::default();
    for line in stdout.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("Result") {
            continue;
        }
        match fields.next() {
            Some("pass") | Some("fixed") => summary.pass += 1,
            Some("fail") => summary.fail += 1,
            Some(_) => summary.other += 1,
            None => {}
        }
    }
    summary
}

pub fn run(env: &RoutineEnv<'_>, profile: Option<&str>, datastream: Option<&Path>) -> Result<RoutineReport> {
    let cfg = &env.config.oscap;
    preflight::require(&["oscap"], env.engine.requires_root())?;
    let profile = profile.unwrap_or(&cfg.profile);
    let datastream = datastream.unwrap_or(&cfg.datastream);
    if !datastream.is_file() {
        anyhow::bail!("SCAP datastream {} not found", datastream.display());
    }

    let results = cfg.results.to_string_lossy();
    let datastream_arg = datastream.to_string_lossy();
    let output = env.runner.run(
        "oscap",
        &["xccdf", "eval", "--profile", profile, "--results", &results, &datastream_arg],
    )?;
    // 2 means the scan ran and some rules failed
    match output.exit_code {
        Some(0) | Some(2) => {}
        code => anyhow::bail!(
            "oscap xccdf eval failed (exit code {}): {}",
            code.unwrap_or(-1),
            output.diagnostics()
        ),
    }

    let summary = parse_results(&output.stdout);
    let mut report = RoutineReport::new(Routine::Oscap);
    report.note(format!(
        "profile {}: {} pass, {} fail, {} other ({} rules)",
        profile,
        summary.pass,
        summary.fail,
        summary.other,
        summary.total()
    ));
    report.note(format!("full results in {}", cfg.results.display()));
    if summary.fail > 0 {
        report.problem(format!("{} rule(s) failed", summary.fail));
    }
    env.engine.audit().record(&format!(
        "OpenSCAP {}: {} pass, {} fail, {} other",
        profile, summary.pass, summary.fail, summary.other
    ));
    Ok(report)
}
