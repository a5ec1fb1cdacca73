//! SELinux mode in `/etc/selinux/config`.

use super::{Routine, RoutineEnv, RoutineReport};
use crate::directive::{ConfigTarget, Directive, Separator};
use crate::engine::{MutationContext, MutationOutcome};
use crate::policy::Policy;
use crate::preflight;
use crate::resolver::LayeredResolver;
use crate::validate::KeyValueValidator;
use anyhow::Result;

pub fn directive(mode: &str) -> (Directive, Policy) {
    (
        Directive::setting("SELINUX", mode).with_separator(Separator::Equals),
        Policy::Exact(mode.to_string()),
    )
}

pub fn run(env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    let cfg = &env.config.selinux;
    preflight::require(&[], env.engine.requires_root())?;

    let resolver = LayeredResolver::file_only();
    let validator = KeyValueValidator::selinux();
    let (directive, policy) = directive(&cfg.mode);

    let mut report = RoutineReport::new(Routine::Selinux);
    let ctx = MutationContext {
        target: ConfigTarget::existing(&cfg.config_path),
        directive,
        policy,
        service: None,
        resolver: &resolver,
        validator: &validator,
    };
    let outcome = env.mutate(&ctx, &mut report)?;

    match env.runner.run("getenforce", &[]) {
        Ok(output) if output.success => {
            let runtime = output.stdout.trim().to_string();
            report.note(format!("runtime mode is {}", runtime));
            if !runtime.eq_ignore_ascii_case(&cfg.mode) {
                report.note(format!("reboot required for SELinux to run in {} mode", cfg.mode));
            }
        }
        Ok(output) => report.note(format!("getenforce failed: {}", output.diagnostics())),
        Err(e) => report.note(format!("runtime mode unknown: {}", e)),
    }
    if outcome == MutationOutcome::AppliedAndVerified {
        report.note("config changed; the new mode takes effect after a reboot");
    }
    Ok(report)
}
