//! Password ageing in `/etc/login.defs`.

use super::{Routine, RoutineEnv, RoutineReport};
use crate::config::PasswordPolicySection;
use crate::directive::{ConfigTarget, Directive};
use crate::engine::MutationContext;
use crate::policy::Policy;
use crate::preflight;
use crate::resolver::LayeredResolver;
use crate::validate::SkipValidation;
use anyhow::Result;

/// Defaults are shadow-utils' values when a key is absent
pub fn directives(cfg: &PasswordPolicySection) -> Vec<(Directive, Policy)> {
    vec![
        (
            Directive::setting("PASS_MAX_DAYS", cfg.max_days.to_string()).with_default("99999"),
            Policy::range(1, 90),
        ),
        (
            Directive::setting("PASS_MIN_DAYS", cfg.min_days.to_string()).with_default("0"),
            Policy::range(1, 365),
        ),
        (
            Directive::setting("PASS_WARN_AGE", cfg.warn_age.to_string()).with_default("7"),
            Policy::range(7, 365),
        ),
    ]
}

pub fn run(env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    let cfg = &env.config.password_policy;
    preflight::require(&[], env.engine.requires_root())?;

    let resolver = LayeredResolver::file_only();
    let target = ConfigTarget::existing(&cfg.login_defs);

    let mut report = RoutineReport::new(Routine::PasswordPolicy);
    for (directive, policy) in directives(cfg) {
        let ctx = MutationContext {
            target: target.clone(),
            directive,
            policy,
            service: None,
            resolver: &resolver,
            validator: &SkipValidation,
        };
        env.mutate(&ctx, &mut report)?;
    }
    report.note("new ageing limits apply to accounts created from now on; use chage for existing users");
    Ok(report)
}
