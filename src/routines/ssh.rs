//! SSH daemon options.

use super::{Routine, RoutineEnv, RoutineReport};
use crate::config::SshSection;
use crate::directive::{ConfigTarget, Directive};
use crate::engine::MutationContext;
use crate::policy::Policy;
use crate::preflight;
use crate::resolver::{LayeredResolver, SshdQuery};
use crate::validate::CommandValidator;
use anyhow::Result;

/// sshd's global section ends at the first active `Match` line
pub const MATCH_BLOCK: &str = r"(?i)^\s*match\s";

/// Directives and policies for sshd_config. sshd keywords are matched
/// ignoring case; defaults are sshd's compiled-in values.
pub fn directives(cfg: &SshSection) -> Vec<(Directive, Policy)> {
    let mut list = vec![
        (
            Directive::setting("LoginGraceTime", cfg.login_grace_time.to_string())
                .ignoring_case()
                .with_default("120"),
            Policy::range_excluding(1, i64::from(cfg.login_grace_time), &["0"]),
        ),
        (
            Directive::setting("PermitRootLogin", cfg.permit_root_login.clone())
                .ignoring_case()
                .with_default("prohibit-password"),
            Policy::Exact(cfg.permit_root_login.clone()),
        ),
        (
            Directive::setting("MaxAuthTries", cfg.max_auth_tries.to_string())
                .ignoring_case()
                .with_default("6"),
            Policy::range(1, i64::from(cfg.max_auth_tries)),
        ),
    ];
    if !cfg.allow_users.is_empty() {
        list.push((
            Directive::setting("AllowUsers", cfg.allow_users.join(" ")).ignoring_case(),
            Policy::SameSet(cfg.allow_users.clone()),
        ));
    }
    list.into_iter()
        .map(|(directive, policy)| (directive.with_insert_before(MATCH_BLOCK), policy))
        .collect()
}

pub fn run(env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    let cfg = &env.config.ssh;
    preflight::require(&[cfg.binary.as_str(), "systemctl"], env.engine.requires_root())?;

    let live = SshdQuery::new(env.runner, cfg.binary.clone());
    let resolver = LayeredResolver::with_live(&live);
    let validator = CommandValidator::sshd(env.runner, &cfg.binary);
    let target = ConfigTarget::existing(&cfg.config_path);

    let mut report = RoutineReport::new(Routine::Ssh);
    for (directive, policy) in directives(cfg) {
        let ctx = MutationContext {
            target: target.clone(),
            directive,
            policy,
            service: Some(cfg.service.clone()),
            resolver: &resolver,
            validator: &validator,
        };
        env.mutate(&ctx, &mut report)?;
    }
    if cfg.allow_users.is_empty() {
        report.note("AllowUsers not configured, left unchanged");
    }
    Ok(report)
}
