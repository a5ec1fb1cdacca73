//! Kernel network parameters via a sysctl.d drop-in.

use super::{Routine, RoutineEnv, RoutineReport};
use crate::config::SysctlSection;
use crate::directive::{ConfigTarget, Directive, Separator};
use crate::engine::MutationContext;
use crate::policy::Policy;
use crate::preflight;
use crate::resolver::{LayeredResolver, SysctlQuery};
use crate::validate::SysctlSyntaxValidator;
use anyhow::Result;

pub fn directives(cfg: &SysctlSection) -> Vec<(Directive, Policy)> {
    cfg.parameters
        .iter()
        .map(|(key, value)| {
            (
                Directive::setting(key.clone(), value.clone()).with_separator(Separator::SpacedEquals),
                Policy::Exact(value.clone()),
            )
        })
        .collect()
}

/// The drop-in is owned by the tool: root-owned, world-readable
pub fn target(cfg: &SysctlSection) -> ConfigTarget {
    ConfigTarget::drop_in(&cfg.drop_in, 0o644).with_owner(0, 0)
}

pub fn run(env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    let cfg = &env.config.sysctl;
    preflight::require(&["sysctl", "systemctl"], env.engine.requires_root())?;

    let live = SysctlQuery::new(env.runner);
    let resolver = LayeredResolver::with_live(&live);
    let target = target(cfg);

    let mut report = RoutineReport::new(Routine::Sysctl);
    for (directive, policy) in directives(cfg) {
        let ctx = MutationContext {
            target: target.clone(),
            directive,
            policy,
            // Restarting systemd-sysctl re-applies every sysctl.d file
            service: Some(cfg.service.clone()),
            resolver: &resolver,
            validator: &SysctlSyntaxValidator,
        };
        env.mutate(&ctx, &mut report)?;
    }
    Ok(report)
}
