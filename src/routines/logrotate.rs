//! Log rotation and compression in logrotate.conf.

use super::{Routine, RoutineEnv, RoutineReport};
use crate::config::LogrotateSection;
use crate::directive::{ConfigTarget, Directive};
use crate::engine::MutationContext;
use crate::policy::Policy;
use crate::preflight;
use crate::resolver::LayeredResolver;
use crate::validate::CommandValidator;
use anyhow::Result;

/// Upper bound on kept rotations (one year of weekly logs)
pub const MAX_ROTATE: i64 = 52;

pub fn directives(cfg: &LogrotateSection) -> Vec<(Directive, Policy)> {
    vec![
        (
            Directive::setting("rotate", cfg.rotate.to_string()),
            Policy::range(i64::from(cfg.min_rotate), MAX_ROTATE),
        ),
        (Directive::flag("compress"), Policy::Present),
    ]
}

pub fn run(env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    let cfg = &env.config.logrotate;
    preflight::require(&["logrotate"], env.engine.requires_root())?;

    let resolver = LayeredResolver::file_only();
    let validator = CommandValidator::logrotate(env.runner);
    let target = ConfigTarget::existing(&cfg.config_path);

    let mut report = RoutineReport::new(Routine::Logrotate);
    for (directive, policy) in directives(cfg) {
        let ctx = MutationContext {
            target: target.clone(),
            directive,
            policy,
            service: None,
            resolver: &resolver,
            validator: &validator,
        };
        env.mutate(&ctx, &mut report)?;
    }
    Ok(report)
}
