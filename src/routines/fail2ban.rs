//! Fail2Ban SSH jail.

use super::{Routine, RoutineEnv, RoutineReport};
use crate::config::Fail2banSection;
use crate::directive::{ConfigTarget, Directive};
use crate::engine::MutationContext;
use crate::policy::Policy;
use crate::preflight;
use crate::resolver::LayeredResolver;
use crate::validate::CommandValidator;
use anyhow::Result;

pub const JAIL_HEADER: &str = "[sshd]";

/// The `[sshd]` block and the policy that it must match line for line
pub fn jail(cfg: &Fail2banSection) -> (Directive, Policy) {
    let body = vec![
        "enabled = true".to_string(),
        format!("port = {}", cfg.port),
        format!("maxretry = {}", cfg.maxretry),
        format!("findtime = {}", cfg.findtime),
        format!("bantime = {}", cfg.bantime),
    ];
    (Directive::block(JAIL_HEADER, body.clone()), Policy::Lines(body))
}

pub fn run(env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    let cfg = &env.config.fail2ban;
    preflight::require(&["fail2ban-client", "systemctl"], env.engine.requires_root())?;

    let resolver = LayeredResolver::file_only();
    let validator = CommandValidator::fail2ban(env.runner);
    let (directive, policy) = jail(cfg);

    let mut report = RoutineReport::new(Routine::Fail2ban);
    env.ensure_enabled(&cfg.service, &mut report)?;
    let ctx = MutationContext {
        target: ConfigTarget::drop_in(&cfg.jail_local, 0o644),
        directive,
        policy,
        service: Some(cfg.service.clone()),
        resolver: &resolver,
        validator: &validator,
    };
    env.mutate(&ctx, &mut report)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor;
    use crate::policy::is_compliant;
    use crate::resolver::{CurrentValue, Resolution, ValueSource};

    #[test]
    fn test_jail_block_written_and_compliant() {
        let (directive, policy) = jail(&Fail2banSection::default());
        let result = editor::apply("[DEFAULT]\nbantime = 10m\n", &directive).unwrap();
        assert!(result.content.contains("\n\n[sshd]\nenabled = true\nport = ssh\n"));

        let values = editor::active_values(&result.content, &directive).unwrap();
        let resolution = Resolution::Value(CurrentValue::new(values, ValueSource::File));
        assert!(is_compliant(&resolution, &policy));
    }

    #[test]
    fn test_disabled_jail_is_not_compliant() {
        let (directive, policy) = jail(&Fail2banSection::default());
        let values = editor::active_values("[sshd]\nenabled = false\n", &directive).unwrap();
        let resolution = Resolution::Value(CurrentValue::new(values, ValueSource::File));
        assert!(!is_compliant(&resolution, &policy));
    }
}
