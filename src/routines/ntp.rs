//! NTP time synchronisation through chrony.

use super::{Routine, RoutineEnv, RoutineReport};
use crate::config::NtpSection;
use crate::directive::{ConfigTarget, Directive};
use crate::engine::MutationContext;
use crate::policy::Policy;
use crate::preflight;
use crate::resolver::LayeredResolver;
use crate::validate::CommandValidator;
use anyhow::Result;

/// Fields of `chronyc tracking` worth reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingStatus {
    pub reference: Option<String>,
    pub leap_status: Option<String>,
}

impl TrackingStatus {
    pub fn is_synchronised(&self) -> bool {
        self.leap_status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("normal"))
    }
}

/// Parse `Key : value` lines of `chronyc tracking`
pub fn parse_tracking(stdout: &str) -> TrackingStatus {
    let mut status = TrackingStatus::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Reference ID" => status.reference = Some(value.trim().to_string()),
            "Leap status" => status.leap_status = Some(value.trim().to_string()),
            _ => {}
        }
    }
    status
}

pub fn directives(cfg: &NtpSection) -> Vec<(Directive, Policy)> {
    cfg.servers
        .iter()
        .map(|host| {
            let value = format!("{} iburst", host);
            (Directive::line("server", value.clone()), Policy::Includes(value))
        })
        .collect()
}

pub fn run(env: &RoutineEnv<'_>) -> Result<RoutineReport> {
    let cfg = &env.config.ntp;
    preflight::require(&["chronyd", "chronyc", "systemctl"], env.engine.requires_root())?;

    let resolver = LayeredResolver::file_only();
    let validator = CommandValidator::chronyd(env.runner);
    let target = ConfigTarget::existing(&cfg.config_path);

    let mut report = RoutineReport::new(Routine::Ntp);
    env.ensure_enabled(&cfg.service, &mut report)?;

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

    let tracking = env.runner.run("chronyc", &["tracking"])?;
    if tracking.success {
        let status = parse_tracking(&tracking.stdout);
        report.note(format!(
            "chrony reference {}, leap status {}",
            status.reference.as_deref().unwrap_or("unknown"),
            status.leap_status.as_deref().unwrap_or("unknown")
        ));
        if !status.is_synchronised() {
            report.note("clock is not synchronised yet; chrony may need a few minutes");
        }
    } else {
        report.note(format!("chronyc tracking failed: {}", tracking.diagnostics()));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACKING: &str = "Reference ID    : A29FC87B (time.cloudflare.com)\n\
Stratum         : 4\n\
Ref time (UTC)  : Sat Oct 17 10:00:00 2026\n\
Leap status     : Normal\n";

    #[test]
    fn test_parse_tracking() {
        let status = parse_tracking(TRACKING);
        assert_eq!(status.reference.as_deref(), Some("A29FC87B (time.cloudflare.com)"));
        assert!(status.is_synchronised());
    }

    #[test]
    fn test_unsynchronised() {
        let status = parse_tracking("Leap status     : Not synchronised\n");
        assert!(!status.is_synchronised());
        assert!(parse_tracking("").reference.is_none());
    }

    #[test]
    fn test_server_directives() {
        let cfg = NtpSection {
            servers: vec!["a.example".into(), "b.example".into()],
            ..NtpSection::default()
        };
        let list = directives(&cfg);
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].0.render(), vec!["server b.example iburst"]);
        assert_eq!(list[1].1, Policy::Includes("b.example iburst".into()));
    }
}
