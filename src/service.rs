//! Service control through systemd.

use crate::command_runner::CommandRunner;
use crate::error::{HardenError, Result};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default bound on waiting for a restarted unit to report active
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Start/stop/query a named system service
pub trait ServiceController {
    fn is_enabled(&self, name: &str) -> Result<bool>;
    fn enable(&self, name: &str) -> Result<()>;
    fn is_active(&self, name: &str) -> Result<bool>;
    fn start(&self, name: &str) -> Result<()>;
    fn stop(&self, name: &str) -> Result<()>;
    /// Restart (or start, if inactive) and confirm the unit came up
    fn restart(&self, name: &str) -> Result<()>;
}

/// `systemctl` backed controller
pub struct SystemdController<'a> {
    runner: &'a dyn CommandRunner,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl<'a> SystemdController<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn systemctl(&self, verb: &str, name: &str) -> Result<()> {
        let output = self.runner.run("systemctl", &[verb, name])?;
        output
            .ensure_success(&format!("systemctl {} {}", verb, name))
            .map_err(|e| HardenError::apply(e.to_string()))
    }

    /// Poll `is-active` until it succeeds or the timeout elapses
    fn wait_active(&self, name: &str) -> Result<()> {
        let deadline = Instant::now() + self.confirm_timeout;
        loop {
            if self.is_active(name)? {
                debug!("{} is active", name);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(HardenError::apply(format!(
                    "{} did not become active within {}s",
                    name,
                    self.confirm_timeout.as_secs_f32()
                )));
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

impl ServiceController for SystemdController<'_> {
    fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.runner.run("systemctl", &["is-enabled", name])?.success)
    }

    fn enable(&self, name: &str) -> Result<()> {
        info!("Enabling {}", name);
        self.systemctl("enable", name)
    }

    fn is_active(&self, name: &str) -> Result<bool> {
        Ok(self.runner.run("systemctl", &["is-active", name])?.success)
    }

    fn start(&self, name: &str) -> Result<()> {
        info!("Starting {}", name);
        self.systemctl("start", name)?;
        self.wait_active(name)
    }

    fn stop(&self, name: &str) -> Result<()> {
        info!("Stopping {}", name);
        self.systemctl("stop", name)
    }

    fn restart(&self, name: &str) -> Result<()> {
        info!("Restarting {}", name);
        self.systemctl("restart", name)?;
        self.wait_active(name)
    }
}
