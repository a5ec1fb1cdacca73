//! Pre-flight checks run before a routine touches anything
//!
//! - The external binaries the routine drives are present
//! - Running with root privileges (EUID 0), unless skipped for development
//!
//! Missing tools are reported, never installed.

use crate::command_runner::binary_exists;
use crate::error::{HardenError, Result};
use tracing::{debug, warn};

/// Result of environment verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
    pub root_required: bool,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && (self.is_root || !self.root_required)
    }

    /// Human-readable list of problems, one per line
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.root_required && !self.is_root {
            problems.push("root privileges required (run with sudo or as root)".to_string());
        }
        for binary in &self.missing_binaries {
            problems.push(format!("missing {} (package: {})", binary, package_for_binary(binary)));
        }
        problems
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            return Ok(());
        }
        Err(HardenError::precondition(self.problems().join("; ")))
    }
}

/// Check `binaries` and, if `root_required`, the effective UID
pub fn verify(binaries: &[&str], root_required: bool) -> PreflightReport {
    debug!("Pre-flight: binaries={:?} root_required={}", binaries, root_required);
    let missing_binaries = binaries
        .iter()
        .filter(|b| !binary_exists(b))
        .map(|b| b.to_string())
        .collect();

    let mut is_root = nix::unistd::geteuid().is_root();
    if !is_root && should_skip_root_check() {
        warn!("Root check skipped (HOSTHARDEN_SKIP_ROOT_CHECK=1)");
        is_root = true;
    }

    PreflightReport {
        missing_binaries,
        is_root,
        root_required,
    }
}

/// `verify` as an error
pub fn require(binaries: &[&str], root_required: bool) -> Result<()> {
    verify(binaries, root_required).into_result()
}

/// Skip the root check (development only).
/// Set HOSTHARDEN_SKIP_ROOT_CHECK=1 to skip
pub fn should_skip_root_check() -> bool {
    std::env::var("HOSTHARDEN_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Distribution package that usually ships a binary
pub fn package_for_binary(binary: &str) -> &'static str {
    match binary {
        "sshd" => "openssh-server",
        "chronyd" | "chronyc" => "chrony",
        "systemctl" => "systemd",
        "sysctl" => "procps",
        "logrotate" => "logrotate",
        "getenforce" => "libselinux-utils",
        "fail2ban-client" => "fail2ban",
        "aide" => "aide",
        "oscap" => "openscap-scanner",
        _ => "unknown",
    }
}
