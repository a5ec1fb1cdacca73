//! Tool configuration: paths, service names and the values each routine enforces.
//!
//! Loaded from JSON. Every section has defaults, so a file only needs the
//! settings it changes.

use crate::breach::DEFAULT_RANGE_API;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Used when `--config` is not given and the file exists
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostharden/config.json";

const SELINUX_MODES: &[&str] = &["enforcing", "permissive", "disabled"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardenConfig {
    pub audit_log: PathBuf,
    /// Bound on waiting for a restarted service to report active
    pub restart_timeout_secs: u64,
    pub ssh: SshSection,
    pub ntp: NtpSection,
    pub password_policy: PasswordPolicySection,
    pub sysctl: SysctlSection,
    pub grub: GrubSection,
    pub logrotate: LogrotateSection,
    pub selinux: SelinuxSection,
    pub fail2ban: Fail2banSection,
    pub aide: AideSection,
    pub oscap: OscapSection,
    pub breach_check: BreachCheckSection,
}

impl Default for HardenConfig {
    fn default() -> Self {
        Self {
            audit_log: PathBuf::from("/var/log/hostharden.log"),
            restart_timeout_secs: 5,
            ssh: SshSection::default(),
            ntp: NtpSection::default(),
            password_policy: PasswordPolicySection::default(),
            sysctl: SysctlSection::default(),
            grub: GrubSection::default(),
            logrotate: LogrotateSection::default(),
            selinux: SelinuxSection::default(),
            fail2ban: Fail2banSection::default(),
            aide: AideSection::default(),
            oscap: OscapSection::default(),
            breach_check: BreachCheckSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub config_path: PathBuf,
    pub binary: String,
    pub service: String,
    /// Seconds; the enforced range is 1..=this
    pub login_grace_time: u32,
    pub max_auth_tries: u32,
    pub permit_root_login: String,
    /// Empty means AllowUsers is left alone
    pub allow_users: Vec<String>,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/ssh/sshd_config"),
            binary: "sshd".to_string(),
            service: "sshd".to_string(),
            login_grace_time: 60,
            max_auth_tries: 4,
            permit_root_login: "no".to_string(),
            allow_users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NtpSection {
    pub config_path: PathBuf,
    pub service: String,
    pub servers: Vec<String>,
}

impl Default for NtpSection {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/chrony.conf"),
            service: "chronyd".to_string(),
            servers: vec!["time.cloudflare.com".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicySection {
    pub login_defs: PathBuf,
    pub max_days: u32,
    pub min_days: u32,
    pub warn_age: u32,
}

impl Default for PasswordPolicySection {
    fn default() -> Self {
        Self {
            login_defs: PathBuf::from("/etc/login.defs"),
            max_days: 90,
            min_days: 1,
            warn_age: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SysctlSection {
    pub drop_in: PathBuf,
    pub service: String,
    pub parameters: BTreeMap<String, String>,
}

impl Default for SysctlSection {
    fn default() -> Self {
        let parameters = [
            ("net.ipv4.ip_forward", "0"),
            ("net.ipv4.conf.all.send_redirects", "0"),
            ("net.ipv4.conf.default.send_redirects", "0"),
            ("net.ipv4.conf.all.accept_redirects", "0"),
            ("net.ipv4.conf.default.accept_redirects", "0"),
            ("net.ipv4.conf.all.accept_source_route", "0"),
            ("net.ipv4.conf.all.log_martians", "1"),
            ("net.ipv4.icmp_echo_ignore_broadcasts", "1"),
            ("net.ipv4.tcp_syncookies", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            drop_in: PathBuf::from("/etc/sysctl.d/99-hardening.conf"),
            service: "systemd-sysctl".to_string(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrubSection {
    /// First existing file is enforced
    pub candidates: Vec<PathBuf>,
    pub mode_ceiling: u32,
}

impl Default for GrubSection {
    fn default() -> Self {
        Self {
            candidates: vec![
                PathBuf::from("/boot/grub/grub.cfg"),
                PathBuf::from("/boot/grub2/grub.cfg"),
            ],
            mode_ceiling: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogrotateSection {
    pub config_path: PathBuf,
    /// Rotations written when remediating
    pub rotate: u32,
    /// Fewest rotations accepted as compliant
    pub min_rotate: u32,
}

impl Default for LogrotateSection {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/logrotate.conf"),
            rotate: 4,
            min_rotate: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelinuxSection {
    pub config_path: PathBuf,
    pub mode: String,
}

impl Default for SelinuxSection {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/selinux/config"),
            mode: "enforcing".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fail2banSection {
    pub jail_local: PathBuf,
    pub service: String,
    pub port: String,
    pub maxretry: u32,
    pub findtime: String,
    pub bantime: String,
}

impl Default for Fail2banSection {
    fn default() -> Self {
        Self {
            jail_local: PathBuf::from("/etc/fail2ban/jail.local"),
            service: "fail2ban".to_string(),
            port: "ssh".to_string(),
            maxretry: 5,
            findtime: "10m".to_string(),
            bantime: "1h".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AideSection {
    pub binary: String,
    pub database: PathBuf,
    /// Where `aide --init` writes the fresh database
    pub new_database: PathBuf,
}

impl Default for AideSection {
    fn default() -> Self {
        Self {
            binary: "aide".to_string(),
            database: PathBuf::from("/var/lib/aide/aide.db.gz"),
            new_database: PathBuf::from("/var/lib/aide/aide.db.new.gz"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscapSection {
    pub profile: String,
    pub datastream: PathBuf,
    pub results: PathBuf,
}

impl Default for OscapSection {
    fn default() -> Self {
        Self {
            profile: "xccdf_org.ssgproject.content_profile_cis".to_string(),
            datastream: PathBuf::from("/usr/share/xml/scap/ssg/content/ssg-rhel9-ds.xml"),
            results: PathBuf::from("/var/log/hostharden-oscap-results.xml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreachCheckSection {
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for BreachCheckSection {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_RANGE_API.to_string(),
            timeout_secs: 10,
        }
    }
}

fn require_path(name: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        anyhow::bail!("{} must not be empty", name);
    }
    Ok(())
}

fn require_name(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{} must not be empty", name);
    }
    if value.contains(char::is_whitespace) {
        anyhow::bail!("{} cannot contain whitespace: {:?}", name, value);
    }
    Ok(())
}

impl HardenConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;
        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;
        debug!("Loaded configuration from {:?}", path.as_ref());
        Ok(config)
    }

    /// `--config` if given, else the default path if present, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load_from_file(DEFAULT_CONFIG_PATH)?,
            None => {
                info!("No configuration file, using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        require_path("audit_log", &self.audit_log)?;
        if self.restart_timeout_secs == 0 || self.restart_timeout_secs > 300 {
            anyhow::bail!("restart_timeout_secs must be 1-300");
        }

        require_path("ssh.config_path", &self.ssh.config_path)?;
        require_name("ssh.binary", &self.ssh.binary)?;
        require_name("ssh.service", &self.ssh.service)?;
        if !(1..=600).contains(&self.ssh.login_grace_time) {
            anyhow::bail!("ssh.login_grace_time must be 1-600 seconds");
        }
        if !(1..=10).contains(&self.ssh.max_auth_tries) {
            anyhow::bail!("ssh.max_auth_tries must be 1-10");
        }
        if !["no", "prohibit-password", "forced-commands-only"].contains(&self.ssh.permit_root_login.as_str()) {
            anyhow::bail!(
                "ssh.permit_root_login must be no, prohibit-password or forced-commands-only, got {:?}",
                self.ssh.permit_root_login
            );
        }
        for user in &self.ssh.allow_users {
            require_name("ssh.allow_users entry", user)?;
        }

        require_path("ntp.config_path", &self.ntp.config_path)?;
        require_name("ntp.service", &self.ntp.service)?;
        if self.ntp.servers.is_empty() {
            anyhow::bail!("ntp.servers must list at least one server");
        }
        for server in &self.ntp.servers {
            require_name("ntp.servers entry", server)?;
        }

        let pp = &self.password_policy;
        require_path("password_policy.login_defs", &pp.login_defs)?;
        if !(1..=90).contains(&pp.max_days) {
            anyhow::bail!("password_policy.max_days must be 1-90");
        }
        if !(1..=365).contains(&pp.min_days) || pp.min_days > pp.max_days {
            anyhow::bail!("password_policy.min_days must be 1-365 and not exceed max_days");
        }
        if !(7..=365).contains(&pp.warn_age) {
            anyhow::bail!("password_policy.warn_age must be 7-365");
        }

        require_path("sysctl.drop_in", &self.sysctl.drop_in)?;
        require_name("sysctl.service", &self.sysctl.service)?;
        for (key, value) in &self.sysctl.parameters {
            require_name("sysctl parameter name", key)?;
            if value.trim().is_empty() {
                anyhow::bail!("sysctl parameter {} has an empty value", key);
            }
        }

        if self.grub.candidates.is_empty() {
            anyhow::bail!("grub.candidates must list at least one path");
        }
        if self.grub.mode_ceiling > 777 || !self.grub.mode_ceiling.to_string().chars().all(|c| c <= '7') {
            anyhow::bail!("grub.mode_ceiling must be octal digits like 600");
        }

        require_path("logrotate.config_path", &self.logrotate.config_path)?;
        if !(1..=52).contains(&self.logrotate.min_rotate)
            || !(self.logrotate.min_rotate..=52).contains(&self.logrotate.rotate)
        {
            anyhow::bail!("logrotate.rotate must be between min_rotate and 52, min_rotate 1-52");
        }

        require_path("selinux.config_path", &self.selinux.config_path)?;
        if !SELINUX_MODES.contains(&self.selinux.mode.as_str()) {
            anyhow::bail!(
                "selinux.mode must be one of {}, got {:?}",
                SELINUX_MODES.join(", "),
                self.selinux.mode
            );
        }

        require_path("fail2ban.jail_local", &self.fail2ban.jail_local)?;
        require_name("fail2ban.service", &self.fail2ban.service)?;
        require_name("fail2ban.port", &self.fail2ban.port)?;
        if self.fail2ban.maxretry == 0 {
            anyhow::bail!("fail2ban.maxretry must be at least 1");
        }

        require_name("aide.binary", &self.aide.binary)?;
        require_path("aide.database", &self.aide.database)?;
        require_path("aide.new_database", &self.aide.new_database)?;

        require_name("oscap.profile", &self.oscap.profile)?;
        require_path("oscap.datastream", &self.oscap.datastream)?;
        require_path("oscap.results", &self.oscap.results)?;

        let url = self.breach_check.api_url.trim();
        if !url.starts_with("https://") && !url.starts_with("http://") {
            anyhow::bail!("breach_check.api_url must start with https:// or http://");
        }
        if self.breach_check.timeout_secs == 0 {
            anyhow::bail!("breach_check.timeout_secs must be at least 1");
        }

        Ok(())
    }
}
