//! Syntax validation of an edited config file before the service sees it.

use crate::command_runner::CommandRunner;
use crate::error::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// Result of checking a config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub passed: bool,
    pub diagnostics: String,
}

impl ValidationReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            diagnostics: String::new(),
        }
    }

    pub fn fail(diagnostics: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Per-service syntax check of a config file
pub trait ConfigValidator {
    fn validate(&self, path: &Path) -> Result<ValidationReport>;

    /// Short name for logs and audit entries
    fn name(&self) -> String;
}

/// Runs the daemon's own checker; `{path}` in the arguments is replaced
/// by the file under test
pub struct CommandValidator<'a> {
    runner: &'a dyn CommandRunner,
    program: String,
    args: Vec<String>,
}

impl<'a> CommandValidator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            runner,
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// `sshd -t -f <path>`
    pub fn sshd(runner: &'a dyn CommandRunner, binary: &str) -> Self {
        Self::new(runner, binary, &["-t", "-f", "{path}"])
    }

    /// `chronyd -p -f <path>` (parse and print, no daemon)
    pub fn chronyd(runner: &'a dyn CommandRunner) -> Self {
        Self::new(runner, "chronyd", &["-p", "-f", "{path}"])
    }

    /// `logrotate -d <path>` (dry run)
    pub fn logrotate(runner: &'a dyn CommandRunner) -> Self {
        Self::new(runner, "logrotate", &["-d", "{path}"])
    }

    /// `fail2ban-client -t` (checks the whole jail configuration)
    pub fn fail2ban(runner: &'a dyn CommandRunner) -> Self {
        Self::new(runner, "fail2ban-client", &["-t"])
    }
}

impl ConfigValidator for CommandValidator<'_> {
    fn validate(&self, path: &Path) -> Result<ValidationReport> {
        let path = path.to_string_lossy();
        let args: Vec<String> = self.args.iter().map(|a| a.replace("{path}", &path)).collect();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.runner.run(&self.program, &args)?;
        Ok(if output.success {
            ValidationReport::pass()
        } else {
            ValidationReport::fail(output.diagnostics())
        })
    }

    fn name(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// For files that have no checker (`login.defs`)
pub struct SkipValidation;

impl ConfigValidator for SkipValidation {
    fn validate(&self, _path: &Path) -> Result<ValidationReport> {
        Ok(ValidationReport::pass())
    }

    fn name(&self) -> String {
        "none".to_string()
    }
}

fn active_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
}

fn sysctl_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^-?[A-Za-z0-9_*][A-Za-z0-9_.*/-]*\s*=\s*\S.*$").expect("static regex")
    })
}

/// `sysctl.d` syntax: every active line is `key = value`
pub struct SysctlSyntaxValidator;

impl ConfigValidator for SysctlSyntaxValidator {
    fn validate(&self, path: &Path) -> Result<ValidationReport> {
        let content = std::fs::read_to_string(path)?;
        let errors: Vec<String> = active_lines(&content)
            .filter(|(_, line)| !sysctl_line().is_match(line))
            .map(|(n, line)| format!("line {}: expected `key = value`, got {:?}", n, line))
            .collect();
        Ok(if errors.is_empty() {
            ValidationReport::pass()
        } else {
            ValidationReport::fail(errors.join("\n"))
        })
    }

    fn name(&self) -> String {
        "sysctl.d syntax".to_string()
    }
}

/// `KEY=value` files with a fixed vocabulary (SELinux config).
///
/// Keys not in `allowed` are rejected; an empty value list accepts any value.
pub struct KeyValueValidator {
    allowed: BTreeMap<String, Vec<String>>,
}

impl KeyValueValidator {
    pub fn new(allowed: &[(&str, &[&str])]) -> Self {
        Self {
            allowed: allowed
                .iter()
                .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
                .collect(),
        }
    }

    pub fn selinux() -> Self {
        Self::new(&[
            ("SELINUX", &["enforcing", "permissive", "disabled"]),
            ("SELINUXTYPE", &["targeted", "minimum", "mls"]),
            ("SETLOCALDEFS", &["0", "1"]),
        ])
    }

    fn check_line(&self, line: &str) -> std::result::Result<(), String> {
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=value, got {:?}", line))?;
        let (key, value) = (key.trim(), value.trim());
        let values = self
            .allowed
            .get(key)
            .ok_or_else(|| format!("unknown key {:?}", key))?;
        if !values.is_empty() && !values.iter().any(|v| v == value) {
            return Err(format!("{}: {:?} is not one of {}", key, value, values.join(", ")));
        }
        Ok(())
    }
}

impl ConfigValidator for KeyValueValidator {
    fn validate(&self, path: &Path) -> Result<ValidationReport> {
        let content = std::fs::read_to_string(path)?;
        let errors: Vec<String> = active_lines(&content)
            .filter_map(|(n, line)| self.check_line(line).err().map(|e| format!("line {}: {}", n, e)))
            .collect();
        Ok(if errors.is_empty() {
            ValidationReport::pass()
        } else {
            ValidationReport::fail(errors.join("\n"))
        })
    }

    fn name(&self) -> String {
        "key=value vocabulary".to_string()
    }
}
