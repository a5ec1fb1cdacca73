//! Effective-value resolution.
//!
//! The value a daemon actually honours can differ from what a naive grep of
//! its config shows (includes, duplicate keys, compiled-in defaults). The
//! [`LayeredResolver`] therefore asks, in order:
//!
//! 1. the daemon's own test facility ([`LiveQuery`], e.g. `sshd -T`),
//! 2. the target file (all active occurrences; the last one is effective),
//! 3. the directive's documented default, only when the file was read and
//!    genuinely has no active occurrence.
//!
//! If the live query failed AND the file could not be read, nothing is known
//! and the resolver reports [`HardenError::ResolutionAmbiguous`] instead of
//! guessing.

use crate::command_runner::CommandRunner;
use crate::directive::{ConfigTarget, Directive, Existence};
use crate::editor;
use crate::error::{HardenError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use tracing::{debug, warn};

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Live,
    File,
    Default,
}

/// All values currently in force for a key, in precedence order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentValue {
    pub values: Vec<String>,
    pub source: ValueSource,
}

impl CurrentValue {
    pub fn new(values: Vec<String>, source: ValueSource) -> Self {
        Self { values, source }
    }

    pub fn single(value: impl Into<String>, source: ValueSource) -> Self {
        Self::new(vec![value.into()], source)
    }

    /// The value that wins (last occurrence)
    pub fn effective(&self) -> Option<&str> {
        self.values.last().map(String::as_str)
    }
}

/// Outcome of resolving a directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Value(CurrentValue),
    /// No source holds a value; absence is a valid state
    Unknown,
}

impl Resolution {
    pub fn current(&self) -> Option<&CurrentValue> {
        match self {
            Self::Value(v) => Some(v),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) if v.values.len() == 1 => write!(f, "{:?}", v.values[0]),
            Self::Value(v) => write!(f, "{:?}", v.values),
            Self::Unknown => write!(f, "<unset>"),
        }
    }
}

/// Determines the value currently in force for a directive
pub trait EffectiveValueResolver {
    fn resolve(&self, target: &ConfigTarget, directive: &Directive) -> Result<Resolution>;
}

/// Answer from a daemon's own configuration dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveAnswer {
    Value(Vec<String>),
    /// The tool ran but does not report this key
    Absent,
}

/// Asks a service for its effective configuration
pub trait LiveQuery {
    fn query(&self, target: &ConfigTarget, directive: &Directive) -> Result<LiveAnswer>;
}

/// Live query → file text → documented default
#[derive(Default)]
pub struct LayeredResolver<'a> {
    live: Option<&'a dyn LiveQuery>,
}

impl<'a> LayeredResolver<'a> {
    /// Resolve from the file (and documented default) only
    pub fn file_only() -> Self {
        Self { live: None }
    }

    pub fn with_live(live: &'a dyn LiveQuery) -> Self {
        Self { live: Some(live) }
    }
}

impl EffectiveValueResolver for LayeredResolver<'_> {
    fn resolve(&self, target: &ConfigTarget, directive: &Directive) -> Result<Resolution> {
        let mut live_error = None;
        if let Some(live) = self.live {
            match live.query(target, directive) {
                Ok(LiveAnswer::Value(values)) if !values.is_empty() => {
                    debug!("{}: live value {:?}", directive.key, values);
                    return Ok(Resolution::Value(CurrentValue::new(values, ValueSource::Live)));
                }
                Ok(_) => debug!("{}: not reported by live query", directive.key),
                Err(e) => {
                    warn!("{}: live query failed, falling back to file: {}", directive.key, e);
                    live_error = Some(e.to_string());
                }
            }
        }

        let content = match std::fs::read_to_string(&target.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound && target.existence == Existence::MayCreate => {
                String::new()
            }
            Err(e) => {
                let reason = match live_error {
                    Some(live) => format!("live query failed ({}) and file unreadable ({})", live, e),
                    None => format!("file unreadable ({})", e),
                };
                return Err(HardenError::ResolutionAmbiguous {
                    key: directive.key.clone(),
                    path: target.path.clone(),
                    reason,
                });
            }
        };

        let values = editor::active_values(&content, directive)?;
        if !values.is_empty() {
            return Ok(Resolution::Value(CurrentValue::new(values, ValueSource::File)));
        }
        Ok(match &directive.documented_default {
            Some(default) => Resolution::Value(CurrentValue::single(default.clone(), ValueSource::Default)),
            None => Resolution::Unknown,
        })
    }
}

/// Parse `sshd -T` output into lowercase keyword → values.
///
/// Each line is `keyword value...`; repeatable keywords such as `allowusers`
/// appear once per value.
pub fn parse_sshd_dump(stdout: &str) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        map.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.trim().to_string());
    }
    map
}

/// Effective sshd settings via `sshd -T -f <path>`
pub struct SshdQuery<'a> {
    runner: &'a dyn CommandRunner,
    binary: String,
}

impl<'a> SshdQuery<'a> {
    pub fn new(runner: &'a dyn CommandRunner, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
        }
    }
}

impl LiveQuery for SshdQuery<'_> {
    fn query(&self, target: &ConfigTarget, directive: &Directive) -> Result<LiveAnswer> {
        let path = target.path.to_string_lossy();
        let output = self.runner.run(&self.binary, &["-T", "-f", &path])?;
        output.ensure_success("sshd -T")?;
        let dump = parse_sshd_dump(&output.stdout);
        Ok(match dump.get(&directive.key.to_ascii_lowercase()) {
            Some(values) => LiveAnswer::Value(values.clone()),
            None => LiveAnswer::Absent,
        })
    }
}

/// Running kernel parameters via `sysctl -n <key>`
pub struct SysctlQuery<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> SysctlQuery<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }
}

impl LiveQuery for SysctlQuery<'_> {
    fn query(&self, _target: &ConfigTarget, directive: &Directive) -> Result<LiveAnswer> {
        let output = self.runner.run("sysctl", &["-n", &directive.key])?;
        if !output.success {
            // Unknown key on this kernel (e.g. IPv6 disabled)
            return Ok(LiveAnswer::Absent);
        }
        let value = output.stdout.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(LiveAnswer::Value(vec![value]))
    }
}
