//! Configuration directives and the files they live in.
//!
//! A [`Directive`] is one named setting (or one bracketed block) that must be
//! present in a [`ConfigTarget`]. How an existing occurrence is located and
//! rewritten is decided by its [`InsertionPolicy`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

/// How the editor brings a directive into the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum InsertionPolicy {
    /// Rewrite every active occurrence; else uncomment the last commented one; else append
    ReplaceInPlace,
    /// Append the exact line unless an identical active line exists
    AppendIfAbsent,
    /// Replace a `[header]` block up to the next header, or append it
    ReplaceWholeBlock,
}

/// Separator between key and value when rendering a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Separator {
    /// `Key value` (sshd_config, login.defs, chrony.conf)
    #[default]
    Whitespace,
    /// `KEY=value` (SELinux config)
    Equals,
    /// `key = value` (sysctl.d, fail2ban jails)
    SpacedEquals,
}

impl Separator {
    fn join(self, key: &str, value: &str) -> String {
        if value.is_empty() {
            return key.to_string();
        }
        match self {
            Self::Whitespace => format!("{} {}", key, value),
            Self::Equals => format!("{}={}", key, value),
            Self::SpacedEquals => format!("{} = {}", key, value),
        }
    }
}

/// Desired content of a directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectiveValue {
    /// A single value rendered after the key (empty for bare flags like `compress`)
    Line(String),
    /// Body lines of a block whose header is the directive key
    Block(Vec<String>),
}

/// One setting that must exist in a configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    /// Key (`LoginGraceTime`) or block header (`[sshd]`)
    pub key: String,
    pub value: DirectiveValue,
    pub separator: Separator,
    pub insertion: InsertionPolicy,
    /// Match keys ignoring case (sshd keywords are case-insensitive)
    pub case_insensitive: bool,
    /// Compiled-in default the service uses when the key is absent
    pub documented_default: Option<String>,
    /// Pattern of the first line past the global section (sshd `Match`).
    /// New lines go above it and commented occurrences below it are ignored.
    #[serde(default)]
    pub insert_before: Option<String>,
}

impl Directive {
    /// A `Key value` setting rewritten in place
    pub fn setting(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: DirectiveValue::Line(value.into()),
            separator: Separator::Whitespace,
            insertion: InsertionPolicy::ReplaceInPlace,
            case_insensitive: false,
            documented_default: None,
            insert_before: None,
        }
    }

    /// A complete line appended unless already present (multi-valued keys)
    pub fn line(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            insertion: InsertionPolicy::AppendIfAbsent,
            ..Self::setting(key, value)
        }
    }

    /// A bare keyword with no value; an existing `#key` is uncommented in place
    pub fn flag(key: impl Into<String>) -> Self {
        Self::setting(key, "")
    }

    /// A `[header]` block with the given body lines
    pub fn block(header: impl Into<String>, body: Vec<String>) -> Self {
        Self {
            key: header.into(),
            value: DirectiveValue::Block(body),
            separator: Separator::SpacedEquals,
            insertion: InsertionPolicy::ReplaceWholeBlock,
            case_insensitive: false,
            documented_default: None,
            insert_before: None,
        }
    }

    pub fn with_separator(mut self, separator: Separator) -> Self {
        self.separator = separator;
        self
    }

    pub fn ignoring_case(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.documented_default = Some(value.into());
        self
    }

    /// Keep the directive above the first active line matching `pattern`
    pub fn with_insert_before(mut self, pattern: impl Into<String>) -> Self {
        self.insert_before = Some(pattern.into());
        self
    }

    pub fn is_block(&self) -> bool {
        matches!(self.value, DirectiveValue::Block(_))
    }

    /// The desired single value, or the body lines joined by `; ` for blocks
    pub fn desired_display(&self) -> String {
        match &self.value {
            DirectiveValue::Line(v) => v.clone(),
            DirectiveValue::Block(lines) => lines.join("; "),
        }
    }

    /// The lines this directive renders to, without line endings
    pub fn render(&self) -> Vec<String> {
        match &self.value {
            DirectiveValue::Line(value) => vec![self.separator.join(&self.key, value)],
            DirectiveValue::Block(body) => {
                let mut lines = Vec::with_capacity(body.len() + 1);
                lines.push(self.key.clone());
                lines.extend(body.iter().cloned());
                lines
            }
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            DirectiveValue::Line(_) => write!(f, "{}", self.render().join("")),
            DirectiveValue::Block(body) => write!(f, "{} ({} lines)", self.key, body.len()),
        }
    }
}

/// Whether the target file has to exist before the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Existence {
    #[default]
    MustExist,
    /// Drop-in files the tool owns may be created
    MayCreate,
}

/// The file being mutated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTarget {
    pub path: PathBuf,
    pub existence: Existence,
    /// Permission bits enforced after every write (e.g. `0o644`)
    pub required_mode: Option<u32>,
    /// `(uid, gid)` enforced after every write
    pub required_owner: Option<(u32, u32)>,
}

impl ConfigTarget {
    /// A file that must already exist
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            existence: Existence::MustExist,
            required_mode: None,
            required_owner: None,
        }
    }

    /// A drop-in file that may be created by the run
    pub fn drop_in(path: impl Into<PathBuf>, mode: u32) -> Self {
        Self {
            path: path.into(),
            existence: Existence::MayCreate,
            required_mode: Some(mode),
            required_owner: None,
        }
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.required_owner = Some((uid, gid));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
