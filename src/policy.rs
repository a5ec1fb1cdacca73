//! Compliance evaluation.
//!
//! A [`Policy`] says which values of a directive are acceptable. Evaluation is
//! pure: it looks only at a [`Resolution`] and never touches the host.

use crate::editor::normalize;
use crate::resolver::Resolution;
use std::collections::BTreeSet;
use std::fmt;

/// Acceptable values for a directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    /// Effective value equals this (case-insensitive, whitespace-normalized)
    Exact(String),
    /// All tokens across all active values form exactly this set
    SameSet(Vec<String>),
    /// Effective value is an integer (or sshd time spec) in `min..=max`
    Range {
        min: i64,
        max: i64,
        /// Values that are never acceptable (`0` meaning "unlimited", etc.)
        insecure: Vec<String>,
    },
    /// Octal mode digits, compared as a plain integer, at most this
    ModeCeiling(u32),
    /// Effective value is `uid:gid`
    Owner { uid: u32, gid: u32 },
    /// At least one active value equals this
    Includes(String),
    /// Any active occurrence
    Present,
    /// Block body lines equal these, as a set
    Lines(Vec<String>),
}

impl Policy {
    pub fn range(min: i64, max: i64) -> Self {
        Self::Range {
            min,
            max,
            insecure: Vec::new(),
        }
    }

    pub fn range_excluding(min: i64, max: i64, insecure: &[&str]) -> Self {
        Self::Range {
            min,
            max,
            insecure: insecure.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "= {}", v),
            Self::SameSet(v) => write!(f, "exactly {{{}}}", v.join(", ")),
            Self::Range { min, max, insecure } if insecure.is_empty() => write!(f, "in {}..={}", min, max),
            Self::Range { min, max, insecure } => {
                write!(f, "in {}..={} and not {}", min, max, insecure.join("/"))
            }
            Self::ModeCeiling(c) => write!(f, "mode <= {}", c),
            Self::Owner { uid, gid } => write!(f, "owner {}:{}", uid, gid),
            Self::Includes(v) => write!(f, "includes {}", v),
            Self::Present => write!(f, "present"),
            Self::Lines(lines) => write!(f, "block of {} lines", lines.len()),
        }
    }
}

/// Whether the resolved value satisfies the policy. `Unknown` never does.
pub fn is_compliant(resolution: &Resolution, policy: &Policy) -> bool {
    let Some(current) = resolution.current() else {
        return false;
    };
    let Some(effective) = current.effective() else {
        return false;
    };

    match policy {
        Policy::Exact(desired) => normalize(effective).eq_ignore_ascii_case(&normalize(desired)),
        Policy::SameSet(desired) => {
            let have: BTreeSet<&str> = current.values.iter().flat_map(|v| tokens(v)).collect();
            let want: BTreeSet<&str> = desired.iter().flat_map(|v| tokens(v)).collect();
            have == want
        }
        Policy::Range { min, max, insecure } => {
            let value = effective.trim();
            if insecure.iter().any(|bad| bad.eq_ignore_ascii_case(value)) {
                return false;
            }
            parse_time_spec(value).is_some_and(|n| (*min..=*max).contains(&n))
        }
        Policy::ModeCeiling(ceiling) => parse_mode_digits(effective).is_some_and(|m| m <= *ceiling),
        Policy::Owner { uid, gid } => parse_owner(effective) == Some((*uid, *gid)),
        Policy::Includes(desired) => {
            let desired = normalize(desired);
            current.values.iter().any(|v| normalize(v) == desired)
        }
        Policy::Present => true,
        Policy::Lines(desired) => {
            let have: BTreeSet<String> = current.values.iter().map(|v| normalize(v)).collect();
            let want: BTreeSet<String> = desired.iter().map(|v| normalize(v)).collect();
            have == want
        }
    }
}

fn tokens(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
}

/// Parse an integer or an sshd time spec (`90`, `1m30s`, `2h`) into seconds
pub fn parse_time_spec(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    if value.is_empty() {
        return None;
    }

    let mut total: i64 = 0;
    let mut digits = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let multiplier = match c.to_ascii_lowercase() {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            'w' => 604_800,
            _ => return None,
        };
        let n: i64 = digits.parse().ok()?;
        total = total.checked_add(n.checked_mul(multiplier)?)?;
        digits.clear();
    }
    if !digits.is_empty() {
        total = total.checked_add(digits.parse().ok()?)?;
    }
    Some(total)
}

/// `"0640"` / `"640"` → `640`; rejects non-octal digits
pub fn parse_mode_digits(value: &str) -> Option<u32> {
    let value = value.trim();
    if value.is_empty() || !value.chars().all(|c| ('0'..='7').contains(&c)) {
        return None;
    }
    value.parse().ok()
}

/// Render permission bits the way [`parse_mode_digits`] reads them
pub fn mode_digits(mode: u32) -> String {
    format!("{:03o}", mode & 0o7777)
}

fn parse_owner(value: &str) -> Option<(u32, u32)> {
    let (uid, gid) = value.trim().split_once(':')?;
    Some((uid.parse().ok()?, gid.parse().ok()?))
}
