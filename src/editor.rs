//! Line-oriented config editing.
//!
//! Edits are minimal: only the targeted line(s) or block change, and every
//! other byte of the file (comments, blank lines, CRLF endings, a missing
//! final newline) is preserved. Applying the same directive to its own output
//! is a no-op.

use crate::directive::{Directive, DirectiveValue, InsertionPolicy};
use crate::error::{HardenError, Result};
use regex::{Regex, RegexBuilder};

/// Result of applying a directive to file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditResult {
    pub content: String,
    pub changed: bool,
}

/// Locates occurrences of one directive key, commented or not
#[derive(Debug, Clone)]
pub struct LineMatcher {
    pattern: Regex,
}

/// One line of a file that mentions the directive key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMatch {
    pub commented: bool,
    pub value: String,
}

impl LineMatcher {
    pub fn new(directive: &Directive) -> Result<Self> {
        let source = format!(
            r"^\s*(?P<comment>#\s*)?{}(?:\s*=\s*|\s+|$)(?P<value>.*?)\s*$",
            regex::escape(&directive.key)
        );
        let pattern = RegexBuilder::new(&source)
            .case_insensitive(directive.case_insensitive)
            .build()
            .map_err(|e| HardenError::config(format!("bad key {:?}: {}", directive.key, e)))?;
        Ok(Self { pattern })
    }

    /// Match a single line body (no line ending)
    pub fn matches(&self, body: &str) -> Option<KeyMatch> {
        let caps = self.pattern.captures(body)?;
        Some(KeyMatch {
            commented: caps.name("comment").is_some(),
            value: caps.name("value").map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
    }
}

/// Split a line into its body and its line ending (`""`, `"\n"` or `"\r\n"`)
fn split_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// Collapse runs of whitespace and the spacing around `=`
pub fn normalize(line: &str) -> String {
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.split_once('=') {
        Some((key, value)) => format!("{}={}", key.trim(), value.trim()),
        None => collapsed,
    }
}

fn is_active(body: &str) -> bool {
    let trimmed = body.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#') && !trimmed.starts_with(';')
}

fn is_section_header(body: &str) -> bool {
    let trimmed = body.trim();
    trimmed.starts_with('[') && trimmed.ends_with(']')
}

/// Index range `[start, end)` of the last active block with this header.
/// Trailing blank lines stay outside the range.
fn block_range(lines: &[&str], header: &str) -> Option<(usize, usize)> {
    let start = lines
        .iter()
        .rposition(|line| split_ending(line).0.trim() == header.trim())?;
    let mut end = lines[start + 1..]
        .iter()
        .position(|line| is_section_header(split_ending(line).0))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());
    while end > start + 1 && split_ending(lines[end - 1]).0.trim().is_empty() {
        end -= 1;
    }
    Some((start, end))
}

/// Active values of the directive in file order. For block directives these
/// are the active body lines of the last matching block.
pub fn active_values(content: &str, directive: &Directive) -> Result<Vec<String>> {
    if directive.is_block() {
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        return Ok(match block_range(&lines, &directive.key) {
            Some((start, end)) => lines[start + 1..end]
                .iter()
                .map(|line| split_ending(line).0.trim())
                .filter(|body| is_active(body))
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        });
    }

    let matcher = LineMatcher::new(directive)?;
    Ok(content
        .lines()
        .filter_map(|line| matcher.matches(line))
        .filter(|m| !m.commented)
        .map(|m| m.value)
        .collect())
}

/// Apply a directive's insertion policy to file content
pub fn apply(content: &str, directive: &Directive) -> Result<EditResult> {
    let rendered = directive.render();
    let lines: Vec<&str> = content.split_inclusive('\n').collect();

    let new_content = match (directive.insertion, &directive.value) {
        (InsertionPolicy::ReplaceWholeBlock, DirectiveValue::Block(_)) => {
            replace_block(content, &lines, &directive.key, &rendered)
        }
        (InsertionPolicy::ReplaceWholeBlock, DirectiveValue::Line(_)) => {
            return Err(HardenError::config(format!(
                "{} uses replace-whole-block but has a single-line value",
                directive.key
            )));
        }
        (_, DirectiveValue::Block(_)) => {
            return Err(HardenError::config(format!(
                "block directive {} must use replace-whole-block",
                directive.key
            )));
        }
        (InsertionPolicy::AppendIfAbsent, DirectiveValue::Line(_)) => {
            let desired = normalize(&rendered[0]);
            let present = lines.iter().any(|line| {
                let body = split_ending(line).0;
                is_active(body) && normalize(body) == desired
            });
            if present {
                content.to_string()
            } else {
                append_lines(content, &rendered)
            }
        }
        (InsertionPolicy::ReplaceInPlace, DirectiveValue::Line(_)) => {
            replace_in_place(content, &lines, directive, &rendered[0])?
        }
    };

    Ok(EditResult {
        changed: new_content != content,
        content: new_content,
    })
}

fn replace_in_place(content: &str, lines: &[&str], directive: &Directive, desired: &str) -> Result<String> {
    let matcher = LineMatcher::new(directive)?;
    let matches: Vec<(usize, KeyMatch)> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| matcher.matches(split_ending(line).0).map(|m| (i, m)))
        .collect();

    let end = section_end(lines, directive)?;
    let active: Vec<usize> = matches.iter().filter(|(_, m)| !m.commented).map(|(i, _)| *i).collect();
    let targets = if !active.is_empty() {
        active
    } else if let Some((i, _)) = matches
        .iter()
        .rev()
        .find(|(i, m)| m.commented && end.is_none_or(|end| *i < end))
    {
        vec![*i]
    } else if let Some(end) = end {
        return Ok(insert_at(lines, end, desired));
    } else {
        return Ok(append_lines(content, &[desired.to_string()]));
    };

    let mut out = String::with_capacity(content.len() + desired.len());
    for (i, line) in lines.iter().enumerate() {
        if targets.contains(&i) {
            let (body, ending) = split_ending(line);
            let indent = &body[..body.len() - body.trim_start().len()];
            out.push_str(indent);
            out.push_str(desired);
            // A replaced final line without newline gains none
            out.push_str(ending);
        } else {
            out.push_str(line);
        }
    }
    Ok(out)
}

/// First active line matching the directive's `insert_before` pattern
fn section_end(lines: &[&str], directive: &Directive) -> Result<Option<usize>> {
    let Some(pattern) = &directive.insert_before else {
        return Ok(None);
    };
    let boundary = Regex::new(pattern)
        .map_err(|e| HardenError::config(format!("bad insert_before pattern {:?}: {}", pattern, e)))?;
    Ok(lines.iter().position(|line| {
        let body = split_ending(line).0;
        is_active(body) && boundary.is_match(body)
    }))
}

/// Insert `desired` as a new line just above `lines[index]`
fn insert_at(lines: &[&str], index: usize, desired: &str) -> String {
    let ending = if lines[index].ends_with("\r\n") { "\r\n" } else { "\n" };
    let mut out = String::new();
    lines[..index].iter().for_each(|line| out.push_str(line));
    out.push_str(desired);
    out.push_str(ending);
    lines[index..].iter().for_each(|line| out.push_str(line));
    out
}

fn replace_block(content: &str, lines: &[&str], header: &str, rendered: &[String]) -> String {
    let Some((start, end)) = block_range(lines, header) else {
        let mut out = content.to_string();
        let ends_blank = lines
            .last()
            .map(|line| split_ending(line).0.trim().is_empty())
            .unwrap_or(true);
        if !ends_blank {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        return append_lines(&out, rendered);
    };

    let ending = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let current: Vec<&str> = lines[start..end].iter().map(|l| split_ending(l).0).collect();
    if current.len() == rendered.len() && current.iter().zip(rendered).all(|(a, b)| *a == b) {
        return content.to_string();
    }

    let mut out = String::with_capacity(content.len());
    lines[..start].iter().for_each(|line| out.push_str(line));
    for line in rendered {
        out.push_str(line);
        out.push_str(ending);
    }
    lines[end..].iter().for_each(|line| out.push_str(line));
    out
}

fn append_lines(content: &str, rendered: &[String]) -> String {
    let mut out = content.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    for line in rendered {
        out.push_str(line);
        out.push('\n');
    }
    out
}
