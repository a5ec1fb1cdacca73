//! Breached-password lookup against a k-anonymity range API.
//!
//! Only the first five hex characters of the SHA-1 digest leave the host;
//! the remaining 35 are matched locally against the returned
//! `SUFFIX:COUNT` lines.

use crate::error::{HardenError, Result};
use crate::process_guard;
use sha1::{Digest, Sha1};
use std::io::BufRead;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_RANGE_API: &str = "https://api.pwnedpasswords.com/range";
const PREFIX_LEN: usize = 5;

/// Result of a breach lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreachStatus {
    NotFound,
    /// Seen this many times in known breaches
    Found(u64),
    ResolverError(String),
}

impl BreachStatus {
    /// 0 not found, 2 found, 3 lookup failed
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound => 0,
            Self::Found(_) => 2,
            Self::ResolverError(_) => 3,
        }
    }
}

/// Fetches the suffix list for a 5-character hash prefix
pub trait RangeClient {
    fn fetch_range(&self, prefix: &str) -> Result<String>;
}

/// Blocking HTTPS client for `GET <base>/<prefix>`
pub struct HttpRangeClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpRangeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hostharden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HardenError::breach(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl RangeClient for HttpRangeClient {
    fn fetch_range(&self, prefix: &str) -> Result<String> {
        let url = format!("{}/{}", self.base_url, prefix);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .header("Add-Padding", "true")
            .send()
            .map_err(|e| HardenError::breach(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(HardenError::breach(format!("HTTP error: {}", response.status())));
        }
        response
            .text()
            .map_err(|e| HardenError::breach(format!("cannot read response: {}", e)))
    }
}

/// Uppercase hex SHA-1 of the credential
pub fn sha1_hex_upper(credential: &str) -> String {
    hex::encode_upper(Sha1::digest(credential.as_bytes()))
}

/// Split a 40-character digest into the sent prefix and the local suffix
pub fn split_digest(digest: &str) -> (&str, &str) {
    digest.split_at(PREFIX_LEN)
}

/// Breach count for `suffix` in a range response. Padding entries
/// (count 0) count as absent.
pub fn find_suffix(body: &str, suffix: &str) -> Result<Option<u64>> {
    for (n, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (candidate, count) = line
            .split_once(':')
            .ok_or_else(|| HardenError::breach(format!("malformed response line {}: {:?}", n + 1, line)))?;
        if !candidate.eq_ignore_ascii_case(suffix) {
            continue;
        }
        let count: u64 = count
            .trim()
            .parse()
            .map_err(|_| HardenError::breach(format!("bad count on line {}: {:?}", n + 1, count)))?;
        return Ok((count > 0).then_some(count));
    }
    Ok(None)
}

/// Look the credential up without ever sending it or its full hash
pub fn check(credential: &str, client: &dyn RangeClient) -> BreachStatus {
    let digest = sha1_hex_upper(credential);
    let (prefix, suffix) = split_digest(&digest);
    let body = match client.fetch_range(prefix) {
        Ok(body) => body,
        Err(e) => {
            warn!("Breach lookup failed: {}", e);
            return BreachStatus::ResolverError(e.to_string());
        }
    };
    match find_suffix(&body, suffix) {
        Ok(Some(count)) => {
            info!("Credential found in breach corpus ({} times)", count);
            BreachStatus::Found(count)
        }
        Ok(None) => BreachStatus::NotFound,
        Err(e) => BreachStatus::ResolverError(e.to_string()),
    }
}

/// Echo is off while this lives. The original settings are also handed to
/// the signal watcher, which restores them if we are interrupted.
struct EchoOff;

impl EchoOff {
    /// None when stdin is not a terminal
    fn new(stdin: &std::io::Stdin) -> std::io::Result<Option<Self>> {
        use nix::sys::termios::{LocalFlags, SetArg, tcgetattr, tcsetattr};
        use std::os::fd::AsFd;

        let Ok(original) = tcgetattr(stdin) else {
            return Ok(None);
        };
        let mut silent = original.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        process_guard::save_terminal(stdin.as_fd().try_clone_to_owned()?, original);
        if let Err(e) = tcsetattr(stdin, SetArg::TCSANOW, &silent) {
            process_guard::restore_terminal();
            return Err(std::io::Error::from(e));
        }
        Ok(Some(Self))
    }
}

impl Drop for EchoOff {
    fn drop(&mut self) {
        process_guard::restore_terminal();
        eprintln!();
    }
}

/// Read one line from stdin with terminal echo disabled (when stdin is a tty)
pub fn read_secret(prompt: &str) -> std::io::Result<String> {
    let stdin = std::io::stdin();
    eprint!("{}", prompt);
    let echo_off = EchoOff::new(&stdin)?;

    let mut line = String::new();
    let read = stdin.lock().read_line(&mut line);
    drop(echo_off);

    read?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Read one line from stdin as-is (piped input)
pub fn read_line_stdin() -> std::io::Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
