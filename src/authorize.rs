//! Operator consent before the host is changed.

use std::io::{BufRead, Write};
use std::sync::Mutex;

/// What the operator is being asked to approve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// File or object being changed
    pub subject: String,
    /// Current effective value as shown to the operator
    pub current: String,
    /// Value the routine wants to set
    pub desired: String,
}

impl AuthorizationRequest {
    pub fn new(subject: impl Into<String>, current: impl Into<String>, desired: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            current: current.into(),
            desired: desired.into(),
        }
    }

    pub fn prompt(&self) -> String {
        format!(
            "{}: current {}, wanted {}. Apply the change? [y/N] ",
            self.subject, self.current, self.desired
        )
    }
}

/// Decides whether a change may proceed
pub trait AuthorizationProvider {
    fn authorize(&self, request: &AuthorizationRequest) -> bool;
}

/// `y`/`yes` (any case, surrounding whitespace ignored) approves; anything else denies
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn prompt_once<R: BufRead, W: Write>(input: &mut R, output: &mut W, request: &AuthorizationRequest) -> bool {
    if write!(output, "{}", request.prompt()).and_then(|_| output.flush()).is_err() {
        return false;
    }
    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => is_affirmative(&answer),
    }
}

/// y/N prompt over any reader/writer. No timeout; EOF or a read error denies.
pub struct PromptAuthorizer<R, W> {
    io: Mutex<(R, W)>,
}

impl<R: BufRead, W: Write> PromptAuthorizer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }
}

impl<R: BufRead, W: Write> AuthorizationProvider for PromptAuthorizer<R, W> {
    fn authorize(&self, request: &AuthorizationRequest) -> bool {
        let Ok(mut io) = self.io.lock() else {
            return false;
        };
        let (input, output) = &mut *io;
        prompt_once(input, output, request)
    }
}

/// Prompt on the terminal. Stdin is locked only while waiting for the answer.
pub struct StdinAuthorizer;

impl AuthorizationProvider for StdinAuthorizer {
    fn authorize(&self, request: &AuthorizationRequest) -> bool {
        prompt_once(&mut std::io::stdin().lock(), &mut std::io::stderr(), request)
    }
}

/// `--yes`
pub struct AutoApprove;

impl AuthorizationProvider for AutoApprove {
    fn authorize(&self, _request: &AuthorizationRequest) -> bool {
        true
    }
}

/// `--check`: report only
pub struct AutoDeny;

impl AuthorizationProvider for AutoDeny {
    fn authorize(&self, _request: &AuthorizationRequest) -> bool {
        false
    }
}
