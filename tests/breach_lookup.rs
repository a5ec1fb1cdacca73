//! Breach lookups against a canned range service

use hostharden::breach::{self, BreachStatus, RangeClient};
use hostharden::error::{HardenError, Result};
use std::cell::RefCell;

/// SHA-1("password") = 5BAA61E4C9B93F3F0682250B6CF8331B7EE68FD8
const PASSWORD_SUFFIX: &str = "1E4C9B93F3F0682250B6CF8331B7EE68FD8";

/// Serves one fixed body and remembers which prefixes were asked for
struct CannedRange {
    body: Result<String>,
    asked: RefCell<Vec<String>>,
}

impl CannedRange {
    fn serving(body: &str) -> Self {
        Self {
            body: Ok(body.to_string()),
            asked: RefCell::new(Vec::new()),
        }
    }

    fn failing(reason: &str) -> Self {
        Self {
            body: Err(HardenError::breach(reason)),
            asked: RefCell::new(Vec::new()),
        }
    }
}

impl RangeClient for CannedRange {
    fn fetch_range(&self, prefix: &str) -> Result<String> {
        self.asked.borrow_mut().push(prefix.to_string());
        match &self.body {
            Ok(body) => Ok(body.clone()),
            Err(e) => Err(HardenError::breach(e.to_string())),
        }
    }
}

#[test]
fn only_the_prefix_leaves_the_host() {
    let client = CannedRange::serving("");
    breach::check("password", &client);
    assert_eq!(*client.asked.borrow(), vec!["5BAA6".to_string()]);
}

#[test]
fn found_reports_count_and_exit_code() {
    let body = format!("0018A45C4D1DEF81644B54AB7F969B88D65:1\r\n{}:3861493\r\n", PASSWORD_SUFFIX);
    let status = breach::check("password", &CannedRange::serving(&body));
    assert_eq!(status, BreachStatus::Found(3_861_493));
    assert_eq!(status.exit_code(), 2);
}

#[test]
fn padding_entries_count_as_absent() {
    let body = format!("{}:0\n", PASSWORD_SUFFIX);
    let status = breach::check("password", &CannedRange::serving(&body));
    assert_eq!(status, BreachStatus::NotFound);
    assert_eq!(status.exit_code(), 0);
}

#[test]
fn lowercase_suffixes_still_match() {
    let body = format!("{}:12\n", PASSWORD_SUFFIX.to_ascii_lowercase());
    assert_eq!(breach::check("password", &CannedRange::serving(&body)), BreachStatus::Found(12));
}

#[test]
fn transport_and_parse_failures_are_resolver_errors() {
    let status = breach::check("password", &CannedRange::failing("connection refused"));
    assert!(matches!(&status, BreachStatus::ResolverError(reason) if reason.contains("connection refused")));
    assert_eq!(status.exit_code(), 3);

    let status = breach::check("password", &CannedRange::serving("not a range line\n"));
    assert!(matches!(status, BreachStatus::ResolverError(_)));
}
