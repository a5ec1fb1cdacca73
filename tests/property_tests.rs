//! Property-based tests for the editor, snapshots and policy evaluation

use hostharden::directive::Directive;
use hostharden::editor;
use hostharden::policy::{Policy, is_compliant, mode_digits, parse_mode_digits};
use hostharden::resolver::{CurrentValue, Resolution, ValueSource};
use hostharden::snapshot::ConfigSnapshot;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

/// Config-file lines that never mention `MaxAuthTries`
fn unrelated_line() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Z][a-zA-Z]{2,12} [a-z0-9]{1,8}",
        "# [a-z ]{0,20}",
        Just(String::new()),
        "  [a-z]{1,6}=[0-9]{1,3}",
    ]
}

fn config_body() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(unrelated_line(), 0..12)
}

fn join_lines(lines: &[String]) -> String {
    lines.iter().map(|l| format!("{}\n", l)).collect()
}

fn value(v: impl Into<String>) -> Resolution {
    Resolution::Value(CurrentValue::single(v, ValueSource::File))
}

// =============================================================================
// Editor
// =============================================================================

proptest! {
    /// Applying a directive twice gives the same text as applying it once
    #[test]
    fn edit_is_idempotent(body in config_body(), n in 1u32..10, existing in prop::option::of(1u32..50)) {
        let mut lines = body;
        if let Some(old) = existing {
            lines.insert(lines.len() / 2, format!("MaxAuthTries {}", old));
        }
        let content = join_lines(&lines);
        let directive = Directive::setting("MaxAuthTries", n.to_string());

        let once = editor::apply(&content, &directive).unwrap();
        let twice = editor::apply(&once.content, &directive).unwrap();
        prop_assert!(!twice.changed);
        prop_assert_eq!(once.content, twice.content);
    }

    /// Lines that do not mention the key survive byte-for-byte and in order
    #[test]
    fn unrelated_lines_are_preserved(body in config_body(), n in 1u32..10) {
        let mut lines = body.clone();
        lines.push("MaxAuthTries 6".to_string());
        let content = join_lines(&lines);

        let edit = editor::apply(&content, &Directive::setting("MaxAuthTries", n.to_string())).unwrap();
        let kept: Vec<&str> = edit.content.lines().filter(|l| !l.starts_with("MaxAuthTries")).collect();
        let expected: Vec<&str> = body.iter().map(String::as_str).collect();
        prop_assert_eq!(kept, expected);
    }

    /// After an edit the file resolves to exactly the desired value
    #[test]
    fn edited_value_is_the_only_active_one(body in config_body(), olds in prop::collection::vec(1u32..50, 0..4), n in 1u32..10) {
        let mut lines = body;
        for old in olds {
            lines.push(format!("MaxAuthTries {}", old));
        }
        let directive = Directive::setting("MaxAuthTries", n.to_string());
        let edit = editor::apply(&join_lines(&lines), &directive).unwrap();
        let values = editor::active_values(&edit.content, &directive).unwrap();
        prop_assert!(!values.is_empty());
        prop_assert!(values.iter().all(|v| *v == n.to_string()));
    }
}

// =============================================================================
// Snapshots
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Restoring a snapshot gives back the exact original bytes
    #[test]
    fn snapshot_restores_exact_bytes(original in prop::collection::vec(any::<u8>(), 0..512), garbage in prop::collection::vec(any::<u8>(), 0..64)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.conf");
        std::fs::write(&path, &original).unwrap();

        let snapshot = ConfigSnapshot::capture(&path).unwrap();
        std::fs::write(&path, &garbage).unwrap();
        snapshot.restore().unwrap();

        prop_assert_eq!(std::fs::read(&path).unwrap(), original.clone());
        prop_assert_eq!(std::fs::read(snapshot.artifact().unwrap()).unwrap(), original);
    }
}

// =============================================================================
// Policy
// =============================================================================

proptest! {
    /// Range policies accept exactly the closed interval
    #[test]
    fn range_is_inclusive(min in -100i64..100, width in 0i64..100, probe in -300i64..300) {
        let max = min + width;
        let policy = Policy::range(min, max);
        let expected = probe >= min && probe <= max;
        prop_assert_eq!(is_compliant(&value(probe.to_string()), &policy), expected);
    }

    /// Values listed as insecure fail even inside the range
    #[test]
    fn insecure_values_never_pass(n in 0i64..10) {
        let policy = Policy::range_excluding(0, 10, &["0"]);
        prop_assert_eq!(is_compliant(&value(n.to_string()), &policy), n != 0);
    }

    /// Mode digits compare as a plain integer against the ceiling
    #[test]
    fn mode_ceiling_matches_digit_order(mode in 0u32..0o1000, ceiling in prop::sample::select(vec![600u32, 640, 644, 700, 755])) {
        let digits = mode_digits(mode);
        let as_number = parse_mode_digits(&digits).unwrap();
        prop_assert_eq!(
            is_compliant(&value(digits), &Policy::ModeCeiling(ceiling)),
            as_number <= ceiling
        );
    }
}

#[test]
fn unknown_never_complies() {
    for policy in [
        Policy::Exact("no".into()),
        Policy::range(1, 60),
        Policy::ModeCeiling(600),
        Policy::Present,
    ] {
        assert!(!is_compliant(&Resolution::Unknown, &policy), "{}", policy);
    }
}
