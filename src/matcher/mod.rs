//! Structural matcher
//!
//! Checks that everything present in an expected value tree is also present,
//! with the same value, in the actual tree. Extra object keys and trailing
//! array items in the actual tree are ignored. Expected strings may carry a
//! directive instead of a literal:
//!
//! - `~re:<pattern>` the actual value's text must contain a match of `<pattern>`
//! - `~xc:<tool>:<arg>` the allowlisted `<tool>`, run with `<arg>` and the
//!   actual value's text, must exit successfully

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::common::{any_string, value_to_text, CommandAllowlist, Error, Result};

/// Directive prefix for regular expression comparisons
pub const REGEX: &str = "~re:";
/// Directive prefix for external command comparisons
pub const EXTERNAL: &str = "~xc:";

/// First mismatch found between an expected and an actual tree
///
/// Displays as a JSON object so both sides can be inspected verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchError {
    pub error: String,
    pub path: String,
    pub expected: Value,
    pub actual: Value,
}

impl MatchError {
    fn new(message: impl Into<String>, path: &str, expected: &Value, actual: &Value) -> Self {
        Self {
            error: message.into(),
            path: path.to_string(),
            expected: expected.clone(),
            actual: actual.clone(),
        }
    }
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{} at {}", self.error, self.path),
        }
    }
}

impl std::error::Error for MatchError {}

type MatchResult = std::result::Result<(), MatchError>;

/// Partial-match comparator for value trees
#[derive(Debug, Clone)]
pub struct Matcher {
    allowlist: Arc<CommandAllowlist>,
}

impl Matcher {
    pub fn new(allowlist: Arc<CommandAllowlist>) -> Self {
        Self { allowlist }
    }

    /// Compare `expected` against `actual`, stopping at the first mismatch
    pub fn check(&self, expected: &Value, actual: &Value) -> MatchResult {
        self.compare(expected, actual, "$")
    }

    /// Whether matching against `expected` would start an external command
    pub fn runs_commands(expected: &Value) -> bool {
        any_string(expected, &|s| s.starts_with(EXTERNAL))
    }

    /// Compare any two serializable records through their value trees
    pub fn check_serialized<E, A>(&self, expected: &E, actual: &A) -> Result<()>
    where
        E: Serialize + ?Sized,
        A: Serialize + ?Sized,
    {
        let expected = serde_json::to_value(expected)?;
        let actual = serde_json::to_value(actual)?;
        self.check(&expected, &actual).map_err(Error::from)
    }

    fn compare(&self, expected: &Value, actual: &Value, path: &str) -> MatchResult {
        if let Value::String(pattern) = expected {
            return self.compare_string(pattern, expected, actual, path);
        }

        if kind_of(expected) != kind_of(actual) {
            return Err(MatchError::new("the types are different", path, expected, actual));
        }

        match (expected, actual) {
            (Value::Object(exp), Value::Object(act)) => {
                for (key, exp_value) in exp {
                    let child = format!("{}.{}", path, key);
                    match act.get(key) {
                        Some(act_value) => self.compare(exp_value, act_value, &child)?,
                        None => {
                            return Err(MatchError::new(
                                "missing map key",
                                &child,
                                exp_value,
                                &Value::Null,
                            ))
                        }
                    }
                }
                Ok(())
            }
            (Value::Array(exp), Value::Array(act)) => {
                if exp.len() > act.len() {
                    return Err(MatchError::new("missing array items", path, expected, actual));
                }
                for (i, (exp_item, act_item)) in exp.iter().zip(act).enumerate() {
                    self.compare(exp_item, act_item, &format!("{}[{}]", path, i))?;
                }
                Ok(())
            }
            (Value::Number(exp), Value::Number(act)) => {
                if numbers_equal(exp, act) {
                    Ok(())
                } else {
                    Err(MatchError::new("values are different", path, expected, actual))
                }
            }
            _ if expected == actual => Ok(()),
            _ => Err(MatchError::new("values are different", path, expected, actual)),
        }
    }

    fn compare_string(
        &self,
        pattern: &str,
        expected: &Value,
        actual: &Value,
        path: &str,
    ) -> MatchResult {
        if actual.as_str() == Some(pattern) {
            return Ok(());
        }

        if let Some(re) = pattern.strip_prefix(REGEX) {
            let regex = Regex::new(re).map_err(|e| {
                MatchError::new(
                    format!("invalid regular expression: {}", e),
                    path,
                    expected,
                    actual,
                )
            })?;
            if regex.is_match(&value_to_text(actual)) {
                return Ok(());
            }
            return Err(MatchError::new(
                "the regular expression does not match",
                path,
                expected,
                actual,
            ));
        }

        if let Some(directive) = pattern.strip_prefix(EXTERNAL) {
            return self.compare_external(directive, expected, actual, path);
        }

        Err(MatchError::new("values are different", path, expected, actual))
    }

    fn compare_external(
        &self,
        directive: &str,
        expected: &Value,
        actual: &Value,
        path: &str,
    ) -> MatchResult {
        let Some((tool, arg)) = directive.split_once(':') else {
            return Err(MatchError::new(
                "malformed external comparison, expected ~xc:<tool>:<arg>",
                path,
                expected,
                actual,
            ));
        };

        match self.allowlist.run(tool, &[arg.to_string(), value_to_text(actual)]) {
            Ok(_) => Ok(()),
            Err(Error::DisallowedCommand(cmd)) => Err(MatchError::new(
                format!("the external comparison command is not allowed: {}", cmd),
                path,
                expected,
                actual,
            )),
            Err(e) => Err(MatchError::new(
                format!("the external comparison failed: {}", e),
                path,
                expected,
                actual,
            )),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Kind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

fn kind_of(value: &Value) -> Kind {
    match value {
        Value::Null => Kind::Null,
        Value::Bool(_) => Kind::Bool,
        Value::Number(_) => Kind::Number,
        Value::String(_) => Kind::String,
        Value::Array(_) => Kind::Array,
        Value::Object(_) => Kind::Object,
    }
}

/// Integers compare exactly; anything involving a float compares as f64
fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn matcher() -> Matcher {
        Matcher::new(Arc::new(CommandAllowlist::new(["/bin/sh"])))
    }

    #[test]
    fn test_reflexive() {
        let samples = [
            json!(null),
            json!(true),
            json!(3.25),
            json!("text"),
            json!("~re:[0-9]+"),
            json!([1, "a", [null]]),
            json!({"a": {"b": [1, 2, {"c": "d"}]}, "e": false}),
        ];
        for sample in &samples {
            assert!(matcher().check(sample, sample).is_ok(), "not reflexive: {}", sample);
        }
    }

    #[test]
    fn test_partial_match_is_asymmetric() {
        let subset = json!({"a": 3, "b": [1, 2]});
        let superset = json!({"a": 3, "b": [1, 2, 3], "c": 7});
        assert!(matcher().check(&subset, &superset).is_ok());
        assert!(matcher().check(&superset, &subset).is_err());
    }

    #[test]
    fn test_different_values() {
        assert!(matcher().check(&json!("alpha"), &json!("beta")).is_err());
        let err = matcher()
            .check(&json!({"a": 3, "b": 11}), &json!({"a": 3, "b": 5}))
            .unwrap_err();
        assert_eq!(err.error, "values are different");
        assert_eq!(err.path, "$.b");
        assert_eq!(err.expected, json!(11));
        assert_eq!(err.actual, json!(5));
    }

    #[test]
    fn test_kind_mismatch() {
        let err = matcher().check(&json!([1]), &json!({"0": 1})).unwrap_err();
        assert_eq!(err.error, "the types are different");
        assert!(matcher().check(&json!(null), &json!(0)).is_err());
        assert!(matcher().check(&json!(1), &json!("1")).is_err());
    }

    #[test]
    fn test_missing_key() {
        let err = matcher().check(&json!({"x": null}), &json!({})).unwrap_err();
        assert_eq!(err.error, "missing map key");
        assert_eq!(err.path, "$.x");
    }

    #[test]
    fn test_array_too_short() {
        let err = matcher().check(&json!([3, 5, 7]), &json!([3, 5])).unwrap_err();
        assert_eq!(err.error, "missing array items");
        let err = matcher().check(&json!([3, 5, 7]), &json!([3, 11, 7])).unwrap_err();
        assert_eq!(err.path, "$[1]");
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert!(matcher().check(&json!(1), &json!(1.0)).is_ok());
        assert!(matcher().check(&json!(-2), &json!(-2)).is_ok());
        assert!(matcher().check(&json!(1), &json!(1.5)).is_err());
    }

    #[test]
    fn test_regex() {
        assert!(matcher().check(&json!("~re:[0-9]+"), &json!(123)).is_ok());
        assert!(matcher().check(&json!("~re:[a-z]+"), &json!("test")).is_ok());
        assert!(matcher().check(&json!("~re:^ab"), &json!("xxabc")).is_err());
        let err = matcher().check(&json!("~re:[0-9]+"), &json!("abc")).unwrap_err();
        assert_eq!(err.error, "the regular expression does not match");
    }

    #[test]
    fn test_invalid_regex_is_distinct() {
        let err = matcher().check(&json!("~re:[0-9"), &json!("1")).unwrap_err();
        assert!(err.error.starts_with("invalid regular expression"));
    }

    #[test]
    fn test_string_directive_stands_in_for_any_kind() {
        let expected = json!({"id": "~re:^[0-9a-f]{8}$", "n": "~re:\\d"});
        let actual = json!({"id": "deadbeef", "n": 4});
        assert!(matcher().check(&expected, &actual).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_external_comparison() {
        // sh reads the script from its first argument; the actual value follows as $1
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("above_ten.sh");
        std::fs::write(&script, "[ \"$1\" -gt 10 ]\n").unwrap();

        let expected = json!(format!("~xc:/bin/sh:{}", script.display()));
        assert!(matcher().check(&expected, &json!(42)).is_ok());
        assert!(matcher().check(&json!({"n": expected.clone()}), &json!({"n": "11"})).is_ok());
        let err = matcher().check(&expected, &json!(3)).unwrap_err();
        assert!(err.error.starts_with("the external comparison failed"));
        assert_eq!(err.path, "$");
    }

    #[test]
    fn test_runs_commands() {
        assert!(Matcher::runs_commands(&json!({"a": ["~xc:/bin/sh:x"]})));
        assert!(!Matcher::runs_commands(&json!({"a": "~re:xc", "b": 1})));
    }

    #[test]
    fn test_external_comparison_not_allowed() {
        let err = matcher()
            .check(&json!("~xc:/usr/bin/true:x"), &json!(1))
            .unwrap_err();
        assert!(err.error.contains("not allowed"));
    }

    #[test]
    fn test_external_comparison_malformed() {
        let err = matcher().check(&json!("~xc:/bin/sh"), &json!(1)).unwrap_err();
        assert!(err.error.starts_with("malformed"));
    }

    #[test]
    fn test_display_is_json() {
        let err = matcher().check(&json!({"a": 1}), &json!({"a": 2})).unwrap_err();
        let parsed: Value = serde_json::from_str(&err.to_string()).unwrap();
        assert_eq!(parsed["error"], json!("values are different"));
        assert_eq!(parsed["expected"], json!(1));
        assert_eq!(parsed["actual"], json!(2));
    }

    #[derive(Serialize)]
    struct Vertex2 {
        x: i32,
        y: i32,
    }

    #[derive(Serialize)]
    struct Vertex3 {
        x: i32,
        y: i32,
        z: i32,
    }

    #[test]
    fn test_records() {
        let v2 = Vertex2 { x: 3, y: 5 };
        let v3 = Vertex3 { x: 3, y: 5, z: 7 };
        let v4 = Vertex3 { x: 3, y: 11, z: 7 };
        assert!(matcher().check_serialized(&v2, &v3).is_ok());
        assert!(matcher().check_serialized(&v3, &v2).is_err());
        assert!(matcher().check_serialized(&v3, &v4).is_err());
        assert!(matcher().check_serialized(&Some(&v2), &Some(&v2)).is_ok());
    }
}
