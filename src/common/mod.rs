//! Common utilities shared between client and service modes

pub mod allowlist;
pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use allowlist::CommandAllowlist;
pub use error::{Error, ErrorKind, Result};

/// Render a value the way external tools and regexes see it: strings as-is,
/// everything else as compact JSON
pub fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether any string leaf of `value` satisfies `pred`
pub fn any_string(value: &serde_json::Value, pred: &dyn Fn(&str) -> bool) -> bool {
    match value {
        serde_json::Value::String(s) => pred(s),
        serde_json::Value::Array(items) => items.iter().any(|item| any_string(item, pred)),
        serde_json::Value::Object(map) => map.values().any(|item| any_string(item, pred)),
        _ => false,
    }
}
