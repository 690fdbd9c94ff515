//! Template engine
//!
//! Rewrites a value tree, replacing directive strings with computed values:
//!
//! - `~ts:<fmt>` current UTC time formatted with strftime `<fmt>`, or the
//!   Unix time in seconds as a number when `<fmt>` is empty
//! - `~pv:<path>[>command line]` a value from the test cache, optionally
//!   piped through an allowlisted command (`%v` is the value)
//!
//! Substituted values keep their own JSON kind: a cached number replaces the
//! directive string with a number, an object with an object.

mod path;

use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::Utc;
use serde_json::{Map, Value};

use crate::common::{any_string, value_to_text, CommandAllowlist, Error, Result};
use crate::testing::TestEntry;

pub use path::lookup;

/// Directive prefix for timestamps
pub const TIMESTAMP: &str = "~ts:";
/// Directive prefix for previous values
pub const PREVIOUS_VALUE: &str = "~pv:";

/// Separates a `~pv:` path from its transformation command
const TRANSFORM_SEPARATOR: char = '>';
/// Placeholder replaced by the looked-up value in a transformation command
const VALUE_PLACEHOLDER: &str = "%v";

/// Resolves `~ts:` and `~pv:` directives in value trees
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    allowlist: Arc<CommandAllowlist>,
}

impl TemplateEngine {
    pub fn new(allowlist: Arc<CommandAllowlist>) -> Self {
        Self { allowlist }
    }

    /// Return a copy of `tree` with every directive string substituted
    ///
    /// `context` is the cache of resolved requests and actual responses that
    /// `~pv:` paths address.
    pub fn resolve(&self, tree: &Value, context: &[TestEntry]) -> Result<Value> {
        if tree.is_null() {
            return Err(Error::InvalidInput("null value".to_string()));
        }
        self.walk(tree, context)
    }

    fn walk(&self, node: &Value, context: &[TestEntry]) -> Result<Value> {
        match node {
            Value::String(s) => self.resolve_string(s, context),
            Value::Array(items) => items
                .iter()
                .map(|item| self.walk(item, context))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.walk(value, context)?);
                }
                Ok(Value::Object(out))
            }
            scalar => Ok(scalar.clone()),
        }
    }

    fn resolve_string(&self, s: &str, context: &[TestEntry]) -> Result<Value> {
        if let Some(format) = s.strip_prefix(TIMESTAMP) {
            timestamp(format)
        } else if let Some(reference) = s.strip_prefix(PREVIOUS_VALUE) {
            self.previous_value(reference, context)
        } else {
            Ok(Value::String(s.to_string()))
        }
    }

    fn previous_value(&self, reference: &str, context: &[TestEntry]) -> Result<Value> {
        match reference.split_once(TRANSFORM_SEPARATOR) {
            Some((path, command)) => {
                let value = lookup(context, path);
                self.transform(command, &value).map(Value::String)
            }
            None => Ok(lookup(context, reference)),
        }
    }

    /// Whether resolving `tree` would start an external command
    pub fn runs_commands(tree: &Value) -> bool {
        any_string(tree, &|s| {
            s.strip_prefix(PREVIOUS_VALUE)
                .is_some_and(|reference| reference.contains(TRANSFORM_SEPARATOR))
        })
    }

    /// Pipe `value` through an allowlisted command and return its trimmed stdout
    pub fn transform(&self, command_line: &str, value: &Value) -> Result<String> {
        let mut fields = command_line.split_whitespace();
        let program = fields
            .next()
            .ok_or_else(|| Error::Template(format!("empty command: '{}'", command_line)))?;
        let mut args: Vec<String> = fields.map(String::from).collect();
        if args.is_empty() {
            return Err(Error::Template(format!(
                "the command is missing arguments: {}",
                command_line
            )));
        }

        if let Some(slot) = args.iter_mut().find(|a| a.as_str() == VALUE_PLACEHOLDER) {
            *slot = value_to_text(value);
        }

        let out = self.allowlist.run(program, &args)?;
        Ok(out.trim_matches('\n').to_string())
    }
}

/// Current time for `~ts:`: formatted string, or epoch seconds when `format` is empty
fn timestamp(format: &str) -> Result<Value> {
    let now = Utc::now();
    if format.is_empty() {
        return Ok(Value::from(now.timestamp()));
    }

    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(Error::Template(format!("invalid time format '{}'", format)));
    }
    Ok(Value::String(now.format_with_items(items.into_iter()).to_string()))
}
