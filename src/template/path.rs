//! `~pv:` path lookup against the test cache
//!
//! A path is a dot-separated list of segments: the first selects a cache
//! entry by position, the second a field of that entry (`Topic`, `Request`,
//! `Response`), and the rest walk into the value by object key or array
//! index. Anything that does not resolve yields `null`.

use serde_json::Value;

use crate::testing::TestEntry;

/// Resolve `path` against `context`, returning `Value::Null` when any
/// segment is missing
pub fn lookup(context: &[TestEntry], path: &str) -> Value {
    let mut segments = path.split('.');

    let entry = match segments
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .and_then(|i| context.get(i))
    {
        Some(entry) => entry,
        None => return Value::Null,
    };

    let topic;
    let mut current = match segments.next() {
        Some("Topic") => {
            topic = Value::String(entry.topic.clone());
            &topic
        }
        Some(field) => match entry.field(field) {
            Some(value) => value,
            None => return Value::Null,
        },
        None => return serde_json::to_value(entry).unwrap_or(Value::Null),
    };

    for segment in segments {
        current = match descend(current, segment) {
            Some(next) => next,
            None => return Value::Null,
        };
    }

    current.clone()
}

/// Step one segment into a value, dispatching on its kind
fn descend<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}
