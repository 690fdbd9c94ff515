//! Test definitions and the in-memory test catalog
//!
//! A test definition file `test_<name>.json` holds a JSON array of entries:
//!
//! ```json
//! [{"Topic": "svc.ping", "Request": {"n": 1}, "Response": {"n": "~re:[0-9]+"}}]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

/// Test names starting with this sigil are internal: runnable by name but
/// left out of "run all" and of public listings
pub const INTERNAL_SIGIL: char = '@';

/// A single request/response exchange of a test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEntry {
    /// Topic the request is sent to
    #[serde(rename = "Topic")]
    pub topic: String,
    /// Message to send, after template resolution
    #[serde(rename = "Request")]
    pub request: Value,
    /// Expected response, after template resolution
    #[serde(rename = "Response")]
    pub response: Value,
}

impl TestEntry {
    pub fn new(topic: impl Into<String>, request: Value, response: Value) -> Self {
        Self {
            topic: topic.into(),
            request,
            response,
        }
    }

    /// Look up a field by its definition-file name
    pub fn field(&self, name: &str) -> Option<&Value> {
        match name {
            "Request" => Some(&self.request),
            "Response" => Some(&self.response),
            _ => None,
        }
    }
}

/// Ordered entries of one test; later entries may reference earlier ones
pub type TestEntries = Vec<TestEntry>;

/// Parse a test definition from raw JSON bytes
pub fn parse_entries(name: &str, raw: &[u8]) -> Result<TestEntries> {
    serde_json::from_slice(raw).map_err(|e| Error::parse(name, e))
}

/// Whether `name` denotes an internal test
pub fn is_internal(name: &str) -> bool {
    name.starts_with(INTERNAL_SIGIL)
}

/// Whether `name` can be stored as `test_<name>.json`
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c == INTERNAL_SIGIL || c.is_ascii_alphanumeric())
}

fn file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^test_([@a-zA-Z0-9]+)\.json$").expect("valid pattern"))
}

/// Extract the test name from a definition file name
pub fn test_name_from_file(file_name: &str) -> Option<&str> {
    file_pattern()
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Mapping from test name to its entries, plus the listing order
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tests: HashMap<String, TestEntries>,
    names: Vec<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from definition files found in `dirs`
    ///
    /// Directories are searched in order and the first definition of a name
    /// wins. Missing or unreadable directories are skipped. Fails when a
    /// matching file cannot be read or parsed, or when nothing is found.
    pub fn load(dirs: &[PathBuf]) -> Result<Self> {
        let mut catalog = Self::new();

        for dir in dirs {
            for (name, file) in definition_files(dir) {
                if catalog.contains(&name) {
                    tracing::debug!(test = %name, file = %file.display(), "shadowed by an earlier path");
                    continue;
                }
                let raw = std::fs::read(&file).map_err(|e| {
                    Error::Filesystem(format!(
                        "unable to read the test file {}: {}",
                        file.display(),
                        e
                    ))
                })?;
                let entries = parse_entries(&name, &raw).map_err(|e| match e {
                    Error::Parse { name, reason } => Error::Parse {
                        name,
                        reason: format!("{} ({})", reason, file.display()),
                    },
                    other => other,
                })?;
                tracing::debug!(test = %name, file = %file.display(), entries = entries.len(), "loaded test");
                catalog.insert(name, entries);
            }
        }

        if catalog.is_empty() {
            let searched = dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Error::NoTestDefinitions(searched));
        }

        Ok(catalog)
    }

    /// Store `entries` under `name`; returns true when the name was new
    pub fn insert(&mut self, name: String, entries: TestEntries) -> bool {
        let is_new = self.tests.insert(name.clone(), entries).is_none();
        if is_new {
            self.names.push(name);
        }
        is_new
    }

    /// Remove a test by name
    pub fn remove(&mut self, name: &str) -> Result<TestEntries> {
        let entries = self
            .tests
            .remove(name)
            .ok_or_else(|| Error::TestNotFound(name.to_string()))?;
        self.names.retain(|n| n != name);
        Ok(entries)
    }

    pub fn get(&self, name: &str) -> Option<&TestEntries> {
        self.tests.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tests.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Every test name, in listing order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Non-internal test names, in listing order
    pub fn public_names(&self) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| !is_internal(n))
            .cloned()
            .collect()
    }
}

/// Definition files in `dir` as (test name, path), sorted by file name
fn definition_files(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        tracing::trace!(dir = %dir.display(), "skipping unreadable test directory");
        return Vec::new();
    };

    let mut files: Vec<(String, PathBuf)> = read_dir
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| {
            let file_name = entry.file_name();
            let name = test_name_from_file(file_name.to_str()?)?.to_string();
            Some((name, entry.path()))
        })
        .collect();
    files.sort_by(|a, b| a.1.cmp(&b.1));
    files
}
