//! IPC protocol message types
//!
//! Defines the request/response format for client ↔ service communication.
//! Uses a simple length-prefixed JSON protocol.

use serde::{Deserialize, Serialize};

use crate::common::error::IpcError;

/// IPC request from client to service
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for matching responses
    pub id: u64,
    /// The command to execute
    pub command: Command,
}

/// IPC response from service to client
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response corresponds to
    pub id: u64,
    /// Whether the command succeeded
    pub success: bool,
    /// Result data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error information on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
}

impl Response {
    /// Create a success response
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: IpcError) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Create a success response with no data
    pub fn ok(id: u64) -> Self {
        Self {
            id,
            success: true,
            result: Some(serde_json::json!({})),
            error: None,
        }
    }
}

/// Commands that can be sent from client to service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // === Test Execution ===
    /// Run one test, or every public test when the name is `all`
    RunTest { name: String },

    /// Store a test definition and run it
    PutTest {
        name: String,
        /// Raw JSON test definition
        definition: String,
    },

    /// Remove a test from the catalog
    DeleteTest { name: String },

    /// Reload the catalog from disk
    Reload,

    // === Inspection ===
    /// Service state
    Status,

    /// Service state plus a bus connectivity check
    Health,

    /// List test names
    ListTests {
        /// Include internal (`@`) tests
        #[serde(default)]
        all: bool,
    },

    // === Shutdown ===
    /// Shutdown the service
    Shutdown,
}

// === Result types for responses ===

/// Result of `run_test` and `put_test`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub tests: usize,
    pub entries: usize,
    pub duration_ms: u64,
}

/// Result of `status` and `health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub busy: bool,
    pub elapsed_ms: Option<u64>,
    pub tests: Vec<String>,
    pub version: String,
    pub pid: u32,
}

/// Result of `list_tests`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResult {
    pub tests: Vec<String>,
}

/// Result of `reload`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResult {
    pub tests: usize,
}
