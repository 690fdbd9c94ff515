//! natstest - integration-test harness for request/reply messaging services
//!
//! Loads declarative test definitions, sends each request over the message
//! bus and verifies the reply against an expected value that may contain
//! templated values, regular expressions and external comparisons.

pub mod bus;
pub mod cli;
pub mod commands;
pub mod common;
pub mod daemon;
pub mod ipc;
pub mod matcher;
pub mod template;
pub mod testing;

// Re-export commonly used types for tests
pub use bus::BusGateway;
pub use common::{CommandAllowlist, Error, ErrorKind, Result};
pub use matcher::{MatchError, Matcher};
pub use template::TemplateEngine;
pub use testing::{Catalog, Engine, RunReport, TestEntries, TestEntry};
