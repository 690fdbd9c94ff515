//! Test catalog and orchestration
//!
//! Test definitions are loaded into a [`Catalog`]; the [`Engine`] runs them
//! one at a time against the message bus, feeding each entry's resolved
//! request and actual response into a cache later entries can reference.

mod catalog;
mod runner;

pub use catalog::{
    is_internal, is_valid_name, parse_entries, test_name_from_file, Catalog, TestEntries,
    TestEntry, INTERNAL_SIGIL,
};
pub use runner::{Engine, EngineStatus, RunReport, ALL_TESTS};
