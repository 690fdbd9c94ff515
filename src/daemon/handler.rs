//! Command handler for processing IPC requests
//!
//! Translates IPC commands into engine operations.

use serde_json::json;

use crate::common::{error::IpcError, Result};
use crate::ipc::protocol::{Command, ListResult, ReloadResult, Response, RunResult, StatusResult};
use crate::testing::{Engine, EngineStatus, RunReport};

/// Handle an IPC command
pub async fn handle_command(engine: &Engine, id: u64, command: Command) -> Response {
    match handle_command_inner(engine, command).await {
        Ok(result) => Response::success(id, result),
        Err(e) => {
            if e.kind().is_client_fault() {
                tracing::debug!(id, error = %e, "command rejected");
            } else {
                tracing::warn!(id, error = %e, "command failed");
            }
            Response::error(id, IpcError::from(&e))
        }
    }
}

async fn handle_command_inner(engine: &Engine, command: Command) -> Result<serde_json::Value> {
    match command {
        // === Test Execution ===
        Command::RunTest { name } => {
            let report = engine.run_test(&name).await?;
            Ok(serde_json::to_value(run_result(&report))?)
        }

        Command::PutTest { name, definition } => {
            let report = engine.run_definition(&name, definition.as_bytes()).await?;
            Ok(serde_json::to_value(run_result(&report))?)
        }

        Command::DeleteTest { name } => {
            engine.delete_test(&name).await?;
            Ok(json!({ "deleted": name }))
        }

        Command::Reload => {
            let tests = engine.reload().await?;
            Ok(serde_json::to_value(ReloadResult { tests })?)
        }

        // === Inspection ===
        Command::Status => Ok(serde_json::to_value(status_result(engine.status()))?),

        Command::Health => {
            let status = engine.health().await?;
            Ok(serde_json::to_value(status_result(status))?)
        }

        Command::ListTests { all } => {
            let tests = if all {
                engine.all_test_names()
            } else {
                engine.test_names()
            };
            Ok(serde_json::to_value(ListResult { tests })?)
        }

        // Handled by the server loop before reaching here
        Command::Shutdown => Ok(json!({})),
    }
}

fn run_result(report: &RunReport) -> RunResult {
    RunResult {
        tests: report.tests,
        entries: report.entries,
        duration_ms: report.duration.as_millis() as u64,
    }
}

fn status_result(status: EngineStatus) -> StatusResult {
    StatusResult {
        busy: status.busy,
        elapsed_ms: status.elapsed_ms,
        tests: status.tests,
        version: env!("CARGO_PKG_VERSION").to_string(),
        pid: std::process::id(),
    }
}
