//! CLI command handling
//!
//! Dispatches CLI commands to the service and formats output.

pub mod spawn;

use std::path::Path;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::{config::Config, Error, Result};
use crate::ipc::protocol::{Command, ListResult, ReloadResult, RunResult, StatusResult};
use crate::ipc::DaemonClient;
use crate::testing::{Engine, RunReport, TestEntry, ALL_TESTS};

use spawn::SpawnOptions;

/// Dispatch a client command
///
/// `serve` is handled by the binary before reaching here.
pub async fn dispatch(command: Commands, config: &Config, options: SpawnOptions<'_>) -> Result<()> {
    match command {
        Commands::Serve { .. } => Err(Error::Internal(
            "serve must be handled before dispatch".to_string(),
        )),

        Commands::Run { name } => {
            let mut client = spawn::connect_or_spawn(options).await?;
            let result: RunResult = client.request(Command::RunTest { name: name.clone() }).await?;

            if name == ALL_TESTS {
                print_success(&format!(
                    "All tests completed successfully ({} tests, {} ms)",
                    result.tests, result.duration_ms
                ));
            } else {
                print_success(&format!(
                    "{} passed ({} entries, {} ms)",
                    name, result.entries, result.duration_ms
                ));
            }
            Ok(())
        }

        Commands::Reload => {
            let mut client = spawn::connect_or_spawn(options).await?;
            let result: ReloadResult = client.request(Command::Reload).await?;
            print_success(&format!("Loaded {} tests", result.tests));
            Ok(())
        }

        Commands::Put { name, file } => {
            let definition = read_definition(&file)?;
            let mut client = spawn::connect_or_spawn(options).await?;
            let result: RunResult = client
                .request(Command::PutTest {
                    name: name.clone(),
                    definition,
                })
                .await?;
            print_success(&format!(
                "{} stored and passed ({} entries, {} ms)",
                name, result.entries, result.duration_ms
            ));
            Ok(())
        }

        Commands::Delete { name } => {
            let mut client = spawn::connect_or_spawn(options).await?;
            client.send_command(Command::DeleteTest { name: name.clone() }).await?;
            print_success(&format!("{} deleted", name));
            Ok(())
        }

        Commands::Status { check } => {
            let mut client = match DaemonClient::connect().await {
                Ok(client) => client,
                Err(Error::DaemonNotRunning) => {
                    println!("Service: not running");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let command = if check { Command::Health } else { Command::Status };
            let status: StatusResult = client.request(command).await?;
            print_status(&status, check);
            Ok(())
        }

        Commands::List { all } => {
            let mut client = spawn::connect_or_spawn(options).await?;
            let result: ListResult = client.request(Command::ListTests { all }).await?;
            if result.tests.is_empty() {
                println!("No tests loaded");
            }
            for name in &result.tests {
                println!("{}", name);
            }
            Ok(())
        }

        Commands::Stop => {
            let mut client = match DaemonClient::connect().await {
                Ok(client) => client,
                Err(Error::DaemonNotRunning) => {
                    println!("Service is not running");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            client.send_command(Command::Shutdown).await?;
            println!("Service stopped");
            Ok(())
        }

        Commands::Exec { file, verbose } => {
            let definition = read_definition(&file)?;
            let engine = Engine::from_config(config)?;
            let name = file
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.trim_start_matches("test_"))
                .filter(|s| crate::testing::is_valid_name(s))
                .unwrap_or("exec")
                .to_string();

            let result = engine.run_definition(&name, definition.as_bytes()).await;
            if verbose {
                print_cache(&engine.last_cache()?);
            }
            let report = result?;
            print_report(&name, &report);
            Ok(())
        }
    }
}

fn read_definition(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).map_err(|e| Error::FileRead {
        path: file.display().to_string(),
        error: e.to_string(),
    })
}

fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print a failure the way command results are printed
pub fn print_failure(error: &Error) {
    eprintln!("{} {}", "✗".red(), error);
}

fn print_report(name: &str, report: &RunReport) {
    print_success(&format!(
        "{} passed ({} entries, {} ms)",
        name,
        report.entries,
        report.duration.as_millis()
    ));
}

fn print_status(status: &StatusResult, checked: bool) {
    println!("Service: running (pid {}, version {})", status.pid, status.version);
    if status.busy {
        println!("State: {}", "busy".yellow());
    } else {
        println!("State: {}", "idle".green());
    }
    if let Some(ms) = status.elapsed_ms {
        println!("Last run started: {} ms ago", ms);
    }
    if checked {
        println!("Bus: {}", "reachable".green());
    }
    println!("Tests: {}", status.tests.len());
}

fn print_cache(cache: &[TestEntry]) {
    for (index, entry) in cache.iter().enumerate() {
        println!("{} {}", format!("[{}]", index).dimmed(), entry.topic.bold());
        println!("  request:  {}", entry.request);
        println!("  response: {}", entry.response);
    }
}
