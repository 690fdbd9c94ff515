//! Command allowlist
//!
//! The only external processes natstest ever starts are the ones named here.
//! Membership is an exact string match on the executable path; anything else
//! is rejected before a process is spawned.

use std::collections::HashSet;
use std::process::{Command, Stdio};

use super::{Error, Result};

/// Set of executable paths that templates and `~xc:` comparisons may run
#[derive(Debug, Clone, Default)]
pub struct CommandAllowlist {
    allowed: HashSet<String>,
}

impl CommandAllowlist {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: commands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, program: &str) -> bool {
        self.allowed.contains(program)
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Run an allowed program to completion and return its stdout
    ///
    /// A program outside the allowlist fails with `DisallowedCommand`; a
    /// launch failure or non-zero exit fails with `CommandFailed` tagged with
    /// the full command line.
    pub fn run(&self, program: &str, args: &[String]) -> Result<String> {
        if !self.contains(program) {
            return Err(Error::DisallowedCommand(program.to_string()));
        }

        let command_line = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!(command = %command_line, "running external command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::command_failed(&command_line, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = match output.status.code() {
                Some(code) => format!("exit status {}: {}", code, stderr.trim()),
                None => format!("terminated by signal: {}", stderr.trim()),
            };
            return Err(Error::command_failed(&command_line, reason));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
