//! Subprocess helper.
//!
//! `Cmd` wraps `std::process::Command` so every host tool invocation gets the
//! same treatment: output is captured, and a failure reports the command
//! line together with whatever the tool printed.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

/// Captured output of a successful command.
#[derive(Debug)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Builder for a host command that must succeed.
#[derive(Debug)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_owned());
        self
    }

    /// Message used as the head of the error when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Human readable command line, for logs and errors.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn run(self) -> Result<CmdOutput> {
        let cmdline = self.display();
        tracing::debug!(command = %cmdline, "running");

        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("spawning '{}'", cmdline))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let head = self
                .error_msg
                .unwrap_or_else(|| format!("'{}' failed", cmdline));
            bail!(
                "{} ({})\n{}\n{}",
                head,
                output.status,
                stdout.trim(),
                stderr.trim()
            );
        }

        Ok(CmdOutput { stdout, stderr })
    }
}
