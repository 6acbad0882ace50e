//! Helpers for running external commands.

use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};

/// Extension trait for [`std::process::Command`] which turns a non-zero
/// exit into an error.
pub trait CommandRunExt {
    /// Run the command, inheriting stdout/stderr; error on non-zero exit.
    fn run(&mut self) -> Result<()>;

    /// Run the command and capture stdout as UTF-8 with trailing
    /// newlines trimmed. stderr is captured and only surfaced in the
    /// error on failure.
    fn run_get_string(&mut self) -> Result<String>;
}

impl CommandRunExt for Command {
    fn run(&mut self) -> Result<()> {
        tracing::debug!("exec: {self:?}");
        let st = self
            .status()
            .with_context(|| format!("Spawning {self:?}"))?;
        if !st.success() {
            bail!("Child [{self:?}] exited: {st}");
        }
        Ok(())
    }

    fn run_get_string(&mut self) -> Result<String> {
        tracing::debug!("exec: {self:?}");
        self.stdin(Stdio::null());
        let o = self
            .output()
            .with_context(|| format!("Spawning {self:?}"))?;
        if !o.status.success() {
            let stderr = String::from_utf8_lossy(&o.stderr);
            bail!("Child [{self:?}] exited: {}: {stderr}", o.status);
        }
        let mut r = String::from_utf8(o.stdout).context("Command output was not UTF-8")?;
        while r.ends_with('\n') {
            r.pop();
        }
        Ok(r)
    }
}
