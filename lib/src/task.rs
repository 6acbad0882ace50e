use std::{
    ffi::OsStr,
    process::{Command, Stdio},
};

use anyhow::Result;

/// An operator-visible execution of an external command: the
/// description is printed before running, and a non-zero exit becomes
/// an error naming the task and the exit status.
pub(crate) struct Task {
    description: String,
    cmd: Command,
}

impl Task {
    pub(crate) fn new(description: impl AsRef<str>, exe: impl AsRef<str>) -> Self {
        let description = description.as_ref().to_string();
        let mut cmd = Command::new(exe.as_ref());
        // Default to noninteractive
        cmd.stdin(Stdio::null());
        Self { description, cmd }
    }

    pub(crate) fn args<S: AsRef<OsStr>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.cmd.args(args);
        self
    }

    /// Run the command, returning an error if the command does not exit successfully.
    pub(crate) fn run(self) -> Result<()> {
        let description = self.description;
        let mut cmd = self.cmd;
        println!("{description}");
        tracing::debug!("exec: {cmd:?}");
        let st = cmd.status()?;
        if !st.success() {
            anyhow::bail!("Task {description} failed: {st:?}");
        }
        Ok(())
    }
}
