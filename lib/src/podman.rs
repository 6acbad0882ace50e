//! Helpers for interacting with podman.

use std::process::{Command, Stdio};

use anyhow::{ensure, Context, Result};
use fn_error_context::context;
use reprovision_utils::CommandRunExt;
use which::which;

use crate::task::Task;

/// Check whether `image` is already present in local container storage.
/// (`podman image exists` is deprecated, `inspect` is the stable probe.)
pub(crate) fn image_exists(image: &str) -> Result<bool> {
    let st = Command::new("podman")
        .args(["image", "inspect", image])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("Invoking podman")?;
    Ok(st.success())
}

/// Pull `image`. TLS verification is only disabled when the caller
/// explicitly asks for it (ephemeral registry case).
#[context("Pulling {image}")]
pub(crate) fn pull(image: &str, tls_verify: bool) -> Result<()> {
    let mut cmd = Command::new("podman");
    cmd.arg("pull");
    if !tls_verify {
        cmd.arg("--tls-verify=false");
    }
    cmd.arg(image);
    cmd.run()
}

/// Install podman if it's not already present; cloud images don't
/// always ship it.
#[context("Ensuring podman is installed")]
pub(crate) fn ensure_installed() -> Result<()> {
    if which("podman").is_ok() {
        return Ok(());
    }
    tracing::warn!("podman not found, installing it");
    Task::new("Installing podman", "dnf")
        .args(["-y", "install", "podman"])
        .run()?;
    ensure!(
        which("podman").is_ok(),
        "podman still not available after installation"
    );
    Ok(())
}
