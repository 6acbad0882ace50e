//! The persisted image-reference handoff between the pull and install
//! stages.
//!
//! The final image reference is only known at pull time (the gateway
//! address is resolved at runtime, not when the units are generated),
//! so the pull stage persists it here and the install unit sources it
//! via `EnvironmentFile=`. This file is the sole cross-process data
//! dependency between the two stages: written at most once per
//! provisioning attempt, never rewritten, and left behind for
//! inspection (the next boot is a different root anyway).

use std::io::Read;

use anyhow::{Context, Result};
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt;
use fn_error_context::context;

/// Directory holding the state file.
pub(crate) const STATE_DIR: &str = "/run";
/// File name under [`STATE_DIR`].
pub(crate) const STATE_FILE: &str = "bootc-container-target";
/// Absolute path as referenced from the install unit.
pub(crate) const STATE_PATH: &str = "/run/bootc-container-target";

/// Environment key consumed by the install unit.
const IMAGE_KEY: &str = "BOOTC_IMAGE";

/// Read a previously persisted image reference, if any.
#[context("Reading {STATE_FILE}")]
pub(crate) fn read(dir: &Dir) -> Result<Option<String>> {
    let Some(mut f) = dir.open_optional(STATE_FILE)? else {
        return Ok(None);
    };
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let line = buf.trim_end();
    let reference = line
        .strip_prefix(IMAGE_KEY)
        .and_then(|v| v.strip_prefix('='))
        .with_context(|| format!("Malformed state file: {line:?}"))?;
    Ok(Some(reference.to_string()))
}

/// Persist the resolved image reference, in environment-file syntax.
/// Callers only invoke this when no reference is persisted yet.
#[context("Writing {STATE_FILE}")]
pub(crate) fn write(dir: &Dir, reference: &str) -> Result<()> {
    dir.atomic_write(STATE_FILE, format!("{IMAGE_KEY}={reference}\n"))?;
    Ok(())
}
