//! Minimal typed model of the systemd units this crate generates.
//!
//! The generated chain is small and fixed, so only the directives used
//! here are modeled. Rendering validates the content; callers render
//! every unit before writing any of them, so a malformed descriptor
//! cannot leave a partially written chain for the next boot to trip
//! over.

use std::fmt::Write as _;

use anyhow::{ensure, Context as _, Result};
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt;
use fn_error_context::context;

/// `[Unit]` section directives.
#[derive(Debug, Default)]
pub(crate) struct UnitSection {
    pub(crate) description: String,
    pub(crate) after: Vec<String>,
    pub(crate) wants: Vec<String>,
    pub(crate) requires: Vec<String>,
}

/// `Type=` values used by this crate.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ServiceType {
    Oneshot,
}

impl ServiceType {
    fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Oneshot => "oneshot",
        }
    }
}

/// `[Service]` section directives.
#[derive(Debug)]
pub(crate) struct ServiceSection {
    pub(crate) service_type: ServiceType,
    pub(crate) environment_file: Option<String>,
    /// One command per entry, run in order; a failing entry stops the
    /// unit and marks it failed, skipping the remaining entries.
    pub(crate) exec_start: Vec<String>,
}

/// `[Install]` section directives.
#[derive(Debug, Default)]
pub(crate) struct InstallSection {
    pub(crate) wanted_by: Vec<String>,
}

/// A complete service unit.
#[derive(Debug)]
pub(crate) struct ServiceUnit {
    pub(crate) name: String,
    pub(crate) unit: UnitSection,
    pub(crate) service: ServiceSection,
    pub(crate) install: InstallSection,
}

// Unit syntax is line- and whitespace-oriented; a value containing a
// newline would smuggle in arbitrary directives.
fn check_line(key: &str, value: &str) -> Result<()> {
    ensure!(
        !value.trim().is_empty(),
        "Empty value for {key}"
    );
    ensure!(
        !value.contains(['\n', '\r']),
        "Invalid newline in {key}: {value:?}"
    );
    Ok(())
}

// Stricter check for values in space-separated lists (unit names,
// targets, paths).
fn check_word(key: &str, value: &str) -> Result<()> {
    check_line(key, value)?;
    ensure!(
        !value.contains(char::is_whitespace),
        "Invalid whitespace in {key}: {value:?}"
    );
    Ok(())
}

impl ServiceUnit {
    /// Serialize to unit-file syntax, validating the content.
    pub(crate) fn render(&self) -> Result<String> {
        ensure!(
            self.name
                .strip_suffix(".service")
                .is_some_and(|stem| !stem.is_empty()),
            "Invalid unit name: {:?}",
            self.name
        );
        check_word("unit name", &self.name)?;
        let mut r = String::new();
        r.push_str("[Unit]\n");
        check_line("Description", &self.unit.description)?;
        writeln!(r, "Description={}", self.unit.description)?;
        for (key, deps) in [
            ("After", &self.unit.after),
            ("Wants", &self.unit.wants),
            ("Requires", &self.unit.requires),
        ] {
            if deps.is_empty() {
                continue;
            }
            for dep in deps {
                check_word(key, dep)?;
            }
            writeln!(r, "{key}={}", deps.join(" "))?;
        }
        r.push_str("\n[Service]\n");
        writeln!(r, "Type={}", self.service.service_type.as_str())?;
        if let Some(envfile) = self.service.environment_file.as_deref() {
            check_word("EnvironmentFile", envfile)?;
            ensure!(
                envfile.starts_with('/'),
                "EnvironmentFile is not absolute: {envfile}"
            );
            writeln!(r, "EnvironmentFile={envfile}")?;
        }
        // An ExecStart-less oneshot would only surface as a confusing
        // failure at daemon-reload time on the target.
        ensure!(
            !self.service.exec_start.is_empty(),
            "Unit has no ExecStart"
        );
        for cmd in &self.service.exec_start {
            check_line("ExecStart", cmd)?;
            writeln!(r, "ExecStart={cmd}")?;
        }
        if !self.install.wanted_by.is_empty() {
            r.push_str("\n[Install]\n");
            for target in &self.install.wanted_by {
                check_word("WantedBy", target)?;
            }
            writeln!(r, "WantedBy={}", self.install.wanted_by.join(" "))?;
        }
        Ok(r)
    }
}

/// Render all units, then write them; a malformed descriptor fails the
/// whole set before anything lands on disk.
#[context("Writing systemd units")]
pub(crate) fn write_units(unit_dir: &Dir, units: &[ServiceUnit]) -> Result<()> {
    let rendered = units
        .iter()
        .map(|u| {
            let content = u
                .render()
                .with_context(|| format!("Rendering {}", u.name))?;
            Ok((u.name.as_str(), content))
        })
        .collect::<Result<Vec<_>>>()?;
    for (name, content) in rendered {
        unit_dir.atomic_write(name, content)?;
    }
    Ok(())
}
