//! Configuration for the reprovisioning entrypoint.

use anyhow::{ensure, Context, Result};

/// Environment variable naming the container image to install.
const TARGET_IMAGE_VAR: &str = "BOOTC_TARGET_IMAGE";
/// Environment variable with the port of an ephemeral registry on the
/// default gateway. Unset or empty means the image is pulled from its
/// normal registry with TLS verification.
const DIST_PORT_VAR: &str = "BOOTC_CSTOR_DIST_PORT";

/// Validated configuration, populated once at startup.
#[derive(Debug, Clone)]
pub(crate) struct ReprovisionConfig {
    /// The bootc image to install on the system.
    pub(crate) target_image: String,

    /// Port of an ephemeral registry on the default gateway, if any.
    pub(crate) dist_port: Option<String>,
}

impl ReprovisionConfig {
    /// Load and validate configuration from the process environment.
    pub(crate) fn from_env() -> Result<Self> {
        let target_image = std::env::var(TARGET_IMAGE_VAR)
            .with_context(|| format!("Reading required environment variable {TARGET_IMAGE_VAR}"))?;
        // An empty value is the injector's way of saying "unset".
        let dist_port = std::env::var(DIST_PORT_VAR).ok().filter(|p| !p.is_empty());
        Self::new(target_image, dist_port)
    }

    pub(crate) fn new(target_image: String, dist_port: Option<String>) -> Result<Self> {
        ensure!(
            !target_image.is_empty(),
            "{TARGET_IMAGE_VAR} must not be empty"
        );
        // The reference is spliced into a unit ExecStart line.
        ensure!(
            !target_image.contains(char::is_whitespace),
            "Invalid whitespace in image reference: {target_image}"
        );
        if let Some(port) = dist_port.as_deref() {
            let _ = port
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .with_context(|| format!("Invalid registry port: {port}"))?;
        }
        Ok(Self {
            target_image,
            dist_port,
        })
    }
}
