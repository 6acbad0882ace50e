//! Bounded-retry image pull, the long-running half of the chain.
//!
//! This runs as the pull stage of the generated unit chain. At the time
//! the unit starts, the network may not be up, and with an ephemeral
//! registry the image may not have been pushed yet, so both address
//! resolution and the pull itself poll on a fixed budget. Exhausting
//! the budget must fail the unit; the install stage is gated on this
//! one succeeding.

use std::time::Duration;

use anyhow::{bail, Result};
use cap_std_ext::cap_std::fs::Dir;
use fn_error_context::context;

use crate::image::ImageTarget;
use crate::{net, podman, statefile};

/// Attempt ceiling and inter-attempt delay.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub(crate) attempts: u32,
    pub(crate) delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 120,
            delay: Duration::from_secs(1),
        }
    }
}

/// The host operations the retry loop drives. Split out as a trait so
/// the loop is testable without a routing table or container storage.
pub(crate) trait PullBackend {
    /// Current default-gateway address, or `None` while the network is
    /// not up.
    fn default_gateway(&self) -> Result<Option<String>>;

    /// Whether the image is already in local storage.
    fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull the image.
    fn pull(&self, image: &str, tls_verify: bool) -> Result<()>;

    /// Wait between attempts.
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Runs the real commands on the host.
#[derive(Debug)]
pub(crate) struct HostBackend;

impl PullBackend for HostBackend {
    fn default_gateway(&self) -> Result<Option<String>> {
        net::default_gateway()
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        podman::image_exists(image)
    }

    fn pull(&self, image: &str, tls_verify: bool) -> Result<()> {
        podman::pull(image, tls_verify)
    }
}

/// Poll until the image is available in local storage, persisting the
/// resolved image reference for the install stage as soon as the
/// gateway is known. An image that already exists locally succeeds
/// without a pull, so re-running this stage (e.g. after an interrupted
/// boot) is idempotent.
#[context("Pulling {image} with retries")]
pub(crate) fn pull_with_retry(
    backend: &impl PullBackend,
    run_dir: &Dir,
    image: &str,
    dist_port: Option<&str>,
    policy: &RetryPolicy,
) -> Result<()> {
    // A previous run of this stage may already have resolved the
    // reference; once written it is immutable for this boot.
    let mut target = statefile::read(run_dir)?.map(|reference| ImageTarget {
        tls_verify: dist_port.is_none(),
        reference,
    });
    for attempt in 1..=policy.attempts {
        if target.is_none() {
            match backend.default_gateway()? {
                Some(gateway) => {
                    let t = ImageTarget::new(&gateway, dist_port, image);
                    statefile::write(run_dir, &t.reference)?;
                    target = Some(t);
                }
                None => tracing::debug!("attempt {attempt}: no default route yet"),
            }
        }
        if let Some(t) = target.as_ref() {
            if backend.image_exists(&t.reference)? {
                tracing::debug!("{} already present", t.reference);
                return Ok(());
            }
            match backend.pull(&t.reference, t.tls_verify) {
                Ok(()) => return Ok(()),
                Err(e) => tracing::debug!("attempt {attempt}: {e:#}"),
            }
        }
        if attempt != policy.attempts {
            backend.sleep(policy.delay);
        }
    }
    bail!("Failed to pull {image} after {} attempts", policy.attempts);
}
