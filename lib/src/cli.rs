//! Command line interface for the reprovisioning entrypoint.

use std::ffi::OsString;

use anyhow::{Context, Result};
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::Dir;
use clap::Parser;

use crate::config::ReprovisionConfig;
use crate::pull::{self, HostBackend, RetryPolicy};
use crate::{podman, provision, statefile};

/// Options for the pull stage.
#[derive(Debug, Parser)]
pub(crate) struct PullImageOpts {
    /// Port of an ephemeral registry on the default gateway. When set,
    /// the image is pulled from there without TLS verification.
    #[clap(long)]
    pub(crate) dist_port: Option<String>,

    /// The container image to pull.
    pub(crate) image: String,
}

/// Reprovision this system into a bootc container image.
///
/// Normally injected and invoked once on a freshly booted instance
/// (e.g. via cloud-init); generates and starts a systemd unit chain
/// which pulls the target image and installs it over the running root
/// before rebooting.
#[derive(Debug, Parser)]
#[clap(name = "bootc-reprovision")]
#[clap(rename_all = "kebab-case")]
pub(crate) enum Opt {
    /// Generate the reprovision unit chain and hand it to systemd.
    ///
    /// Reads the target image from the BOOTC_TARGET_IMAGE environment
    /// variable and the optional ephemeral registry port from
    /// BOOTC_CSTOR_DIST_PORT. Returns once the chain is started; the
    /// pull, install and reboot all happen asynchronously under
    /// systemd.
    Provision,
    /// Pull stage entrypoint, invoked by the generated unit.
    #[clap(hide = true)]
    PullImage(PullImageOpts),
}

/// Parse the provided arguments and execute.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args))
}

fn run_from_opt(opt: Opt) -> Result<()> {
    match opt {
        Opt::Provision => {
            let config = ReprovisionConfig::from_env().context("Loading configuration")?;
            provision::run(&config)
        }
        Opt::PullImage(opts) => pull_image(opts),
    }
}

fn pull_image(opts: PullImageOpts) -> Result<()> {
    podman::ensure_installed()?;
    let run_dir = Dir::open_ambient_dir(statefile::STATE_DIR, cap_std::ambient_authority())
        .with_context(|| format!("Opening {}", statefile::STATE_DIR))?;
    pull::pull_with_retry(
        &HostBackend,
        &run_dir,
        &opts.image,
        opts.dist_port.as_deref(),
        &RetryPolicy::default(),
    )
}

#[test]
fn test_parse_pull_image() {
    let o = Opt::try_parse_from([
        "bootc-reprovision",
        "pull-image",
        "--dist-port",
        "5000",
        "example/os:latest",
    ])
    .unwrap();
    let o = match o {
        Opt::PullImage(opts) => opts,
        o => panic!("Expected pull-image opts, not {o:?}"),
    };
    assert_eq!(o.dist_port.as_deref(), Some("5000"));
    assert_eq!(o.image, "example/os:latest");

    let o = Opt::try_parse_from(["bootc-reprovision", "pull-image", "example/os:latest"]).unwrap();
    match o {
        Opt::PullImage(opts) => assert!(opts.dist_port.is_none()),
        o => panic!("Expected pull-image opts, not {o:?}"),
    }
}
