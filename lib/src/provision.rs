//! Generation and activation of the reprovision chain.
//!
//! Everything here runs exactly once, in the injected entrypoint: write
//! the serial console autologin override, generate the pull and install
//! units, reload systemd and start the chain without waiting for it.
//! The chain outlives this process; its completion or failure is only
//! observable through systemd.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt;
use fn_error_context::context;

use crate::config::ReprovisionConfig;
use crate::statefile;
use crate::systemd::{
    self, InstallSection, ServiceSection, ServiceType, ServiceUnit, UnitSection,
};
use crate::task::Task;

/// Name of the pull stage unit.
pub(crate) const PULL_UNIT: &str = "bootc-reinstall-pull.service";
/// Name of the install stage unit.
pub(crate) const INSTALL_UNIT: &str = "bootc-reinstall.service";

const UNIT_DIR: &str = "/etc/systemd/system";
const AUTOLOGIN_DROPIN_DIR: &str = "serial-getty@ttyS0.service.d";

/// Root autologin on the serial console, for debugging an otherwise
/// credential-less instance while it reprovisions.
const AUTOLOGIN_CONF: &str = "[Service]\n\
ExecStart=\n\
ExecStart=-/usr/sbin/agetty --autologin root --noclear %I $TERM\n";

/// The privileged install command run by the install unit. `$BOOTC_IMAGE`
/// comes from the runtime state file written by the pull stage.
const INSTALL_EXEC: &str = "podman run --rm --privileged -v /dev:/dev -v /:/target -v /var/lib/containers:/var/lib/containers --pid=host --security-opt label=type:unconfined_t $BOOTC_IMAGE bootc install to-existing-root --skip-fetch-check";

fn pull_exec(exe: &str, config: &ReprovisionConfig) -> String {
    let mut cmd = format!("{exe} pull-image");
    if let Some(port) = config.dist_port.as_deref() {
        cmd.push_str(" --dist-port ");
        cmd.push_str(port);
    }
    cmd.push(' ');
    cmd.push_str(&config.target_image);
    cmd
}

/// The units making up the chain. `exe` is the absolute path the pull
/// unit uses to re-invoke this binary.
pub(crate) fn chain_units(exe: &str, config: &ReprovisionConfig) -> Vec<ServiceUnit> {
    let pull = ServiceUnit {
        name: PULL_UNIT.into(),
        unit: UnitSection {
            description: "Pull bootc container image with retries".into(),
            after: vec!["network-online.target".into()],
            // Starting this unit queues the install stage in the same
            // transaction; its After=/Requires= keep it gated on our
            // success.
            wants: vec!["network-online.target".into(), INSTALL_UNIT.into()],
            requires: Vec::new(),
        },
        service: ServiceSection {
            service_type: ServiceType::Oneshot,
            environment_file: None,
            exec_start: vec![pull_exec(exe, config)],
        },
        install: InstallSection {
            wanted_by: vec!["multi-user.target".into()],
        },
    };
    let install = ServiceUnit {
        name: INSTALL_UNIT.into(),
        unit: UnitSection {
            description: "Install bootc image to root and reboot".into(),
            after: vec![PULL_UNIT.into()],
            wants: Vec::new(),
            requires: vec![PULL_UNIT.into()],
        },
        service: ServiceSection {
            service_type: ServiceType::Oneshot,
            environment_file: Some(statefile::STATE_PATH.into()),
            // If the install fails the reboot is never reached and the
            // unit stays failed for inspection.
            exec_start: vec![INSTALL_EXEC.into(), "/usr/sbin/reboot".into()],
        },
        install: InstallSection {
            wanted_by: vec!["multi-user.target".into()],
        },
    };
    vec![pull, install]
}

/// Write the autologin drop-in and the chain units into `unit_dir`
/// (`/etc/systemd/system` outside of tests).
#[context("Generating reprovision units")]
pub(crate) fn generate(unit_dir: &Dir, exe: &str, config: &ReprovisionConfig) -> Result<()> {
    let units = chain_units(exe, config);
    systemd::write_units(unit_dir, &units)?;
    unit_dir
        .create_dir_all(AUTOLOGIN_DROPIN_DIR)
        .context("Creating autologin drop-in directory")?;
    unit_dir.atomic_write(
        format!("{AUTOLOGIN_DROPIN_DIR}/autologin.conf"),
        AUTOLOGIN_CONF,
    )?;
    Ok(())
}

/// Hand the chain to systemd without waiting for it.
#[context("Activating reprovision chain")]
pub(crate) fn activate_chain() -> Result<()> {
    Task::new("Reloading systemd", "systemctl")
        .args(["daemon-reload"])
        .run()?;
    Task::new("Starting reprovision chain", "systemctl")
        .args(["enable", "--now", "--no-block", PULL_UNIT])
        .run()
}

/// Entrypoint for `provision`.
pub(crate) fn run(config: &ReprovisionConfig) -> Result<()> {
    anyhow::ensure!(
        rustix::process::getuid().is_root(),
        "Must run as the root user"
    );
    let exe = std::env::current_exe().context("Resolving current executable")?;
    let exe = Utf8PathBuf::try_from(exe).context("Executable path is not UTF-8")?;
    let unit_dir = Dir::open_ambient_dir(UNIT_DIR, cap_std::ambient_authority())
        .with_context(|| format!("Opening {UNIT_DIR}"))?;
    generate(&unit_dir, exe.as_str(), config)?;
    activate_chain()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cap_std_ext::{cap_std, cap_tempfile};
    use indoc::indoc;

    use super::*;

    const EXE: &str = "/usr/local/bin/bootc-reprovision";

    fn config(dist_port: Option<&str>) -> ReprovisionConfig {
        ReprovisionConfig::new(
            "example/os:latest".into(),
            dist_port.map(ToOwned::to_owned),
        )
        .unwrap()
    }

    fn rendered(config: &ReprovisionConfig) -> HashMap<String, String> {
        chain_units(EXE, config)
            .into_iter()
            .map(|u| {
                let content = u.render().unwrap();
                (u.name, content)
            })
            .collect()
    }

    #[test]
    fn test_pull_unit_with_dist_port() {
        let units = rendered(&config(Some("5000")));
        similar_asserts::assert_eq!(
            units[PULL_UNIT],
            indoc! { "
                [Unit]
                Description=Pull bootc container image with retries
                After=network-online.target
                Wants=network-online.target bootc-reinstall.service

                [Service]
                Type=oneshot
                ExecStart=/usr/local/bin/bootc-reprovision pull-image --dist-port 5000 example/os:latest

                [Install]
                WantedBy=multi-user.target
            " }
        );
    }

    #[test]
    fn test_pull_unit_without_dist_port() {
        let units = rendered(&config(None));
        let pull = &units[PULL_UNIT];
        assert!(pull.contains(
            "ExecStart=/usr/local/bin/bootc-reprovision pull-image example/os:latest\n"
        ));
        assert!(!pull.contains("--dist-port"));
    }

    #[test]
    fn test_install_unit() {
        let units = rendered(&config(Some("5000")));
        similar_asserts::assert_eq!(
            units[INSTALL_UNIT],
            indoc! { "
                [Unit]
                Description=Install bootc image to root and reboot
                After=bootc-reinstall-pull.service
                Requires=bootc-reinstall-pull.service

                [Service]
                Type=oneshot
                EnvironmentFile=/run/bootc-container-target
                ExecStart=podman run --rm --privileged -v /dev:/dev -v /:/target -v /var/lib/containers:/var/lib/containers --pid=host --security-opt label=type:unconfined_t $BOOTC_IMAGE bootc install to-existing-root --skip-fetch-check
                ExecStart=/usr/sbin/reboot

                [Install]
                WantedBy=multi-user.target
            " }
        );
    }

    #[test]
    fn test_generate() -> anyhow::Result<()> {
        let dir = cap_tempfile::tempdir(cap_std::ambient_authority())?;
        generate(&dir, EXE, &config(Some("5000")))?;
        assert_eq!(dir.entries()?.count(), 3);
        similar_asserts::assert_eq!(
            dir.read_to_string(format!("{AUTOLOGIN_DROPIN_DIR}/autologin.conf"))?,
            indoc! { "
                [Service]
                ExecStart=
                ExecStart=-/usr/sbin/agetty --autologin root --noclear %I $TERM
            " }
        );
        assert!(dir.try_exists(PULL_UNIT)?);
        assert!(dir.try_exists(INSTALL_UNIT)?);
        Ok(())
    }

    /// Tiny model of systemd's job resolution, enough to check the
    /// chain's ordering: starting a unit queues its Wants=/Requires=
    /// closure, jobs run respecting After=, and a job whose Requires=
    /// dependency did not succeed is canceled instead of run. Units not
    /// in `units` (e.g. network-online.target) are treated as reached.
    fn simulate(units: &[ServiceUnit], start: &str, outcomes: &HashMap<&str, bool>) -> Vec<String> {
        let by_name: HashMap<&str, &ServiceUnit> =
            units.iter().map(|u| (u.name.as_str(), u)).collect();
        let mut queued = vec![start];
        let mut i = 0;
        while i < queued.len() {
            if let Some(u) = by_name.get(queued[i]) {
                for dep in u.unit.wants.iter().chain(&u.unit.requires) {
                    if by_name.contains_key(dep.as_str()) && !queued.contains(&dep.as_str()) {
                        queued.push(dep);
                    }
                }
            }
            i += 1;
        }
        // name -> whether it succeeded (canceled counts as failed)
        let mut finished: HashMap<&str, bool> = HashMap::new();
        let mut executed = Vec::new();
        loop {
            let runnable = queued.iter().copied().find(|name| {
                !finished.contains_key(name)
                    && by_name[name]
                        .unit
                        .after
                        .iter()
                        .all(|d| !queued.contains(&d.as_str()) || finished.contains_key(d.as_str()))
            });
            let Some(name) = runnable else { break };
            let deps_ok = by_name[name]
                .unit
                .requires
                .iter()
                .all(|d| finished.get(d.as_str()).copied().unwrap_or(true));
            if deps_ok {
                executed.push(name.to_string());
                finished.insert(name, outcomes.get(name).copied().unwrap_or(true));
            } else {
                finished.insert(name, false);
            }
        }
        executed
    }

    #[test]
    fn test_install_requires_successful_pull() {
        let units = chain_units(EXE, &config(Some("5000")));
        for start in [PULL_UNIT, INSTALL_UNIT] {
            for pull_ok in [true, false] {
                let outcomes = HashMap::from([(PULL_UNIT, pull_ok)]);
                let executed = simulate(&units, start, &outcomes);
                let ran_install = executed.iter().any(|u| u == INSTALL_UNIT);
                assert_eq!(
                    ran_install, pull_ok,
                    "start {start}, pull_ok {pull_ok}: {executed:?}"
                );
                if ran_install {
                    // Pull always executed first.
                    assert_eq!(executed[0], PULL_UNIT);
                }
            }
        }
    }
}
