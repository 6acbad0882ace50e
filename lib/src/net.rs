//! Discovery of the default gateway.
//!
//! When installing from an ephemeral registry, the registry runs on the
//! virtualization host, which from inside the guest is reachable as the
//! default gateway. The gateway is also our signal that networking is
//! up at all, so this is queried on every retry attempt.

use std::process::Command;

use anyhow::{Context, Result};
use fn_error_context::context;
use reprovision_utils::CommandRunExt;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Route {
    #[serde(default)]
    dst: String,
    #[serde(default)]
    gateway: Option<String>,
}

fn default_gateway_from(routes: &[Route]) -> Option<&str> {
    // `ip` sorts by metric; take the first default entry with a gateway.
    routes
        .iter()
        .find(|r| r.dst == "default" && r.gateway.is_some())
        .and_then(|r| r.gateway.as_deref())
}

/// Query the current default route's gateway address. Returns `None`
/// while no default route exists (e.g. the network is not up yet).
#[context("Querying default route")]
pub(crate) fn default_gateway() -> Result<Option<String>> {
    let out = Command::new("ip")
        .args(["-j", "route", "show", "default"])
        .run_get_string()?;
    if out.is_empty() {
        return Ok(None);
    }
    let routes: Vec<Route> = serde_json::from_str(&out).context("Parsing ip route output")?;
    Ok(default_gateway_from(&routes).map(ToOwned::to_owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Vec<Route> {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_default_route() {
        let routes = parse(indoc::indoc! { r#"
            [{"dst":"default","gateway":"10.0.2.2","dev":"enp1s0","protocol":"dhcp","prefsrc":"10.0.2.15","metric":100,"flags":[]}]
        "# });
        assert_eq!(default_gateway_from(&routes), Some("10.0.2.2"));
    }

    #[test]
    fn test_no_default_route() {
        assert_eq!(default_gateway_from(&[]), None);
        // A link-scope default (no gateway) doesn't count.
        let routes = parse(r#"[{"dst":"default","dev":"tun0","scope":"link"}]"#);
        assert_eq!(default_gateway_from(&routes), None);
    }

    #[test]
    fn test_multiple_defaults() {
        let routes = parse(indoc::indoc! { r#"
            [{"dst":"default","dev":"tun0","scope":"link"},
             {"dst":"default","gateway":"192.168.122.1","dev":"enp1s0","metric":100},
             {"dst":"default","gateway":"192.168.1.1","dev":"wlp3s0","metric":600}]
        "# });
        assert_eq!(default_gateway_from(&routes), Some("192.168.122.1"));
    }
}
