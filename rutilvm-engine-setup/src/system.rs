//! Access to the host: storage discovery tools, iSCSI sessions and network interfaces.

use std::{fs, net::Ipv6Addr};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;

use rutilvm_installer_common::command::run_output;

const SCSI_HOST_DIR: &str = "/sys/class/scsi_host";

/// CHAP user name and secret.
#[derive(Clone, Debug, PartialEq)]
pub struct ChapCredentials {
    pub username: String,
    pub password: String,
}

/// An iSCSI portal together with the credentials used for it.
#[derive(Clone, Debug, PartialEq)]
pub struct IscsiPortal {
    pub address: String,
    pub port: u16,
    pub discovery_chap: Option<ChapCredentials>,
    pub login_chap: Option<ChapCredentials>,
}

impl IscsiPortal {
    /// `address:port` as understood by `iscsiadm`, with IPv6 addresses in brackets.
    pub fn endpoint(&self) -> String {
        if self.address.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Everything the setup flow needs from the host it runs on.
///
/// Discovery methods return the raw tool output, the parsers in [`crate::discovery`] turn it
/// into records.
pub trait SystemAccess {
    /// Multipath topology listing, as printed by `multipath -ll`.
    fn multipath_topology(&mut self) -> Result<String>;

    /// Asks the SCSI hosts to rescan their buses and reloads the multipath maps.
    fn rescan_luns(&mut self) -> Result<()>;

    /// Export listing of an NFS server, as printed by `showmount -e`.
    fn list_exports(&mut self, server: &str) -> Result<String>;

    /// Runs a sendtargets discovery against `portal` and returns the node listing.
    fn discover_targets(&mut self, portal: &IscsiPortal) -> Result<String>;

    fn login_target(&mut self, portal: &IscsiPortal, target: &str) -> Result<()>;

    /// Names of the network interfaces, without loopback.
    fn network_interfaces(&mut self) -> Result<Vec<String>>;
}

/// [`SystemAccess`] backed by the actual system tools.
pub struct HostSystem;

#[derive(Deserialize)]
struct IpLink {
    ifname: String,
}

impl HostSystem {
    fn update_node(endpoint: &str, target: &str, name: &str, value: &str) -> Result<()> {
        run_output(
            "iscsiadm",
            &[
                "-m", "node", "-T", target, "-p", endpoint, "-o", "update", "-n", name, "-v",
                value,
            ],
        )
        .map(|_| ())
        .with_context(|| format!("could not set {name} for {target}"))
    }

    fn discoverydb(endpoint: &str, extra: &[&str]) -> Result<String> {
        let mut args = vec!["-m", "discoverydb", "-t", "sendtargets", "-p", endpoint];
        args.extend_from_slice(extra);
        run_output("iscsiadm", &args)
    }
}

impl SystemAccess for HostSystem {
    fn multipath_topology(&mut self) -> Result<String> {
        run_output("multipath", &["-ll"])
    }

    fn rescan_luns(&mut self) -> Result<()> {
        let hosts = fs::read_dir(SCSI_HOST_DIR)
            .with_context(|| format!("could not list {SCSI_HOST_DIR}"))?;

        for host in hosts {
            let scan = host?.path().join("scan");
            if let Err(err) = fs::write(&scan, "- - -") {
                warn!("rescan of {} failed: {err}", scan.display());
            }
        }

        run_output("multipath", &["-r"]).map(|_| ())
    }

    fn list_exports(&mut self, server: &str) -> Result<String> {
        run_output("showmount", &["-e", server])
    }

    fn discover_targets(&mut self, portal: &IscsiPortal) -> Result<String> {
        let endpoint = portal.endpoint();

        match &portal.discovery_chap {
            None => {
                run_output(
                    "iscsiadm",
                    &["-m", "discovery", "-t", "sendtargets", "-p", &endpoint],
                )?;
            }
            Some(chap) => {
                Self::discoverydb(&endpoint, &["-o", "new"])?;
                for (name, value) in [
                    ("discovery.sendtargets.auth.authmethod", "CHAP"),
                    ("discovery.sendtargets.auth.username", chap.username.as_str()),
                    ("discovery.sendtargets.auth.password", chap.password.as_str()),
                ] {
                    Self::discoverydb(&endpoint, &["-o", "update", "-n", name, "-v", value])
                        .with_context(|| format!("could not set {name} for {endpoint}"))?;
                }
                Self::discoverydb(&endpoint, &["--discover"])?;
            }
        }

        run_output("iscsiadm", &["-m", "node", "-p", &endpoint, "-P", "1"])
    }

    fn login_target(&mut self, portal: &IscsiPortal, target: &str) -> Result<()> {
        let endpoint = portal.endpoint();

        if let Some(chap) = &portal.login_chap {
            for (name, value) in [
                ("node.session.auth.authmethod", "CHAP"),
                ("node.session.auth.username", chap.username.as_str()),
                ("node.session.auth.password", chap.password.as_str()),
            ] {
                Self::update_node(&endpoint, target, name, value)?;
            }
        }

        match run_output(
            "iscsiadm",
            &["-m", "node", "-T", target, "-p", &endpoint, "--login"],
        ) {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("already present") => {
                info!("session to {target} at {endpoint} already exists");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("login to {target} failed")),
        }
    }

    fn network_interfaces(&mut self) -> Result<Vec<String>> {
        let output = run_output("ip", &["-j", "link"])?;
        parse_ip_links(&output)
    }
}

/// Interface names from `ip -j link` output, loopback excluded.
pub fn parse_ip_links(json: &str) -> Result<Vec<String>> {
    let links: Vec<IpLink> =
        serde_json::from_str(json).context("could not parse 'ip -j link' output")?;

    Ok(links
        .into_iter()
        .map(|link| link.ifname)
        .filter(|name| name != "lo")
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal(address: &str) -> IscsiPortal {
        IscsiPortal {
            address: address.to_owned(),
            port: 3260,
            discovery_chap: None,
            login_chap: None,
        }
    }

    #[test]
    fn portal_endpoint() {
        assert_eq!(portal("192.168.0.30").endpoint(), "192.168.0.30:3260");
        assert_eq!(portal("fd00::30").endpoint(), "[fd00::30]:3260");
    }

    #[test]
    fn ip_links() {
        let json = r#"[
            {"ifindex":1,"ifname":"lo","flags":["LOOPBACK","UP","LOWER_UP"],"mtu":65536},
            {"ifindex":2,"ifname":"eno1","flags":["BROADCAST","MULTICAST","UP"],"mtu":1500},
            {"ifindex":3,"ifname":"ens2f0","flags":["BROADCAST","MULTICAST"],"mtu":9000}
        ]"#;
        assert_eq!(parse_ip_links(json).unwrap(), vec!["eno1", "ens2f0"]);
        assert!(parse_ip_links("not json").is_err());
        assert!(parse_ip_links("[]").unwrap().is_empty());
    }
}
