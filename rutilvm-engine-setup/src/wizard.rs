//! The interactive setup flow.
//!
//! Each step reads what it needs from the operator and the host, and substitutes the results
//! into the answer file held by the [`SetupSession`]. The in-progress document is written after
//! every step, so an interrupted session leaves a file showing how far it got.

use std::{
    net::{IpAddr, Ipv6Addr},
    path::PathBuf,
};

use anyhow::{Result, bail};
use log::{info, warn};

use rutilvm_installer_common::utils::{CidrAddress, Fqdn, is_valid_address};

use crate::{
    answer::{AnswerFile, StorageKind, keys},
    deploy::write_answer_file,
    discovery::{LunParser, LunRecord, parse_exports, parse_targets},
    select::{Prompt, SelectMode, Selection, ask_choice, ask_until, select_one},
    settings::Settings,
    system::{ChapCredentials, IscsiPortal, SystemAccess},
};

/// State carried through the setup steps.
pub struct SetupSession {
    pub settings: Settings,
    pub answer: AnswerFile,
    /// Where the document is persisted, `None` keeps it in memory only.
    answer_path: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// All placeholders are resolved and the final document has been written.
    Done,
    /// The operator cancelled, the partial document is left as is.
    Aborted,
}

/// How a storage step ended.
enum StepResult {
    Continue,
    Abort,
}

impl SetupSession {
    pub fn new(settings: Settings, answer_path: Option<PathBuf>) -> Self {
        Self {
            settings,
            answer: AnswerFile::new(),
            answer_path,
        }
    }

    fn persist(&self) -> Result<()> {
        match &self.answer_path {
            Some(path) => write_answer_file(path, &self.answer.render()),
            None => Ok(()),
        }
    }

    fn substitute(&mut self, key: &str, value: &str) -> Result<()> {
        self.answer.substitute(key, value)?;
        Ok(())
    }
}

/// Runs the whole setup flow.
///
/// Returns [`Outcome::Aborted`] if the operator cancels at a point where cancelling is offered.
/// Every other failure, including the operator choosing to exit, is an error.
pub fn run(
    session: &mut SetupSession,
    prompt: &mut dyn Prompt,
    system: &mut dyn SystemAccess,
) -> Result<Outcome> {
    session.answer.init_base(&session.settings)?;
    session.persist()?;

    info!("Collecting credentials");
    credentials_step(session, prompt)?;
    session.persist()?;

    info!("Collecting engine network settings");
    network_step(session, prompt, system)?;
    session.persist()?;

    info!("Configuring hosted-engine storage");
    if let StepResult::Abort = storage_step(session, prompt, system)? {
        session.persist()?;
        warn!("Setup aborted by operator");
        return Ok(Outcome::Aborted);
    }

    let text = session.answer.finalize()?;
    if let Some(path) = &session.answer_path {
        write_answer_file(path, &text)?;
        info!("Answer file written to {}", path.display());
    }

    Ok(Outcome::Done)
}

fn non_empty(answer: &str) -> Result<String, String> {
    if answer.is_empty() {
        Err("Value must not be empty.".to_owned())
    } else {
        Ok(answer.to_owned())
    }
}

fn ip_address(answer: &str) -> Result<IpAddr, String> {
    if !is_valid_address(answer) {
        return Err(format!("'{answer}' is not a valid IP address."));
    }
    // the address check lets single hex groups through as IPv6
    answer
        .parse()
        .map_err(|err| format!("'{answer}' is not usable as address: {err}"))
}

/// Like [`ip_address`], but keeps the address as typed.
fn valid_address(answer: &str) -> Result<String, String> {
    ip_address(answer).map(|_| answer.to_owned())
}

fn credentials_step(session: &mut SetupSession, prompt: &mut dyn Prompt) -> Result<()> {
    let admin = match &session.settings.admin_password {
        Some(password) => password.clone(),
        None => ask_until(prompt, "Engine admin password: ", non_empty)?,
    };
    session.substitute(keys::ADMIN_PASSWORD, &admin)?;

    let root = match &session.settings.root_password {
        Some(password) => password.clone(),
        None => ask_until(prompt, "Engine VM root password: ", non_empty)?,
    };
    session.substitute(keys::VM_ROOT_PASSWORD, &root)
}

fn network_step(
    session: &mut SetupSession,
    prompt: &mut dyn Prompt,
    system: &mut dyn SystemAccess,
) -> Result<()> {
    let fqdn = ask_until(prompt, "Engine VM FQDN: ", |answer| {
        Fqdn::from(answer).map_err(|err| format!("Invalid FQDN '{answer}': {err}"))
    })?;

    let addr = ask_until(prompt, "Engine VM static IP address: ", ip_address)?;
    let cidr = ask_until(prompt, "Prefix length: ", |answer| {
        let mask = answer
            .parse::<usize>()
            .map_err(|_| format!("'{answer}' is not a prefix length."))?;
        CidrAddress::new(addr, mask).map_err(|err| err.to_string())
    })?;

    let gateway = ask_until(prompt, "Gateway address: ", valid_address)?;

    let nics = match system.network_interfaces() {
        Ok(nics) => nics,
        Err(err) => {
            warn!("Could not list network interfaces: {err:#}");
            Vec::new()
        }
    };
    let bridge_if = if nics.is_empty() {
        ask_until(prompt, "Interface for the management bridge: ", non_empty)?
    } else {
        match select_one(prompt, "Network interfaces:", &nics, SelectMode::Strict)? {
            Selection::Chosen(index) => nics[index].clone(),
            Selection::Abort => bail!("no network interface selected"),
        }
    };

    session.substitute(keys::FQDN, &fqdn.to_string())?;
    session.substitute(keys::VM_HOSTNAME, &fqdn.to_string())?;
    session.substitute(keys::VM_DOMAIN, &fqdn.domain())?;
    session.substitute(keys::VM_STATIC_CIDR, &cidr.to_string())?;
    session.substitute(keys::GATEWAY, &gateway)?;
    session.substitute(keys::BRIDGE_IF, &bridge_if)
}

fn storage_step(
    session: &mut SetupSession,
    prompt: &mut dyn Prompt,
    system: &mut dyn SystemAccess,
) -> Result<StepResult> {
    let choice = ask_choice(
        prompt,
        "Storage type for the engine VM (fc, nfs, iscsi): ",
        &["fc", "nfs", "iscsi"],
    )?;
    let kind: StorageKind = choice.parse()?;

    session.answer.append_storage_template(kind)?;
    session.persist()?;
    info!("Using {kind} storage");

    match kind {
        StorageKind::Fc => fc_step(session, prompt, system),
        StorageKind::Nfs => nfs_step(session, prompt, system),
        StorageKind::Iscsi => iscsi_step(session, prompt, system),
    }
}

fn substitute_lun(session: &mut SetupSession, lun: &LunRecord) -> Result<()> {
    info!("Selected LUN {} ({})", lun.id, lun.size);
    session.substitute(keys::LUN_ID, &lun.id)?;
    session.substitute(keys::HE_LUN_ID, &lun.id)
}

fn fc_step(
    session: &mut SetupSession,
    prompt: &mut dyn Prompt,
    system: &mut dyn SystemAccess,
) -> Result<StepResult> {
    let lun = choose_lun(prompt, system)?;
    substitute_lun(session, &lun)?;
    Ok(StepResult::Continue)
}

/// Lists the multipath LUNs and lets the operator pick one.
///
/// As long as none are found, the operator can rescan or exit, exiting is an error.
fn choose_lun(prompt: &mut dyn Prompt, system: &mut dyn SystemAccess) -> Result<LunRecord> {
    let parser = LunParser::new()?;

    loop {
        let topology = system.multipath_topology().unwrap_or_else(|err| {
            warn!("multipath listing failed: {err:#}");
            String::new()
        });
        let luns = parser.parse(&topology);

        if luns.is_empty() {
            prompt.say("No LUNs found.");
            match ask_choice(prompt, "1) Rescan  2) Exit: ", &["1", "2"])?.as_str() {
                "1" => {
                    if let Err(err) = system.rescan_luns() {
                        warn!("LUN rescan failed: {err:#}");
                    }
                    continue;
                }
                _ => bail!("no LUN available, setup cancelled"),
            }
        }

        match select_one(prompt, "Available LUNs:", &luns, SelectMode::Strict)? {
            Selection::Chosen(index) => return Ok(luns[index].clone()),
            Selection::Abort => bail!("no LUN selected"),
        }
    }
}

/// `server:path` as expected for an NFS storage domain, with IPv6 servers in brackets.
fn nfs_connection(server: &str, path: &str) -> String {
    if server.parse::<Ipv6Addr>().is_ok() {
        format!("[{server}]:{path}")
    } else {
        format!("{server}:{path}")
    }
}

fn nfs_step(
    session: &mut SetupSession,
    prompt: &mut dyn Prompt,
    system: &mut dyn SystemAccess,
) -> Result<StepResult> {
    let server = ask_until(prompt, "NFS server address: ", valid_address)?;

    let export = loop {
        let listing = system.list_exports(&server).unwrap_or_else(|err| {
            warn!("export listing of {server} failed: {err:#}");
            String::new()
        });
        let exports = parse_exports(&listing, true);

        if exports.is_empty() {
            prompt.say(&format!("No exports found on {server}."));
            match ask_choice(prompt, "1) Retry  2) Exit: ", &["1", "2"])?.as_str() {
                "1" => continue,
                _ => return Ok(StepResult::Abort),
            }
        }

        match select_one(prompt, "Available exports:", &exports, SelectMode::AllowAbort)? {
            Selection::Chosen(index) => break exports[index].path.clone(),
            Selection::Abort => return Ok(StepResult::Abort),
        }
    };

    info!("Selected export {export} on {server}");
    session.substitute(keys::STORAGE_CONNECTION, &nfs_connection(&server, &export))?;
    Ok(StepResult::Continue)
}

/// Asks for an optional CHAP user and, if one is given, its password.
fn ask_chap(prompt: &mut dyn Prompt, purpose: &str) -> Result<Option<ChapCredentials>> {
    let username = prompt.ask(&format!("{purpose} user (empty for none): "))?;
    if username.is_empty() {
        return Ok(None);
    }

    let password = ask_until(prompt, &format!("{purpose} password: "), non_empty)?;
    Ok(Some(ChapCredentials { username, password }))
}

fn iscsi_step(
    session: &mut SetupSession,
    prompt: &mut dyn Prompt,
    system: &mut dyn SystemAccess,
) -> Result<StepResult> {
    let discovery_chap = ask_chap(prompt, "iSCSI discovery")?;
    let login_chap = ask_chap(prompt, "iSCSI portal")?;

    for (chap, user_key, password_key) in [
        (
            &discovery_chap,
            keys::ISCSI_DISCOVER_USER,
            keys::ISCSI_DISCOVER_PASSWORD,
        ),
        (&login_chap, keys::ISCSI_PORTAL_USER, keys::ISCSI_PORTAL_PASSWORD),
    ] {
        let (user, password) = chap
            .as_ref()
            .map(|c| (c.username.as_str(), c.password.as_str()))
            .unwrap_or_default();
        session.substitute(user_key, user)?;
        session.substitute(password_key, password)?;
    }

    let address = ask_until(prompt, "iSCSI portal address: ", valid_address)?;
    let default_port = session.settings.iscsi_port;
    let port = ask_until(
        prompt,
        &format!("iSCSI portal port [{default_port}]: "),
        |answer| match answer {
            "" => Ok(default_port),
            _ => match answer.parse::<u16>() {
                Ok(port) if port != 0 => Ok(port),
                _ => Err(format!("'{answer}' is not a valid port.")),
            },
        },
    )?;

    session.substitute(keys::ISCSI_PORTAL_ADDRESS, &address)?;
    session.substitute(keys::ISCSI_PORTAL_PORT, &port.to_string())?;
    session.persist()?;

    let portal = IscsiPortal {
        address,
        port,
        discovery_chap,
        login_chap,
    };

    let target = loop {
        let listing = system.discover_targets(&portal).unwrap_or_else(|err| {
            warn!("target discovery on {} failed: {err:#}", portal.endpoint());
            String::new()
        });
        let targets = parse_targets(&listing);

        if targets.is_empty() {
            prompt.say(&format!("No targets found on {}.", portal.endpoint()));
            match ask_choice(prompt, "1) Retry  2) Exit: ", &["1", "2"])?.as_str() {
                "1" => continue,
                _ => bail!("no iSCSI target available, setup cancelled"),
            }
        }

        match select_one(prompt, "Available targets:", &targets, SelectMode::Strict)? {
            Selection::Chosen(index) => break targets[index].clone(),
            Selection::Abort => bail!("no iSCSI target selected"),
        }
    };

    info!("Logging into {target} at {}", portal.endpoint());
    system.login_target(&portal, &target)?;
    session.substitute(keys::ISCSI_TARGET_NAME, &target)?;
    session.persist()?;

    let lun = choose_lun(prompt, system)?;
    substitute_lun(session, &lun)?;
    Ok(StepResult::Continue)
}
