use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use anyhow::{Result, bail, format_err};
use log::info;
use rutilvm_installer_common::{DEFAULT_ANSWER_FILE, ISCSI_DEFAULT_PORT};
use serde::Deserialize;

/// Site defaults for the engine deployment, read from an optional TOML file.
///
/// Every field has a default, so an empty or missing file is valid. Passwords are only taken
/// from here if present, otherwise the operator is asked for them.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Settings {
    pub cluster_name: String,
    pub datacenter_name: String,
    pub vm_memory_mb: u64,
    pub vm_vcpus: u32,
    pub timezone: String,
    pub storage_domain_name: String,
    pub image_size_gb: u64,
    pub bridge_name: String,
    pub notify_email: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub admin_password: Option<String>,
    pub root_password: Option<String>,
    pub iscsi_port: u16,
    /// Where the answer file is written to.
    pub answer_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster_name: "Default".to_owned(),
            datacenter_name: "Default".to_owned(),
            vm_memory_mb: 16384,
            vm_vcpus: 4,
            timezone: "Asia/Seoul".to_owned(),
            storage_domain_name: "hosted_storage".to_owned(),
            image_size_gb: 80,
            bridge_name: "ovirtmgmt".to_owned(),
            notify_email: "root@localhost".to_owned(),
            smtp_server: "localhost".to_owned(),
            smtp_port: 25,
            admin_password: None,
            root_password: None,
            iscsi_port: ISCSI_DEFAULT_PORT,
            answer_file: PathBuf::from(DEFAULT_ANSWER_FILE),
        }
    }
}

impl Settings {
    pub fn try_from_reader(mut reader: impl Read) -> Result<Self> {
        let mut buffer = String::new();
        reader.read_to_string(&mut buffer)?;

        let settings: Settings = toml::from_str(&buffer)
            .map_err(|err| format_err!("Failed parsing settings file: {err}"))?;
        settings.verify()?;
        Ok(settings)
    }

    /// Loads the settings file at `path`.
    ///
    /// A missing file falls back to the defaults, unless the path was given explicitly by the
    /// operator.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        match fs::File::open(path) {
            Ok(file) => {
                info!("Loading settings from {path:?}");
                Self::try_from_reader(file)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound && !explicit => {
                info!("No settings file at {path:?}, using defaults");
                Ok(Self::default())
            }
            Err(err) => bail!("Opening settings file {path:?} failed: {err}"),
        }
    }

    fn verify(&self) -> Result<()> {
        if self.cluster_name.is_empty() {
            bail!("'cluster-name' must not be empty");
        }
        if self.datacenter_name.is_empty() {
            bail!("'datacenter-name' must not be empty");
        }
        if self.storage_domain_name.is_empty() {
            bail!("'storage-domain-name' must not be empty");
        }
        if self.vm_memory_mb == 0 || self.vm_memory_mb > i64::MAX as u64 {
            bail!("'vm-memory-mb' is out of range");
        }
        if self.vm_vcpus == 0 {
            bail!("'vm-vcpus' must be at least 1");
        }
        if self.iscsi_port == 0 {
            bail!("'iscsi-port' must not be 0");
        }
        if matches!(&self.admin_password, Some(pw) if pw.is_empty()) {
            bail!("'admin-password' must not be empty if set");
        }
        if matches!(&self.root_password, Some(pw) if pw.is_empty()) {
            bail!("'root-password' must not be empty if set");
        }
        Ok(())
    }
}
