//! The hosted-engine answer file.
//!
//! The document is kept as an ordered list of `key -> typed value` entries and only turned into
//! the `key=type:value` text the deployment tool reads on [`AnswerFile::render`] and
//! [`AnswerFile::finalize`]. Values that are only known later in the setup flow start out as
//! placeholders carrying their sentinel text and are replaced by exact key match.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::settings::Settings;

/// First line of every answer file.
pub const SECTION_HEADER: &str = "[environment:default]";

/// Keys which are filled in by the setup flow.
pub mod keys {
    pub const ADMIN_PASSWORD: &str = "OVEHOSTED_ENGINE/adminPassword";
    pub const BRIDGE_IF: &str = "OVEHOSTED_NETWORK/bridgeIf";
    pub const FQDN: &str = "OVEHOSTED_NETWORK/fqdn";
    pub const GATEWAY: &str = "OVEHOSTED_NETWORK/gateway";
    pub const VM_DOMAIN: &str = "OVEHOSTED_VM/cloudinitInstanceDomainName";
    pub const VM_HOSTNAME: &str = "OVEHOSTED_VM/cloudinitInstanceHostName";
    pub const VM_ROOT_PASSWORD: &str = "OVEHOSTED_VM/cloudinitRootPwd";
    pub const VM_STATIC_CIDR: &str = "OVEHOSTED_VM/cloudinitVMStaticCIDR";

    pub const DOMAIN_TYPE: &str = "OVEHOSTED_STORAGE/domainType";
    pub const LUN_ID: &str = "OVEHOSTED_STORAGE/LunID";
    pub const HE_LUN_ID: &str = "OVEHOSTED_STORAGE/hostedEngineLUNID";
    pub const STORAGE_CONNECTION: &str = "OVEHOSTED_STORAGE/storageDomainConnection";
    pub const ISCSI_DISCOVER_USER: &str = "OVEHOSTED_STORAGE/iSCSIDiscoverUser";
    pub const ISCSI_DISCOVER_PASSWORD: &str = "OVEHOSTED_STORAGE/iSCSIDiscoverPassword";
    pub const ISCSI_PORTAL_USER: &str = "OVEHOSTED_STORAGE/iSCSIPortalUser";
    pub const ISCSI_PORTAL_PASSWORD: &str = "OVEHOSTED_STORAGE/iSCSIPortalPassword";
    pub const ISCSI_PORTAL_ADDRESS: &str = "OVEHOSTED_STORAGE/iSCSIPortalIPAddress";
    pub const ISCSI_PORTAL_PORT: &str = "OVEHOSTED_STORAGE/iSCSIPortalPort";
    pub const ISCSI_TARGET_NAME: &str = "OVEHOSTED_STORAGE/iSCSITargetName";
}

/// Storage backend for the hosted-engine storage domain.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Fc,
    Nfs,
    Iscsi,
}

serde_plain::derive_display_from_serialize!(StorageKind);
serde_plain::derive_fromstr_from_deserialize!(StorageKind);

/// Type tag of a value, as written in front of the `:` in the answer file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Str,
    Bool,
    Int,
    None,
}

impl ValueKind {
    pub fn tag(self) -> &'static str {
        match self {
            ValueKind::Str => "str",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::None => "none",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "str" => Some(ValueKind::Str),
            "bool" => Some(ValueKind::Bool),
            "int" => Some(ValueKind::Int),
            "none" => Some(ValueKind::None),
            _ => None,
        }
    }

    /// Converts operator supplied text into a value of this kind.
    fn value_from(self, raw: &str) -> Option<AnswerValue> {
        match self {
            ValueKind::Str => Some(AnswerValue::Str(raw.to_owned())),
            ValueKind::Bool => match raw {
                "True" => Some(AnswerValue::Bool(true)),
                "False" => Some(AnswerValue::Bool(false)),
                _ => None,
            },
            ValueKind::Int => raw.parse().ok().map(AnswerValue::Int),
            ValueKind::None => (raw == "None").then_some(AnswerValue::None),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnswerValue {
    Str(String),
    Bool(bool),
    Int(i64),
    None,
    /// Not known yet, rendered as its sentinel text.
    Placeholder { kind: ValueKind, sentinel: String },
}

impl AnswerValue {
    pub fn str(value: impl Into<String>) -> Self {
        AnswerValue::Str(value.into())
    }

    pub fn placeholder(sentinel: &str) -> Self {
        AnswerValue::Placeholder {
            kind: ValueKind::Str,
            sentinel: sentinel.to_owned(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, AnswerValue::Placeholder { .. })
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Str(s) => write!(f, "str:{s}"),
            AnswerValue::Bool(true) => write!(f, "bool:True"),
            AnswerValue::Bool(false) => write!(f, "bool:False"),
            AnswerValue::Int(i) => write!(f, "int:{i}"),
            AnswerValue::None => write!(f, "none:None"),
            AnswerValue::Placeholder { kind, sentinel } => write!(f, "{}:{sentinel}", kind.tag()),
        }
    }
}

/// Possible errors while building or reading an answer file.
///
/// Apart from [`AnswerError::Parse`], all of these indicate a mismatch between the templates
/// and the setup flow and are not recoverable by the operator.
#[derive(Debug, PartialEq)]
pub enum AnswerError {
    DuplicateKey(String),
    StorageAlreadySet(StorageKind),
    MissingKey(String),
    NotAPlaceholder(String),
    ConflictingValue { key: String, current: String },
    InvalidValue { key: String, value: String },
    Unresolved(Vec<String>),
    Parse { line: usize, reason: String },
}

impl fmt::Display for AnswerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use AnswerError::*;
        match self {
            DuplicateKey(key) => write!(f, "key '{key}' is already present"),
            StorageAlreadySet(kind) => {
                write!(f, "storage template '{kind}' has already been appended")
            }
            MissingKey(key) => write!(f, "placeholder key '{key}' is not present"),
            NotAPlaceholder(key) => write!(f, "key '{key}' is not a placeholder"),
            ConflictingValue { key, current } => {
                write!(f, "key '{key}' was already substituted with '{current}'")
            }
            InvalidValue { key, value } => write!(f, "invalid value '{value}' for key '{key}'"),
            Unresolved(keys) => write!(f, "unresolved placeholders: {}", keys.join(", ")),
            Parse { line, reason } => write!(f, "line {line}: {reason}"),
        }
    }
}

impl std::error::Error for AnswerError {}

#[derive(Clone, Debug, PartialEq)]
struct Entry {
    key: String,
    value: AnswerValue,
    /// Set for entries created as a placeholder, kept after substitution.
    sentinel: Option<String>,
}

/// Value of a key in one of the storage templates.
enum Template {
    Str(&'static str),
    Placeholder(&'static str),
}

const FC_TEMPLATE: &[(&str, Template)] = &[
    (keys::DOMAIN_TYPE, Template::Str("fc")),
    (keys::LUN_ID, Template::Placeholder("LunID_value")),
    (keys::HE_LUN_ID, Template::Placeholder("LunID_value")),
];

const NFS_TEMPLATE: &[(&str, Template)] = &[
    (keys::DOMAIN_TYPE, Template::Str("nfs")),
    ("OVEHOSTED_STORAGE/nfsVersion", Template::Str("auto")),
    ("OVEHOSTED_STORAGE/mntOptions", Template::Str("")),
    (
        keys::STORAGE_CONNECTION,
        Template::Placeholder("nfsServer_value:nfsPath_value"),
    ),
];

const ISCSI_TEMPLATE: &[(&str, Template)] = &[
    (keys::DOMAIN_TYPE, Template::Str("iscsi")),
    (
        keys::ISCSI_DISCOVER_USER,
        Template::Placeholder("iSCSIDiscoverUser_value"),
    ),
    (
        keys::ISCSI_DISCOVER_PASSWORD,
        Template::Placeholder("iSCSIDiscoverPassword_value"),
    ),
    (
        keys::ISCSI_PORTAL_USER,
        Template::Placeholder("iSCSIPortalUser_value"),
    ),
    (
        keys::ISCSI_PORTAL_PASSWORD,
        Template::Placeholder("iSCSIPortalPassword_value"),
    ),
    (
        keys::ISCSI_PORTAL_ADDRESS,
        Template::Placeholder("iSCSIPortalIPAddress_value"),
    ),
    (
        keys::ISCSI_PORTAL_PORT,
        Template::Placeholder("iSCSIPortalPort_value"),
    ),
    ("OVEHOSTED_STORAGE/iSCSIPortal", Template::Str("1")),
    (
        keys::ISCSI_TARGET_NAME,
        Template::Placeholder("iSCSITargetName_value"),
    ),
    (keys::LUN_ID, Template::Placeholder("LunID_value")),
    (keys::HE_LUN_ID, Template::Placeholder("LunID_value")),
];

/// Sentinels written by [`AnswerFile::init_base`].
const BASE_SENTINELS: &[&str] = &[
    "adminPassword_value",
    "bridgeIf_value",
    "fqdn_value",
    "gateway_value",
    "domain_value",
    "rootPwd_value",
    "staticCIDR_value",
];

fn storage_template(kind: StorageKind) -> &'static [(&'static str, Template)] {
    match kind {
        StorageKind::Fc => FC_TEMPLATE,
        StorageKind::Nfs => NFS_TEMPLATE,
        StorageKind::Iscsi => ISCSI_TEMPLATE,
    }
}

/// Whether `text` is one of the sentinels any template can produce.
fn is_known_sentinel(text: &str) -> bool {
    BASE_SENTINELS.contains(&text)
        || [FC_TEMPLATE, NFS_TEMPLATE, ISCSI_TEMPLATE]
            .iter()
            .flat_map(|template| template.iter())
            .any(|(_, value)| matches!(value, Template::Placeholder(s) if *s == text))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnswerFile {
    entries: Vec<Entry>,
    storage: Option<StorageKind>,
}

impl AnswerFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Storage backend whose template has been appended, if any.
    pub fn storage_kind(&self) -> Option<StorageKind> {
        self.storage
    }

    pub fn get(&self, key: &str) -> Option<&AnswerValue> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    /// Appends a new entry. Keys must be unique.
    pub fn push(&mut self, key: &str, value: AnswerValue) -> Result<(), AnswerError> {
        if self.get(key).is_some() {
            return Err(AnswerError::DuplicateKey(key.to_owned()));
        }

        let sentinel = match &value {
            AnswerValue::Placeholder { sentinel, .. } => Some(sentinel.clone()),
            _ => None,
        };

        self.entries.push(Entry {
            key: key.to_owned(),
            value,
            sentinel,
        });
        Ok(())
    }

    /// Writes the baseline keys every deployment needs, independent of the storage backend.
    pub fn init_base(&mut self, settings: &Settings) -> Result<(), AnswerError> {
        use AnswerValue as V;

        let memory = i64::try_from(settings.vm_memory_mb).map_err(|_| AnswerError::InvalidValue {
            key: "OVEHOSTED_VM/vmMemSizeMB".to_owned(),
            value: settings.vm_memory_mb.to_string(),
        })?;

        let base = [
            ("OVEHOSTED_CORE/deployProceed", V::Bool(true)),
            ("OVEHOSTED_CORE/screenProceed", V::Bool(true)),
            (keys::ADMIN_PASSWORD, V::placeholder("adminPassword_value")),
            (
                "OVEHOSTED_ENGINE/clusterName",
                V::str(&settings.cluster_name),
            ),
            (
                "OVEHOSTED_ENGINE/datacenterName",
                V::str(&settings.datacenter_name),
            ),
            ("OVEHOSTED_ENGINE/enableHcGlusterService", V::None),
            ("OVEHOSTED_ENGINE/insecureSSL", V::None),
            ("OVEHOSTED_NETWORK/bridgeName", V::str(&settings.bridge_name)),
            (keys::BRIDGE_IF, V::placeholder("bridgeIf_value")),
            (keys::FQDN, V::placeholder("fqdn_value")),
            (keys::GATEWAY, V::placeholder("gateway_value")),
            ("OVEHOSTED_NETWORK/network_test", V::str("dns")),
            ("OVEHOSTED_NOTIF/destEmail", V::str(&settings.notify_email)),
            (
                "OVEHOSTED_NOTIF/smtpPort",
                V::str(settings.smtp_port.to_string()),
            ),
            ("OVEHOSTED_NOTIF/smtpServer", V::str(&settings.smtp_server)),
            ("OVEHOSTED_NOTIF/sourceEmail", V::str(&settings.notify_email)),
            (
                "OVEHOSTED_STORAGE/storageDomainName",
                V::str(&settings.storage_domain_name),
            ),
            (
                "OVEHOSTED_STORAGE/imgSizeGB",
                V::str(settings.image_size_gb.to_string()),
            ),
            ("OVEHOSTED_VM/automateVMShutdown", V::Bool(true)),
            ("OVEHOSTED_VM/cloudInitISO", V::str("generate")),
            ("OVEHOSTED_VM/cloudinitExecuteEngineSetup", V::Bool(true)),
            (keys::VM_DOMAIN, V::placeholder("domain_value")),
            (keys::VM_HOSTNAME, V::placeholder("fqdn_value")),
            (keys::VM_ROOT_PASSWORD, V::placeholder("rootPwd_value")),
            ("OVEHOSTED_VM/cloudinitVMETCHOSTS", V::Bool(true)),
            (keys::VM_STATIC_CIDR, V::placeholder("staticCIDR_value")),
            ("OVEHOSTED_VM/cloudinitVMTZ", V::str(&settings.timezone)),
            ("OVEHOSTED_VM/rootSshAccess", V::str("yes")),
            ("OVEHOSTED_VM/vmMemSizeMB", V::Int(memory)),
            ("OVEHOSTED_VM/vmVCpus", V::str(settings.vm_vcpus.to_string())),
        ];

        for (key, value) in base {
            self.push(key, value)?;
        }
        Ok(())
    }

    /// Appends the key block of one storage backend. Only one backend can be configured.
    pub fn append_storage_template(&mut self, kind: StorageKind) -> Result<(), AnswerError> {
        if let Some(current) = self.storage {
            return Err(AnswerError::StorageAlreadySet(current));
        }

        let template = storage_template(kind);
        if let Some((key, _)) = template.iter().find(|(key, _)| self.get(key).is_some()) {
            return Err(AnswerError::DuplicateKey((*key).to_owned()));
        }

        for (key, value) in template {
            let value = match value {
                Template::Str(s) => AnswerValue::str(*s),
                Template::Placeholder(s) => AnswerValue::placeholder(s),
            };
            self.push(key, value)?;
        }

        self.storage = Some(kind);
        Ok(())
    }

    /// Replaces the placeholder stored under exactly `key` with `value`.
    ///
    /// Other keys sharing the same sentinel text are left alone. Repeating a substitution with
    /// the same value is a no-op, a different value is rejected.
    pub fn substitute(&mut self, key: &str, value: &str) -> Result<(), AnswerError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.key == key)
            .ok_or_else(|| AnswerError::MissingKey(key.to_owned()))?;

        if entry.sentinel.is_none() {
            return Err(AnswerError::NotAPlaceholder(key.to_owned()));
        }

        let kind = match &entry.value {
            AnswerValue::Placeholder { kind, .. } => *kind,
            AnswerValue::Str(_) => ValueKind::Str,
            AnswerValue::Bool(_) => ValueKind::Bool,
            AnswerValue::Int(_) => ValueKind::Int,
            AnswerValue::None => ValueKind::None,
        };
        let new = kind
            .value_from(value)
            .ok_or_else(|| AnswerError::InvalidValue {
                key: key.to_owned(),
                value: value.to_owned(),
            })?;

        if entry.value.is_placeholder() {
            entry.value = new;
            Ok(())
        } else if entry.value == new {
            Ok(())
        } else {
            Err(AnswerError::ConflictingValue {
                key: key.to_owned(),
                current: entry.value.to_string(),
            })
        }
    }

    /// Keys which still hold their placeholder, in document order.
    pub fn unresolved(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.value.is_placeholder())
            .map(|e| e.key.as_str())
            .collect()
    }

    /// Renders the document as is, placeholders included. Used for the in-progress file.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(64 * (self.entries.len() + 1));
        out.push_str(SECTION_HEADER);
        out.push('\n');
        for entry in &self.entries {
            out.push_str(&format!("{}={}\n", entry.key, entry.value));
        }
        out
    }

    /// Renders the complete document for the deployment tool.
    ///
    /// Fails if any placeholder has not been substituted yet.
    pub fn finalize(&self) -> Result<String, AnswerError> {
        let unresolved = self.unresolved();
        if !unresolved.is_empty() {
            return Err(AnswerError::Unresolved(
                unresolved.into_iter().map(ToOwned::to_owned).collect(),
            ));
        }
        Ok(self.render())
    }

    /// Reads an answer file back, e.g. to validate one written by an earlier run.
    ///
    /// Values matching one of the known sentinels are treated as unresolved placeholders.
    pub fn parse(text: &str) -> Result<Self, AnswerError> {
        let mut answer = Self::new();
        let mut seen_header = false;

        for (index, line) in text.lines().enumerate() {
            let lineno = index + 1;
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if !seen_header {
                if line != SECTION_HEADER {
                    return Err(AnswerError::Parse {
                        line: lineno,
                        reason: format!("expected '{SECTION_HEADER}'"),
                    });
                }
                seen_header = true;
                continue;
            }

            let parse_err = |reason: &str| AnswerError::Parse {
                line: lineno,
                reason: reason.to_owned(),
            };

            let (key, typed) = line
                .split_once('=')
                .ok_or_else(|| parse_err("missing '='"))?;
            if !key.contains('/') {
                return Err(parse_err("key is missing its namespace"));
            }
            let (tag, raw) = typed
                .split_once(':')
                .ok_or_else(|| parse_err("missing type tag"))?;
            let kind = ValueKind::from_tag(tag).ok_or_else(|| parse_err("unknown type tag"))?;

            let value = if kind == ValueKind::Str && is_known_sentinel(raw) {
                AnswerValue::placeholder(raw)
            } else {
                kind.value_from(raw)
                    .ok_or_else(|| parse_err("value does not match its type tag"))?
            };

            answer.push(key, value).map_err(|err| AnswerError::Parse {
                line: lineno,
                reason: err.to_string(),
            })?;
        }

        if !seen_header {
            return Err(AnswerError::Parse {
                line: 0,
                reason: "empty answer file".to_owned(),
            });
        }

        answer.storage = match answer.get(keys::DOMAIN_TYPE) {
            Some(AnswerValue::Str(kind)) => kind.parse().ok(),
            _ => None,
        };

        Ok(answer)
    }
}

impl FromStr for AnswerFile {
    type Err = AnswerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
