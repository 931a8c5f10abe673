pub mod command;
pub mod utils;

/// Lock file guarding against concurrent setup sessions on the same host.
pub const SESSION_LOCK_FILE: &str = "/run/rutilvm/engine-setup.lock";

/// Default location of the optional settings file.
pub const DEFAULT_SETTINGS_FILE: &str = "/etc/rutilvm/engine-setup.toml";

/// Default location of the answer file handed to the deployment tool.
pub const DEFAULT_ANSWER_FILE: &str = "/etc/ovirt-hosted-engine/rutilvm-answers.conf";

pub const DEFAULT_LOG_FILE: &str = "/var/log/rutilvm/engine-setup.log";

/// Name of the external hosted-engine deployment executable.
pub const DEPLOY_TOOL: &str = "hosted-engine";

/// Default TCP port of an iSCSI portal.
pub const ISCSI_DEFAULT_PORT: u16 = 3260;
