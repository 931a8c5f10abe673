//! Writing the answer file to disk and handing it to the deployment tool.

use std::{
    fs::{self, File, Permissions},
    io::Write,
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use log::info;

use rutilvm_installer_common::{DEPLOY_TOOL, command::run_attached};

/// Answer files carry clear-text passwords and must only be readable by root.
const ANSWER_FILE_MODE: u32 = 0o600;

/// Copies an existing answer file at `path` to `<path>.<unix-seconds>.bak`, readable by the
/// owner only.
///
/// Returns the backup location, or `None` if there was nothing to back up.
pub fn backup_answer_file(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let mut backup = path.as_os_str().to_owned();
    backup.push(format!(".{secs}.bak"));
    let backup = PathBuf::from(backup);

    fs::copy(path, &backup)
        .with_context(|| format!("could not back up {} to {}", path.display(), backup.display()))?;
    fs::set_permissions(&backup, Permissions::from_mode(ANSWER_FILE_MODE))
        .with_context(|| format!("could not restrict access to {}", backup.display()))?;
    info!("Backed up existing answer file to {}", backup.display());

    Ok(Some(backup))
}

/// Writes `text` to `path` with owner-only permissions, creating the parent directory if needed.
pub fn write_answer_file(path: &Path, text: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("could not create {}", dir.display()))?;
    }

    let mut file = File::options()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(ANSWER_FILE_MODE)
        .open(path)
        .with_context(|| format!("could not open {}", path.display()))?;
    // mode() only applies on creation
    file.set_permissions(Permissions::from_mode(ANSWER_FILE_MODE))
        .with_context(|| format!("could not restrict access to {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("could not write {}", path.display()))
}

/// Runs the hosted-engine deployment with the answer file at `path`.
pub fn deploy(path: &Path) -> Result<()> {
    let config = format!("--config-append={}", path.display());
    info!("Starting '{DEPLOY_TOOL} --deploy {config}'");
    run_attached(DEPLOY_TOOL, &["--deploy", &config])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_existing_file() {
        let dir = std::env::temp_dir().join(format!("rutilvm-backup-{}", std::process::id()));
        let path = dir.join("answers.conf");

        assert_eq!(backup_answer_file(&path).unwrap(), None);

        write_answer_file(&path, "[environment:default]\n").unwrap();
        let backup = backup_answer_file(&path).unwrap().unwrap();

        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("answers.conf."));
        assert!(name.ends_with(".bak"));
        assert_eq!(fs::read_to_string(&backup).unwrap(), "[environment:default]\n");
        assert!(path.exists());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn answer_file_is_private() {
        let dir = std::env::temp_dir().join(format!("rutilvm-mode-{}", std::process::id()));
        let path = dir.join("answers.conf");
        let mode = |path: &Path| fs::metadata(path).unwrap().permissions().mode() & 0o777;

        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, "stale").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o644)).unwrap();

        write_answer_file(&path, "OVEHOSTED_ENGINE/adminPassword=str:pw\n").unwrap();
        assert_eq!(mode(&path), 0o600);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "OVEHOSTED_ENGINE/adminPassword=str:pw\n"
        );

        fs::set_permissions(&path, Permissions::from_mode(0o644)).unwrap();
        let backup = backup_answer_file(&path).unwrap().unwrap();
        assert_eq!(mode(&backup), 0o600);

        fs::remove_file(&path).unwrap();
        write_answer_file(&path, "[environment:default]\n").unwrap();
        assert_eq!(mode(&path), 0o600);

        let _ = fs::remove_dir_all(dir);
    }
}
