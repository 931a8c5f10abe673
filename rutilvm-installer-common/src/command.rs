//! Thin wrappers around [`std::process::Command`] for the OS utilities the
//! setup assistant drives (multipath, showmount, iscsiadm, ip, ...).

use std::{
    io,
    process::{Command, Stdio},
};

use anyhow::{Result, bail};
use log::debug;

/// Runs `program` with `args` and returns its stdout.
///
/// Fails if the program cannot be started or exits unsuccessfully, including
/// its stderr in the error message. The arguments may carry secrets and are
/// never logged or put into errors.
pub fn run_output(program: &str, args: &[&str]) -> Result<String> {
    debug!("running '{program}' with {} arguments", args.len());

    let output = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
    {
        Ok(output) => output,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            bail!("Could not find the '{program}' binary. Please install it.")
        }
        Err(err) => bail!("unexpected error when trying to execute '{program}' - {err}"),
    };

    if !output.status.success() {
        bail!(
            "'{program}' failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs `program` with `args`, attached to the terminal of the caller.
///
/// Used for long-running interactive tools whose output the operator should
/// see directly.
pub fn run_attached(program: &str, args: &[&str]) -> Result<()> {
    debug!("running attached '{program}' with {} arguments", args.len());

    match Command::new(program).args(args).status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => bail!("'{program}' exited with {status}"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            bail!("Could not find the '{program}' binary. Please install it.")
        }
        Err(err) => bail!("unexpected error when trying to execute '{program}' - {err}"),
    }
}
