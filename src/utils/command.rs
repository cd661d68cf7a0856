//! Thin wrapper around `std::process::Command` for the host tools we shell out to.

use anyhow::{bail, Context, Result};
use log::debug;
use std::process::{Command, Output};

/// Run a command to completion and fail with its stderr when it exits non-zero.
pub fn run_checked(cmd: &mut Command) -> Result<Output> {
    let program = cmd.get_program().to_string_lossy().to_string();
    debug!("Running {:?}", cmd);

    let output = cmd
        .output()
        .with_context(|| format!("{} command not found - please install {}", program, program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        match output.status.code() {
            Some(code) if stderr.is_empty() => bail!("{} exited with status {}", program, code),
            Some(code) => bail!("{} exited with status {}: {}", program, code, stderr),
            None => bail!("{} was terminated by a signal", program),
        }
    }

    Ok(output)
}
