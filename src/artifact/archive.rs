use anyhow::Result;
use std::path::Path;
use std::process::Command;

use crate::utils::command::run_checked;

/// Unpacks a release archive into a directory
#[cfg_attr(test, mockall::automock)]
pub trait Archiver {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()>;
}

/// gzipped tarball extraction with system tar
pub struct TarArchiver;

impl Archiver for TarArchiver {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        run_checked(
            Command::new("tar")
                .arg("--no-same-owner")
                .arg("-xzf")
                .arg(archive)
                .arg("-C")
                .arg(dest),
        )?;
        Ok(())
    }
}
