//! Release download through the system curl binary

use anyhow::Result;
use std::path::Path;
use std::process::Command;

use crate::artifact::InstallError;
use crate::config::structs::ReleaseConfig;
use crate::utils::command::run_checked;

/// Retrieves a remote file into a local path
#[cfg_attr(test, mockall::automock)]
pub trait Fetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Downloader using system curl
pub struct CurlFetcher;

impl Fetcher for CurlFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        run_checked(
            Command::new("curl")
                .args([
                    "-sfL",               // silent, fail on HTTP errors, follow the release redirect
                    "--max-time", "300",
                    "-o",
                ])
                .arg(dest)
                .arg(url),
        )?;
        Ok(())
    }
}

/// Map a Rust target architecture onto the release asset naming
pub fn release_arch(target_arch: &str) -> Option<&'static str> {
    match target_arch {
        "x86_64" => Some("amd64"),
        "aarch64" => Some("arm64"),
        "arm" => Some("armv7"),
        _ => None,
    }
}

/// Build the download URL of the latest release for `target_arch`
pub fn release_url(release: &ReleaseConfig, target_arch: &str) -> Result<String, InstallError> {
    let arch = release_arch(target_arch).ok_or_else(|| InstallError::Download {
        url: format!("{}/{}", release.base_url, release.asset),
        reason: format!("no release is published for architecture {}", target_arch),
    })?;

    let asset = release.asset.replace("{arch}", arch);
    Ok(format!("{}/{}", release.base_url.trim_end_matches('/'), asset))
}
