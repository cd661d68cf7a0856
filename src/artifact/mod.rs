//! Release artifact installation
//!
//! Downloads the release tarball, unpacks it in a scratch directory and swaps
//! the executable into its install path. The new binary is staged next to the
//! target and renamed over it, so an interrupted run never leaves a truncated
//! executable behind and a running copy is replaced without `ETXTBSY`.

pub mod archive;
pub mod fetch;

use log::{debug, info};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::artifact::archive::Archiver;
use crate::artifact::fetch::Fetcher;

/// Name the downloaded archive is stored under inside the scratch directory
const ARCHIVE_FILE: &str = "release.tar.gz";

/// Scratch subdirectory the archive is unpacked into
const UNPACK_DIR: &str = "unpacked";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("downloading {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("extracting release archive failed: {reason}")]
    Extract { reason: String },

    #[error("installing executable to {} failed: {}", .path.display(), .source)]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What ended up on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledArtifact {
    pub path: PathBuf,
    pub sha256: String,
}

pub struct ArtifactInstaller<'a> {
    fetcher: &'a dyn Fetcher,
    archiver: &'a dyn Archiver,
    binary: &'a str,
}

impl<'a> ArtifactInstaller<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, archiver: &'a dyn Archiver, binary: &'a str) -> Self {
        Self {
            fetcher,
            archiver,
            binary,
        }
    }

    /// Fetch, unpack and install the release executable at `install_path`
    pub fn install(
        &self,
        release_url: &str,
        tmp_dir: &Path,
        install_path: &Path,
    ) -> Result<InstalledArtifact, InstallError> {
        let archive = tmp_dir.join(ARCHIVE_FILE);
        info!("Downloading {}", release_url);
        self.fetcher
            .fetch(release_url, &archive)
            .map_err(|e| InstallError::Download {
                url: release_url.to_string(),
                reason: format!("{:#}", e),
            })?;

        let unpack_dir = tmp_dir.join(UNPACK_DIR);
        fs::create_dir_all(&unpack_dir).map_err(|e| InstallError::Extract {
            reason: format!("creating {}: {}", unpack_dir.display(), e),
        })?;

        debug!("Extracting {} into {}", archive.display(), unpack_dir.display());
        self.archiver
            .extract(&archive, &unpack_dir)
            .map_err(|e| InstallError::Extract {
                reason: format!("{:#}", e),
            })?;

        let extracted = unpack_dir.join(self.binary);
        match fs::symlink_metadata(&extracted) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(InstallError::Extract {
                    reason: format!("{} in the archive is not a regular file", self.binary),
                })
            }
            Err(_) => {
                return Err(InstallError::Extract {
                    reason: format!("archive does not contain {}", self.binary),
                })
            }
        }

        info!("Installing executable to {}", install_path.display());
        place_executable(&extracted, install_path).map_err(|source| InstallError::Copy {
            path: install_path.to_path_buf(),
            source,
        })?;

        let sha256 = calculate_file_hash(install_path).map_err(|source| InstallError::Copy {
            path: install_path.to_path_buf(),
            source,
        })?;

        Ok(InstalledArtifact {
            path: install_path.to_path_buf(),
            sha256,
        })
    }
}

/// Path the new executable is written to before the final rename
fn staged_path(install_path: &Path) -> PathBuf {
    let name = install_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    install_path.with_file_name(format!("{}.new", name))
}

fn place_executable(src: &Path, install_path: &Path) -> io::Result<()> {
    if let Some(parent) = install_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let staged = staged_path(install_path);
    let result = stage_and_rename(src, &staged, install_path);
    if result.is_err() {
        let _ = fs::remove_file(&staged);
    }
    result
}

fn stage_and_rename(src: &Path, staged: &Path, install_path: &Path) -> io::Result<()> {
    fs::copy(src, staged)?;
    fs::set_permissions(staged, fs::Permissions::from_mode(0o755))?;
    File::open(staged)?.sync_all()?;
    fs::rename(staged, install_path)
}

/// Calculate SHA256 hash of a file
fn calculate_file_hash(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::archive::MockArchiver;
    use crate::artifact::fetch::MockFetcher;
    use anyhow::anyhow;

    const URL: &str = "https://example.com/yeager-linux-amd64.tar.gz";

    fn fetcher_ok() -> MockFetcher {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_, dest| Ok(fs::write(dest, b"tarball")?));
        fetcher
    }

    fn archiver_with(content: &'static [u8]) -> MockArchiver {
        let mut archiver = MockArchiver::new();
        archiver
            .expect_extract()
            .returning(move |_, dest| Ok(fs::write(dest.join("yeager"), content)?));
        archiver
    }

    #[test]
    fn test_installs_executable() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let install_path = root.path().join("bin/yeager");

        let fetcher = fetcher_ok();
        let archiver = archiver_with(b"v2");
        let installed = ArtifactInstaller::new(&fetcher, &archiver, "yeager")
            .install(URL, tmp.path(), &install_path)
            .unwrap();

        assert_eq!(installed.path, install_path);
        assert_eq!(fs::read(&install_path).unwrap(), b"v2");
        let mode = fs::metadata(&install_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(!staged_path(&install_path).exists());
        assert_eq!(installed.sha256.len(), 64);
    }

    #[test]
    fn test_replaces_previous_executable() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let install_path = root.path().join("yeager");
        fs::write(&install_path, b"old build").unwrap();

        let fetcher = fetcher_ok();
        let archiver = archiver_with(b"new build");
        ArtifactInstaller::new(&fetcher, &archiver, "yeager")
            .install(URL, tmp.path(), &install_path)
            .unwrap();

        assert_eq!(fs::read(&install_path).unwrap(), b"new build");
    }

    #[test]
    fn test_download_failure_leaves_nothing_installed() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let install_path = root.path().join("yeager");

        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_, _| Err(anyhow!("curl exited with status 6")));
        let mut archiver = MockArchiver::new();
        archiver.expect_extract().never();

        let err = ArtifactInstaller::new(&fetcher, &archiver, "yeager")
            .install(URL, tmp.path(), &install_path)
            .unwrap_err();

        assert!(matches!(err, InstallError::Download { .. }));
        assert!(err.to_string().contains("curl exited with status 6"));
        assert!(!install_path.exists());
        assert!(!staged_path(&install_path).exists());
    }

    #[test]
    fn test_archive_without_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let install_path = root.path().join("yeager");

        let fetcher = fetcher_ok();
        let mut archiver = MockArchiver::new();
        archiver
            .expect_extract()
            .returning(|_, dest| Ok(fs::write(dest.join("README.md"), b"docs")?));

        let err = ArtifactInstaller::new(&fetcher, &archiver, "yeager")
            .install(URL, tmp.path(), &install_path)
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "extracting release archive failed: archive does not contain yeager"
        );
        assert!(!install_path.exists());
    }

    #[test]
    fn test_directory_in_place_of_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();

        let fetcher = fetcher_ok();
        let mut archiver = MockArchiver::new();
        archiver
            .expect_extract()
            .returning(|_, dest| Ok(fs::create_dir(dest.join("yeager"))?));

        let err = ArtifactInstaller::new(&fetcher, &archiver, "yeager")
            .install(URL, tmp.path(), &root.path().join("yeager"))
            .unwrap_err();
        assert!(err.to_string().contains("not a regular file"));
    }

    #[test]
    fn test_copy_failure_cleans_staged_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        // A non-empty directory at the install path makes the final rename fail
        let install_path = root.path().join("yeager");
        fs::create_dir(&install_path).unwrap();
        fs::write(install_path.join("keep"), b"x").unwrap();

        let fetcher = fetcher_ok();
        let archiver = archiver_with(b"v2");
        let err = ArtifactInstaller::new(&fetcher, &archiver, "yeager")
            .install(URL, tmp.path(), &install_path)
            .unwrap_err();

        assert!(matches!(err, InstallError::Copy { .. }));
        assert!(!staged_path(&install_path).exists());
    }

    #[test]
    fn test_file_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            calculate_file_hash(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
