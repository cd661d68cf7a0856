//! First-run configuration for the proxy
//!
//! The proxy writes its own configuration when started in generation mode.
//! We only ever trigger that when the configuration file is missing: an
//! existing file belongs to the operator and is left untouched.

use anyhow::Result;
use log::info;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::utils::command::run_checked;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("preparing config directory {} failed: {}", .path.display(), .source)]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config generator {} failed: {}", .binary.display(), .reason)]
    Generator { binary: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOutcome {
    AlreadyPresent,
    Generated,
}

/// Runs the proxy's built-in configuration generator
#[cfg_attr(test, mockall::automock)]
pub trait ConfigGenerator {
    fn generate(&self, binary: &Path, working_dir: &Path) -> Result<()>;
}

/// Invokes the installed binary with its generation arguments
pub struct BinaryGenerator {
    args: Vec<String>,
}

impl BinaryGenerator {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }
}

impl ConfigGenerator for BinaryGenerator {
    fn generate(&self, binary: &Path, working_dir: &Path) -> Result<()> {
        run_checked(
            Command::new(binary)
                .args(&self.args)
                .current_dir(working_dir),
        )?;
        Ok(())
    }
}

pub struct ConfigInitializer<'a> {
    generator: &'a dyn ConfigGenerator,
}

impl<'a> ConfigInitializer<'a> {
    pub fn new(generator: &'a dyn ConfigGenerator) -> Self {
        Self { generator }
    }

    /// Make sure `config_dir/config_file` exists, generating it with `binary` if not
    pub fn ensure_config(
        &self,
        config_dir: &Path,
        config_file: &str,
        binary: &Path,
    ) -> Result<ConfigOutcome, ConfigError> {
        let config_path = config_dir.join(config_file);
        let present = config_path
            .try_exists()
            .map_err(|source| ConfigError::Directory {
                path: config_dir.to_path_buf(),
                source,
            })?;

        if present {
            info!(
                "Keeping existing configuration at {}",
                config_path.display()
            );
            return Ok(ConfigOutcome::AlreadyPresent);
        }

        fs::create_dir_all(config_dir).map_err(|source| ConfigError::Directory {
            path: config_dir.to_path_buf(),
            source,
        })?;

        info!("Generating configuration in {}", config_dir.display());
        self.generator
            .generate(binary, config_dir)
            .map_err(|e| ConfigError::Generator {
                binary: binary.to_path_buf(),
                reason: format!("{:#}", e),
            })?;

        // A zero exit status does not guarantee the file was written
        if !config_path.exists() {
            return Err(ConfigError::Generator {
                binary: binary.to_path_buf(),
                reason: format!("{} was not created", config_path.display()),
            });
        }

        Ok(ConfigOutcome::Generated)
    }
}
