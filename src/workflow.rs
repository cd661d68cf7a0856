//! The provisioning sequence
//!
//! Privilege check, artifact install, config, service registration and
//! kernel tuning run strictly in that order. The first fatal error stops the
//! run and is reported together with the last stage that completed. Nothing
//! is rolled back: every stage converges when the tool is simply run again.

use log::{info, warn};
use nix::unistd::Uid;
use std::fmt;
use std::io;
use thiserror::Error;

use crate::artifact::archive::Archiver;
use crate::artifact::fetch::{release_url, Fetcher};
use crate::artifact::{ArtifactInstaller, InstallError, InstalledArtifact};
use crate::config::structs::ProvisionConfig;
use crate::system::config_init::{ConfigError, ConfigGenerator, ConfigInitializer, ConfigOutcome};
use crate::system::service::{ServiceController, ServiceError, ServiceRegistrar, UnitDescriptor};
use crate::system::sysctl::{NetworkTuner, TuneFailure, Tuner};
use crate::utils::privilege::{ensure_administrative, PermissionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    PrivilegeChecked,
    ArtifactInstalled,
    ConfigReady,
    ServiceRegistered,
    Tuned,
    Done,
}

impl Stage {
    /// The stage that is attempted once `self` has completed
    pub fn next(self) -> Stage {
        match self {
            Stage::Start => Stage::PrivilegeChecked,
            Stage::PrivilegeChecked => Stage::ArtifactInstalled,
            Stage::ArtifactInstalled => Stage::ConfigReady,
            Stage::ConfigReady => Stage::ServiceRegistered,
            Stage::ServiceRegistered => Stage::Tuned,
            Stage::Tuned | Stage::Done => Stage::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::PrivilegeChecked => "privilege check",
            Stage::ArtifactInstalled => "artifact install",
            Stage::ConfigReady => "configuration",
            Stage::ServiceRegistered => "service registration",
            Stage::Tuned => "network tuning",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("creating download staging directory failed: {0}")]
    Staging(#[source] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Terminal failure state of a run
#[derive(Debug, Error)]
#[error("{} failed: {}", .last_completed.next(), .source)]
pub struct Aborted {
    pub last_completed: Stage,
    #[source]
    pub source: StepError,
}

impl Aborted {
    fn at<E: Into<StepError>>(last_completed: Stage) -> impl FnOnce(E) -> Aborted {
        move |e| Aborted {
            last_completed,
            source: e.into(),
        }
    }
}

/// Outcome of a completed run
#[derive(Debug)]
pub struct Report {
    /// Last stage reached; `Done` for every completed run
    pub stage: Stage,
    pub artifact: InstalledArtifact,
    pub config: ConfigOutcome,
    /// Kernel tunables that could not be applied; the install itself succeeded
    pub tuning_warnings: Vec<TuneFailure>,
}

/// The external commands a run drives
pub struct Host<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub archiver: &'a dyn Archiver,
    pub generator: &'a dyn ConfigGenerator,
    pub controller: &'a dyn ServiceController,
    pub tuner: &'a dyn Tuner,
}

pub struct Workflow<'a> {
    config: &'a ProvisionConfig,
    host: Host<'a>,
    euid: Uid,
    target_arch: &'a str,
}

impl<'a> Workflow<'a> {
    pub fn new(config: &'a ProvisionConfig, host: Host<'a>) -> Self {
        Self {
            config,
            host,
            euid: Uid::effective(),
            target_arch: std::env::consts::ARCH,
        }
    }

    #[cfg(test)]
    pub fn with_identity(mut self, euid: Uid) -> Self {
        self.euid = euid;
        self
    }

    #[cfg(test)]
    pub fn with_target_arch(mut self, target_arch: &'a str) -> Self {
        self.target_arch = target_arch;
        self
    }

    pub fn run(&self) -> Result<Report, Aborted> {
        let config = self.config;
        let paths = &config.paths;

        let mut completed = Stage::Start;
        ensure_administrative(self.euid).map_err(Aborted::at(completed))?;
        completed = Stage::PrivilegeChecked;

        info!("=== Installing {} ===", config.service.name);
        let url = release_url(&config.release, self.target_arch).map_err(Aborted::at(completed))?;
        let staging = tempfile::Builder::new()
            .prefix("yeager-install-")
            .tempdir()
            .map_err(StepError::Staging)
            .map_err(Aborted::at(completed))?;
        let artifact = ArtifactInstaller::new(
            self.host.fetcher,
            self.host.archiver,
            &config.release.binary,
        )
        .install(&url, staging.path(), &paths.install_path)
        .map_err(Aborted::at(completed))?;
        drop(staging);
        completed = Stage::ArtifactInstalled;

        let outcome = ConfigInitializer::new(self.host.generator)
            .ensure_config(&paths.config_dir, &paths.config_file, &paths.install_path)
            .map_err(Aborted::at(completed))?;
        completed = Stage::ConfigReady;

        ServiceRegistrar::new(self.host.controller)
            .register_service(&paths.unit_path, &UnitDescriptor::from_config(config))
            .map_err(Aborted::at(completed))?;
        completed = Stage::ServiceRegistered;

        info!("Applying kernel network tunables...");
        let tuning_warnings = match NetworkTuner::new(self.host.tuner)
            .apply_tunables(&config.network.tunables)
        {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!("{}", e);
                e.failures
            }
        };
        completed = Stage::Tuned;

        info!("=== Installation Complete ===");
        Ok(Report {
            stage: completed.next(),
            artifact,
            config: outcome,
            tuning_warnings,
        })
    }
}

/// Reminder printed once the service is running
pub fn completion_message(port: u16) -> String {
    format!(
        "Installation finished, please update firewall and allow TCP port {}",
        port
    )
}
