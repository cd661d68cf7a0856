//! systemd registration for the proxy service

use anyhow::Result;
use log::info;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::config::structs::ProvisionConfig;
use crate::utils::command::run_checked;

/// Service manager calls made during registration, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Reload,
    Enable,
    Restart,
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceAction::Reload => "daemon-reload",
            ServiceAction::Enable => "enable",
            ServiceAction::Restart => "restart",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("writing unit file {} failed: {}", .path.display(), .source)]
    UnitWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("systemctl {action} {unit} failed: {reason}")]
    Control {
        action: ServiceAction,
        unit: String,
        reason: String,
    },
}

/// The host service manager
#[cfg_attr(test, mockall::automock)]
pub trait ServiceController {
    fn daemon_reload(&self) -> Result<()>;
    fn enable(&self, unit: &str) -> Result<()>;
    /// Start the unit, or restart it so a replaced executable is picked up
    fn restart(&self, unit: &str) -> Result<()>;
}

pub struct SystemctlController;

impl ServiceController for SystemctlController {
    fn daemon_reload(&self) -> Result<()> {
        run_checked(Command::new("systemctl").arg("daemon-reload"))?;
        Ok(())
    }

    fn enable(&self, unit: &str) -> Result<()> {
        run_checked(Command::new("systemctl").args(["enable", unit]))?;
        Ok(())
    }

    fn restart(&self, unit: &str) -> Result<()> {
        run_checked(Command::new("systemctl").args(["restart", unit]))?;
        Ok(())
    }
}

/// Contents of the `.service` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescriptor {
    pub description: String,
    pub documentation: String,
    pub after: String,
    pub exec_start: String,
    pub timeout_stop_sec: String,
    pub limit_nofile: u64,
    /// Adds `AmbientCapabilities=CAP_NET_BIND_SERVICE` instead of running as a privileged user
    pub bind_privileged_ports: bool,
    pub wanted_by: String,
}

impl UnitDescriptor {
    pub fn from_config(config: &ProvisionConfig) -> Self {
        let exec_start = format!(
            "{} {} {}",
            config.paths.install_path.display(),
            config.service.config_flag,
            config.config_path().display()
        );

        Self {
            description: config.service.description.clone(),
            documentation: config.service.documentation.clone(),
            after: "network.target".to_string(),
            exec_start,
            timeout_stop_sec: config.service.timeout_stop_sec.clone(),
            limit_nofile: config.service.limit_nofile,
            bind_privileged_ports: config.service.bind_privileged_ports,
            wanted_by: "multi-user.target".to_string(),
        }
    }

    pub fn render(&self) -> String {
        let mut unit = String::new();

        unit.push_str("[Unit]\n");
        unit.push_str(&format!("Description={}\n", self.description));
        if !self.documentation.is_empty() {
            unit.push_str(&format!("Documentation={}\n", self.documentation));
        }
        unit.push_str(&format!("After={}\n", self.after));

        unit.push_str("\n[Service]\n");
        unit.push_str(&format!("ExecStart={}\n", self.exec_start));
        unit.push_str(&format!("TimeoutStopSec={}\n", self.timeout_stop_sec));
        unit.push_str(&format!("LimitNOFILE={}\n", self.limit_nofile));
        if self.bind_privileged_ports {
            unit.push_str("# can bind privileged ports, e.g. 443\n");
            unit.push_str("AmbientCapabilities=CAP_NET_BIND_SERVICE\n");
        }

        unit.push_str("\n[Install]\n");
        unit.push_str(&format!("WantedBy={}\n", self.wanted_by));

        unit
    }
}

pub struct ServiceRegistrar<'a> {
    controller: &'a dyn ServiceController,
}

impl<'a> ServiceRegistrar<'a> {
    pub fn new(controller: &'a dyn ServiceController) -> Self {
        Self { controller }
    }

    /// Write the unit file and bring the service up.
    ///
    /// Nothing is rolled back on failure. The unit file stays on disk and the
    /// next run rewrites it and retries the systemctl calls.
    pub fn register_service(
        &self,
        unit_path: &Path,
        descriptor: &UnitDescriptor,
    ) -> Result<(), ServiceError> {
        info!("Creating systemd service: {}", unit_path.display());
        write_unit(unit_path, &descriptor.render()).map_err(|source| ServiceError::UnitWrite {
            path: unit_path.to_path_buf(),
            source,
        })?;

        let unit = unit_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let control_err = |action: ServiceAction| {
            let unit = unit.clone();
            move |e: anyhow::Error| ServiceError::Control {
                action,
                unit,
                reason: format!("{:#}", e),
            }
        };

        self.controller
            .daemon_reload()
            .map_err(control_err(ServiceAction::Reload))?;

        info!("Enabling {}", unit);
        self.controller
            .enable(&unit)
            .map_err(control_err(ServiceAction::Enable))?;

        info!("Starting {}", unit);
        self.controller
            .restart(&unit)
            .map_err(control_err(ServiceAction::Restart))?;

        Ok(())
    }
}

fn write_unit(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())
}
