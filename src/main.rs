mod artifact;
mod config;
mod system;
mod utils;
mod workflow;

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use nix::unistd::Uid;
use std::path::Path;

use crate::artifact::archive::TarArchiver;
use crate::artifact::fetch::CurlFetcher;
use crate::config::loader::{load_config, CONFIG_PATH};
use crate::config::structs::ProvisionConfig;
use crate::system::config_init::{BinaryGenerator, ConfigOutcome};
use crate::system::service::SystemctlController;
use crate::system::sysctl::SysctlTuner;
use crate::utils::privilege::ensure_administrative;
use crate::workflow::{completion_message, Host, StepError, Workflow};

#[derive(Parser)]
#[command(name = "yeager-installer")]
#[command(version)]
#[command(about = "Install the yeager proxy server as a systemd service", long_about = None)]
struct Cli {}

/// Root check first, so an unprivileged caller never gets as far as reading
/// host configuration
fn prepare(euid: Uid, config_path: &Path) -> Result<ProvisionConfig> {
    ensure_administrative(euid)?;
    load_config(config_path)
}

fn main() -> Result<()> {
    utils::logger::init();

    let _cli = Cli::parse();

    let config = match prepare(Uid::effective(), Path::new(CONFIG_PATH)) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let generator = BinaryGenerator::new(config.service.generator_args.clone());
    let host = Host {
        fetcher: &CurlFetcher,
        archiver: &TarArchiver,
        generator: &generator,
        controller: &SystemctlController,
        tuner: &SysctlTuner,
    };

    let report = match Workflow::new(&config, host).run() {
        Ok(report) => report,
        Err(aborted) => {
            error!("{}", aborted);
            if !matches!(aborted.source, StepError::Permission(_)) {
                error!("Fix the problem above and run the installer again.");
            }
            std::process::exit(1);
        }
    };

    info!(
        "Installed {} (sha256 {})",
        report.artifact.path.display(),
        report.artifact.sha256
    );
    if report.config == ConfigOutcome::Generated {
        info!("Generated configuration at {}", config.config_path().display());
    }
    if !report.tuning_warnings.is_empty() {
        warn!("The service is running, but kernel tuning is incomplete:");
        for failure in &report.tuning_warnings {
            warn!("  {}", failure);
        }
    }
    info!("  Status: systemctl status {}", config.unit_name());
    info!("  Logs:   journalctl -u {} -f", config.unit_name());

    println!("{}", completion_message(config.service.port));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::privilege::PermissionError;
    use std::fs;

    #[test]
    fn test_non_root_is_refused_before_config_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[service\nport = ").unwrap();

        let err = prepare(Uid::from_raw(1000), &path).unwrap_err();

        assert_eq!(
            err.downcast_ref::<PermissionError>(),
            Some(&PermissionError { uid: 1000 })
        );
    }

    #[test]
    fn test_root_loads_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[service]\nport = 443\n").unwrap();

        let config = prepare(Uid::from_raw(0), &path).unwrap();
        assert_eq!(config.service.port, 443);

        fs::write(&path, "[service\nport = ").unwrap();
        assert!(prepare(Uid::from_raw(0), &path).is_err());
    }
}
