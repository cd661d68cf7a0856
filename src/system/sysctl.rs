//! Runtime kernel network tuning
//!
//! Values are written with `sysctl -w` and last until the next reboot.

use anyhow::Result;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;
use thiserror::Error;

use crate::utils::command::run_checked;

/// One kernel parameter that could not be set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuneFailure {
    pub key: String,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for TuneFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} ({})", self.key, self.value, self.reason)
    }
}

#[derive(Debug, Error)]
#[error("{} kernel tunable(s) not applied: {}", .failures.len(), join_failures(.failures))]
pub struct TuneError {
    pub failures: Vec<TuneFailure>,
}

fn join_failures(failures: &[TuneFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Live kernel parameter interface
#[cfg_attr(test, mockall::automock)]
pub trait Tuner {
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

pub struct SysctlTuner;

impl Tuner for SysctlTuner {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        run_checked(
            Command::new("sysctl")
                .arg("-w")
                .arg(format!("{}={}", key, value)),
        )?;
        Ok(())
    }
}

pub struct NetworkTuner<'a> {
    tuner: &'a dyn Tuner,
}

impl<'a> NetworkTuner<'a> {
    pub fn new(tuner: &'a dyn Tuner) -> Self {
        Self { tuner }
    }

    /// Apply every tunable, carrying on past individual failures
    pub fn apply_tunables(&self, tunables: &BTreeMap<String, String>) -> Result<(), TuneError> {
        let mut failures = Vec::new();

        for (key, value) in tunables {
            match self.tuner.set(key, value) {
                Ok(()) => info!("Set {} = {}", key, value),
                Err(e) => {
                    warn!("Could not set {} = {}: {:#}", key, value, e);
                    failures.push(TuneFailure {
                        key: key.clone(),
                        value: value.clone(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TuneError { failures })
        }
    }
}
