use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

/// Everything the provisioning workflow touches on the host.
///
/// Every fixed location lives here instead of in the components so tests
/// can point the whole workflow at a scratch directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default)]
    pub release: ReleaseConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl ProvisionConfig {
    /// Name handed to systemctl, e.g. `yeager.service`
    pub fn unit_name(&self) -> String {
        self.paths
            .unit_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.service", self.service.name))
    }

    /// Full path of the proxy configuration file
    pub fn config_path(&self) -> PathBuf {
        self.paths.config_dir.join(&self.paths.config_file)
    }

    /// Reject values that would produce a broken install
    pub fn validate(&self) -> Result<()> {
        for (what, path) in [
            ("install_path", &self.paths.install_path),
            ("config_dir", &self.paths.config_dir),
            ("unit_path", &self.paths.unit_path),
        ] {
            if !path.is_absolute() {
                bail!("paths.{} must be absolute, got {}", what, path.display());
            }
        }

        let file = Path::new(&self.paths.config_file);
        if self.paths.config_file.is_empty() || file.components().count() != 1 {
            bail!(
                "paths.config_file must be a plain file name, got {:?}",
                self.paths.config_file
            );
        }

        // These end up verbatim on the unit's ExecStart= line
        for (what, value) in [
            ("paths.install_path", self.paths.install_path.to_string_lossy()),
            ("paths.config_dir", self.paths.config_dir.to_string_lossy()),
            ("paths.config_file", self.paths.config_file.as_str().into()),
            ("service.config_flag", self.service.config_flag.as_str().into()),
        ] {
            if let Some(c) = value.chars().find(|&c| !exec_safe(c)) {
                bail!(
                    "{} must not contain {:?} (it is written into the unit's ExecStart=), got {:?}",
                    what,
                    c,
                    value
                );
            }
        }
        for (what, value) in [
            ("service.description", &self.service.description),
            ("service.documentation", &self.service.documentation),
            ("service.timeout_stop_sec", &self.service.timeout_stop_sec),
        ] {
            if value.chars().any(char::is_control) {
                bail!("{} must be a single line, got {:?}", what, value);
            }
        }

        if self.release.binary.is_empty() {
            bail!("release.binary must not be empty");
        }

        if self.service.timeout_stop_sec.trim().is_empty() {
            bail!("service.timeout_stop_sec must not be empty");
        }

        // Anything at or below the usual soft default defeats the purpose
        if self.service.limit_nofile <= 1024 {
            bail!(
                "service.limit_nofile must be greater than 1024, got {}",
                self.service.limit_nofile
            );
        }

        for key in self.network.tunables.keys() {
            if !REQUIRED_TUNABLES.contains(&key.as_str()) {
                bail!(
                    "network.tunables only accepts {}, got {:?}",
                    REQUIRED_TUNABLES.join(" and "),
                    key
                );
            }
        }
        for key in REQUIRED_TUNABLES {
            match self.network.tunables.get(key) {
                Some(value) if !value.is_empty() && value.chars().all(exec_safe) => {}
                Some(value) => {
                    bail!("network.tunables.{:?} has an invalid value {:?}", key, value)
                }
                None => bail!("network.tunables is missing {:?}", key),
            }
        }

        Ok(())
    }
}

/// The kernel settings the proxy is tuned with; nothing else is applied
pub const REQUIRED_TUNABLES: [&str; 2] = [
    "net.core.default_qdisc",
    "net.ipv4.tcp_congestion_control",
];

/// Characters a unit file passes through ExecStart= unchanged
fn exec_safe(c: char) -> bool {
    !c.is_whitespace() && !c.is_control() && !matches!(c, '%' | '"' | '\'' | '\\' | ';')
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Directory URL that serves the latest release assets
    pub base_url: String,
    /// Asset file name; `{arch}` is replaced with the release architecture
    pub asset: String,
    /// Executable name inside the archive
    pub binary: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            base_url: "https://github.com/chenen3/yeager/releases/latest/download".to_string(),
            asset: "yeager-linux-{arch}.tar.gz".to_string(),
            binary: "yeager".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub install_path: PathBuf,
    pub config_dir: PathBuf,
    pub config_file: String,
    pub unit_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            install_path: PathBuf::from("/usr/local/bin/yeager"),
            config_dir: PathBuf::from("/usr/local/etc/yeager"),
            config_file: "server.json".to_string(),
            unit_path: PathBuf::from("/etc/systemd/system/yeager.service"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub description: String,
    pub documentation: String,
    /// TCP port the generated server config listens on (firewall reminder only)
    pub port: u16,
    /// Arguments that put the binary into config generation mode
    pub generator_args: Vec<String>,
    /// Flag passed before the config path in ExecStart
    pub config_flag: String,
    pub timeout_stop_sec: String,
    pub limit_nofile: u64,
    /// Grant CAP_NET_BIND_SERVICE so the proxy can listen on ports below 1024
    pub bind_privileged_ports: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "yeager".to_string(),
            description: "yeager".to_string(),
            documentation: "https://github.com/chenen3/yeager".to_string(),
            port: 57175,
            generator_args: vec!["-genconf".to_string()],
            config_flag: "-config".to_string(),
            timeout_stop_sec: "5s".to_string(),
            limit_nofile: 1_048_576,
            bind_privileged_ports: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// sysctl key -> value, applied in key order. An overrides table only
    /// changes the values it names.
    #[serde(deserialize_with = "tunables_over_defaults")]
    pub tunables: BTreeMap<String, String>,
}

fn tunables_over_defaults<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<String, String>::deserialize(deserializer)?;
    let mut tunables = NetworkConfig::default().tunables;
    tunables.extend(overrides);
    Ok(tunables)
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let mut tunables = BTreeMap::new();
        tunables.insert("net.core.default_qdisc".to_string(), "fq".to_string());
        tunables.insert(
            "net.ipv4.tcp_congestion_control".to_string(),
            "bbr".to_string(),
        );
        Self { tunables }
    }
}
