/*
 * Copyright 2024 Oxide Computer Company
 */

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::*;

pub const DEFAULT_CONFIG: &str = r"C:\ProgramData\DesktopHost\config.toml";

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub paths: ConfigPaths,
    #[serde(default)]
    pub account: ConfigAccount,
    #[serde(default)]
    pub packages: ConfigPackages,
    #[serde(default)]
    pub ports: ConfigPorts,
    #[serde(default)]
    pub remote: ConfigRemote,
    #[serde(default)]
    pub supervisor: ConfigSupervisor,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigPaths {
    /// Holds the phase file and both diagnostic logs.
    pub state_dir: PathBuf,
    /// Stable copy of this program, invoked by the boot triggers.
    pub agent: PathBuf,
    pub novnc_dir: PathBuf,
    pub app_dir: PathBuf,
    pub python: PathBuf,
    pub display_server: PathBuf,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        ConfigPaths {
            state_dir: r"C:\ProgramData\DesktopHost".into(),
            agent: r"C:\ProgramData\DesktopHost\bin\hostagent.exe".into(),
            novnc_dir: r"C:\DesktopHost\noVNC".into(),
            app_dir: r"C:\DesktopHost\app".into(),
            python: r"C:\Python312\python.exe".into(),
            display_server: r"C:\Program Files\TightVNC\tvnserver.exe".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigAccount {
    pub user: String,
    pub password: Option<String>,
    pub password_env: String,
}

impl Default for ConfigAccount {
    fn default() -> Self {
        ConfigAccount {
            user: "Administrator".into(),
            password: None,
            password_env: "HOSTAGENT_ADMIN_PASSWORD".into(),
        }
    }
}

impl ConfigAccount {
    /**
     * The administrative credential is deliberately not part of the program.
     * It comes from the configuration file or, failing that, the environment.
     */
    pub fn password(&self) -> Result<String> {
        if let Some(pw) = self.password.as_deref().filter(|p| !p.is_empty()) {
            return Ok(pw.to_string());
        }

        match std::env::var(&self.password_env) {
            Ok(pw) if !pw.is_empty() => Ok(pw),
            _ => bail!(
                "no password for account {}: set account.password or ${}",
                self.user,
                self.password_env
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigPackages {
    pub install: Vec<String>,
    pub python_modules: Vec<String>,
}

impl Default for ConfigPackages {
    fn default() -> Self {
        ConfigPackages {
            install: ["python", "tightvnc", "googlechrome", "notepadplusplus",
                "vscode"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            python_modules: ["websockify", "flask", "psutil", "requests",
                "watchdog", "boto3"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct ConfigPorts {
    pub display: u16,
    pub proxy: u16,
    pub app: u16,
    pub remote_login: u16,
}

impl Default for ConfigPorts {
    fn default() -> Self {
        ConfigPorts { display: 5900, proxy: 6080, app: 5000, remote_login: 3389 }
    }
}

impl ConfigPorts {
    /**
     * Every inbound port the host must accept, with the name used for the
     * corresponding firewall rule.
     */
    pub fn inbound(&self) -> [(&'static str, u16); 4] {
        [
            ("DesktopHost-display", self.display),
            ("DesktopHost-proxy", self.proxy),
            ("DesktopHost-app", self.app),
            ("DesktopHost-remote-login", self.remote_login),
        ]
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigRemote {
    pub novnc_url: String,
    pub novnc_sha256: Option<String>,
    pub app_server_url: String,
    pub app_server_sha256: Option<String>,
    pub attempts: u32,
}

impl Default for ConfigRemote {
    fn default() -> Self {
        ConfigRemote {
            novnc_url: "https://github.com/novnc/noVNC/archive/refs/tags/\
                v1.4.0.zip"
                .into(),
            novnc_sha256: None,
            app_server_url: "https://cloud-ram-scripts.s3.amazonaws.com/\
                vm_server.py"
                .into(),
            app_server_sha256: None,
            attempts: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConfigSupervisor {
    /// Grace period at the start of each reconcile pass.
    pub settle_secs: u64,
}

impl Default for ConfigSupervisor {
    fn default() -> Self {
        ConfigSupervisor { settle_secs: 30 }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(p: P) -> Result<Config> {
        Ok(crate::file::read_toml(p)?.unwrap_or_default())
    }

    pub fn state_file(&self) -> PathBuf {
        self.paths.state_dir.join("phase")
    }

    pub fn provision_log(&self) -> PathBuf {
        self.paths.state_dir.join("provision.log")
    }

    pub fn services_log(&self) -> PathBuf {
        self.paths.state_dir.join("services.log")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_defaults() -> Result<()> {
        let c: Config = toml::from_str("\n")?;
        assert_eq!(c.ports.inbound().map(|(_, p)| p), [5900, 6080, 5000, 3389]);
        assert_eq!(c.account.user, "Administrator");
        assert_eq!(c.packages.install.len(), 5);
        assert_eq!(c.supervisor.settle_secs, 30);
        assert!(c.remote.novnc_sha256.is_none());
        Ok(())
    }

    #[test]
    fn config_partial_section() -> Result<()> {
        let input = "[ports]\nproxy = 6081\n\n[supervisor]\nsettle_secs = 0\n";
        let c: Config = toml::from_str(input)?;
        assert_eq!(c.ports.proxy, 6081);
        assert_eq!(c.ports.display, 5900);
        assert_eq!(c.supervisor.settle_secs, 0);
        Ok(())
    }

    #[test]
    fn config_missing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let c = Config::load(dir.path().join("config.toml"))?;
        assert_eq!(c.ports, ConfigPorts::default());
        Ok(())
    }

    #[test]
    fn password_from_config() -> Result<()> {
        let input = "[account]\npassword = \"hunter2\"\n";
        let c: Config = toml::from_str(input)?;
        assert_eq!(c.account.password()?, "hunter2");
        Ok(())
    }

    #[test]
    fn password_missing() -> Result<()> {
        let input = "[account]\npassword_env = \"HOSTAGENT_TEST_UNSET_VAR\"\n";
        let c: Config = toml::from_str(input)?;
        assert!(c.account.password().is_err());
        Ok(())
    }
}
