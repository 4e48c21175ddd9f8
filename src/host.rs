/*
 * Copyright 2024 Oxide Computer Company
 */

use std::path::Path;
use std::process::Command;

use crate::common::*;
use crate::file::ensure_dir;

const NET: &str = r"C:\Windows\System32\net.exe";
const REG: &str = r"C:\Windows\System32\reg.exe";
const POWERCFG: &str = r"C:\Windows\System32\powercfg.exe";
const NETSH: &str = r"C:\Windows\System32\netsh.exe";
const SC: &str = r"C:\Windows\System32\sc.exe";
const SHUTDOWN: &str = r"C:\Windows\System32\shutdown.exe";
const POWERSHELL: &str = r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe";

const WINLOGON: &str = r"HKLM\SOFTWARE\Microsoft\Windows NT\CurrentVersion\Winlogon";
const PERSONALIZATION: &str = r"HKLM\SOFTWARE\Policies\Microsoft\Windows\Personalization";

/**
 * Machine configuration actions used during provisioning.  Each action must be
 * harmless to repeat, as a corrupt state file sends us back to the start.
 */
pub trait Host {
    fn set_account_password(
        &self,
        log: &Logger,
        user: &str,
        password: &str,
    ) -> Result<()>;
    fn enable_autologon(
        &self,
        log: &Logger,
        user: &str,
        password: &str,
    ) -> Result<()>;
    fn disable_power_transitions(&self, log: &Logger) -> Result<()>;
    fn open_inbound_port(&self, log: &Logger, rule: &str, port: u16)
        -> Result<()>;
    fn configure_display_server(
        &self,
        log: &Logger,
        settings: &[(&str, u32)],
    ) -> Result<()>;
    /**
     * Register the display server as an OS service that starts automatically.
     * Starting it is left to the caller.
     */
    fn install_display_service(&self, log: &Logger, server: &Path)
        -> Result<()>;
    fn fetch(
        &self,
        log: &Logger,
        url: &str,
        dest: &Path,
        sha256: Option<&str>,
    ) -> Result<()>;
    fn unpack(&self, log: &Logger, archive: &Path, dest: &Path) -> Result<()>;
    /**
     * Copy the running program to a stable location from which boot triggers
     * can invoke it.
     */
    fn install_program(&self, log: &Logger, dest: &Path) -> Result<()>;
    /**
     * Ask the OS to restart.  The restart happens shortly after this returns.
     */
    fn restart(&self, log: &Logger) -> Result<()>;
}

pub struct WindowsHost {
    pub fetch_attempts: u32,
}

fn reg_set(log: &Logger, key: &str, name: &str, kind: &str, data: &str)
    -> Result<()>
{
    exec(log, REG, &["add", key, "/v", name, "/t", kind, "/d", data, "/f"])?;
    Ok(())
}

impl Host for WindowsHost {
    fn set_account_password(
        &self,
        log: &Logger,
        user: &str,
        password: &str,
    ) -> Result<()> {
        info!(log, "exec: net user {} ********", user);
        exec_quiet(NET, &["user", user, password])?;
        exec(log, NET, &["user", user, "/active:yes"])?;
        Ok(())
    }

    fn enable_autologon(
        &self,
        log: &Logger,
        user: &str,
        password: &str,
    ) -> Result<()> {
        reg_set(log, WINLOGON, "AutoAdminLogon", "REG_SZ", "1")?;
        reg_set(log, WINLOGON, "DefaultUserName", "REG_SZ", user)?;
        reg_set(log, WINLOGON, "DefaultDomainName", "REG_SZ", ".")?;

        /*
         * Winlogon only reads the auto-logon password from this value.
         */
        info!(log, "exec: reg add {} /v DefaultPassword ********", WINLOGON);
        exec_quiet(REG, &["add", WINLOGON, "/v", "DefaultPassword", "/t",
            "REG_SZ", "/d", password, "/f"])?;
        Ok(())
    }

    fn disable_power_transitions(&self, log: &Logger) -> Result<()> {
        for setting in [
            "standby-timeout-ac",
            "monitor-timeout-ac",
            "hibernate-timeout-ac",
            "disk-timeout-ac",
        ] {
            exec(log, POWERCFG, &["/change", setting, "0"])?;
        }
        exec(log, POWERCFG, &["/hibernate", "off"])?;

        reg_set(log, PERSONALIZATION, "NoLockScreen", "REG_DWORD", "1")?;
        reg_set(log, WINLOGON, "DisableLockWorkstation", "REG_DWORD", "1")?;
        Ok(())
    }

    fn open_inbound_port(
        &self,
        log: &Logger,
        rule: &str,
        port: u16,
    ) -> Result<()> {
        let name = format!("name={}", rule);

        let output = Command::new(NETSH)
            .args(["advfirewall", "firewall", "show", "rule", &name])
            .output()?;
        if output.status.success() {
            info!(log, "firewall rule {} exists already", rule);
            return Ok(());
        }

        let localport = format!("localport={}", port);
        exec(
            log,
            NETSH,
            &[
                "advfirewall", "firewall", "add", "rule", &name, "dir=in",
                "action=allow", "protocol=TCP", &localport,
            ],
        )?;
        info!(log, "firewall rule {} allows inbound TCP {}", rule, port);
        Ok(())
    }

    fn configure_display_server(
        &self,
        log: &Logger,
        settings: &[(&str, u32)],
    ) -> Result<()> {
        for (name, value) in settings {
            reg_set(
                log,
                crate::payload::DISPLAY_SERVER_KEY,
                name,
                "REG_DWORD",
                &value.to_string(),
            )?;
        }
        Ok(())
    }

    fn install_display_service(
        &self,
        log: &Logger,
        server: &Path,
    ) -> Result<()> {
        let service = crate::registry::DISPLAY_SERVICE;

        let exists =
            Command::new(SC).arg("query").arg(service).output()?.status.success();
        if exists {
            info!(log, "service {} exists already", service);
        } else {
            let server = server.to_str().context("server path is not UTF-8")?;
            exec(log, server, &["-install", "-silent"])?;
        }

        exec(log, SC, &["config", service, "start=", "auto"])?;
        Ok(())
    }

    fn fetch(
        &self,
        log: &Logger,
        url: &str,
        dest: &Path,
        sha256: Option<&str>,
    ) -> Result<()> {
        crate::fetch::download(log, url, dest, self.fetch_attempts, sha256)
    }

    fn unpack(&self, log: &Logger, archive: &Path, dest: &Path) -> Result<()> {
        let cmd = format!(
            "Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force",
            archive.display(),
            dest.display()
        );
        exec(log, POWERSHELL, &["-NoProfile", "-NonInteractive", "-Command",
            &cmd])?;
        Ok(())
    }

    fn install_program(&self, log: &Logger, dest: &Path) -> Result<()> {
        let me = std::env::current_exe()?;

        if let (Ok(a), Ok(b)) = (me.canonicalize(), dest.canonicalize()) {
            if a == b {
                info!(log, "running from {} already", dest.display());
                return Ok(());
            }
        }

        if let Some(dir) = dest.parent() {
            ensure_dir(log, dir)?;
        }

        info!(log, "copy {} -> {}", me.display(), dest.display());
        std::fs::copy(&me, dest)
            .with_context(|| format!("installing {}", dest.display()))?;
        Ok(())
    }

    fn restart(&self, log: &Logger) -> Result<()> {
        exec(
            log,
            SHUTDOWN,
            &["/r", "/t", "10", "/c", "desktop host provisioning restart"],
        )?;
        Ok(())
    }
}
