/*
 * Copyright 2024 Oxide Computer Company
 */

use std::path::Path;
use std::process::Command;

use crate::common::*;
use crate::file::exists_file;

const CHOCO: &str = r"C:\ProgramData\chocolatey\bin\choco.exe";
const POWERSHELL: &str = r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe";
const CHOCO_BOOTSTRAP: &str = "[Net.ServicePointManager]::SecurityProtocol = \
    [Net.ServicePointManager]::SecurityProtocol -bor 3072; \
    iex ((New-Object System.Net.WebClient).DownloadString(\
    'https://community.chocolatey.org/install.ps1'))";

/*
 * Exit statuses from choco that mean the package is installed, possibly
 * pending a reboot.
 */
const CHOCO_OK: &[i32] = &[0, 1641, 3010];

/**
 * Installs software.  Every operation must be safe to repeat: installing
 * something that is already present succeeds without doing anything.
 */
pub trait Installer {
    fn ensure_manager(&self, log: &Logger) -> Result<()>;
    fn install(&self, log: &Logger, package: &str) -> Result<()>;
    fn install_python_modules(
        &self,
        log: &Logger,
        python: &Path,
        modules: &[String],
    ) -> Result<()>;
}

pub struct Chocolatey;

impl Installer for Chocolatey {
    fn ensure_manager(&self, log: &Logger) -> Result<()> {
        if exists_file(CHOCO)? {
            info!(log, "chocolatey present at {}", CHOCO);
            return Ok(());
        }

        info!(log, "installing chocolatey...");
        exec(
            log,
            POWERSHELL,
            &[
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-Command",
                CHOCO_BOOTSTRAP,
            ],
        )?;

        if !exists_file(CHOCO)? {
            bail!("chocolatey installer ran but {} is missing", CHOCO);
        }

        info!(log, "chocolatey installed");
        Ok(())
    }

    fn install(&self, log: &Logger, package: &str) -> Result<()> {
        info!(log, "exec: choco install {}", package);
        let output = Command::new(CHOCO)
            .arg("install")
            .arg(package)
            .arg("-y")
            .arg("--no-progress")
            .output()?;

        match output.status.code() {
            Some(c) if CHOCO_OK.contains(&c) => {
                if c != 0 {
                    info!(log, "package {} installed; reboot pending ({})",
                        package, c);
                } else {
                    info!(log, "package {} installed", package);
                }
                Ok(())
            }
            _ => bail!("choco install {} failed: {}", package, output.info()),
        }
    }

    fn install_python_modules(
        &self,
        log: &Logger,
        python: &Path,
        modules: &[String],
    ) -> Result<()> {
        if modules.is_empty() {
            return Ok(());
        }

        let python = python.to_str().context("python path is not UTF-8")?;
        let mut args = vec!["-m", "pip", "install", "--upgrade",
            "--disable-pip-version-check"];
        args.extend(modules.iter().map(|m| m.as_str()));

        exec(log, python, &args)?;
        info!(log, "python modules installed: {:?}", modules);
        Ok(())
    }
}
