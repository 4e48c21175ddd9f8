/*
 * Copyright 2024 Oxide Computer Company
 */

use std::path::Path;
use std::process::Command;

use crate::common::*;

const SCHTASKS: &str = r"C:\Windows\System32\schtasks.exe";

/// Resumes provisioning after the mid-provisioning restart.
pub const RESUME: &str = "resume";
/// Runs the service supervisor on every boot, forever.
pub const SERVICES: &str = "services";

/**
 * An OS-level binding that runs a program, with full privileges, every time
 * the machine boots.  Registrations are keyed by name: registering a name that
 * already exists replaces it, and removing a name that does not exist is not
 * an error.
 */
pub trait BootTrigger {
    fn register(
        &self,
        log: &Logger,
        name: &str,
        program: &Path,
        args: &[&str],
    ) -> Result<()>;
    fn unregister(&self, log: &Logger, name: &str) -> Result<()>;
    fn is_registered(&self, name: &str) -> Result<bool>;
}

/**
 * Boot triggers implemented as Task Scheduler tasks that start at system
 * startup under the SYSTEM account.
 */
pub struct ScheduledTasks {
    folder: String,
}

impl ScheduledTasks {
    pub fn new(folder: &str) -> ScheduledTasks {
        ScheduledTasks { folder: folder.to_string() }
    }

    fn task_name(&self, name: &str) -> String {
        format!(r"\{}\{}", self.folder, name)
    }
}

/**
 * Render the single command string that schtasks expects for /TR.  The
 * program path is quoted as it will often contain spaces.
 */
pub fn task_command(program: &Path, args: &[&str]) -> String {
    let mut out = format!("\"{}\"", program.display());
    for a in args {
        out.push(' ');
        if a.contains(' ') {
            out.push_str(&format!("\"{}\"", a));
        } else {
            out.push_str(a);
        }
    }
    out
}

impl BootTrigger for ScheduledTasks {
    fn register(
        &self,
        log: &Logger,
        name: &str,
        program: &Path,
        args: &[&str],
    ) -> Result<()> {
        let tn = self.task_name(name);
        let tr = task_command(program, args);

        exec(
            log,
            SCHTASKS,
            &[
                "/Create", "/F", "/TN", &tn, "/SC", "ONSTART", "/RU", "SYSTEM",
                "/RL", "HIGHEST", "/TR", &tr,
            ],
        )?;

        info!(log, "boot trigger {} registered: {}", tn, tr);
        Ok(())
    }

    fn unregister(&self, log: &Logger, name: &str) -> Result<()> {
        let tn = self.task_name(name);

        if !self.is_registered(name)? {
            info!(log, "boot trigger {} not present", tn);
            return Ok(());
        }

        exec(log, SCHTASKS, &["/Delete", "/F", "/TN", &tn])?;
        info!(log, "boot trigger {} removed", tn);
        Ok(())
    }

    fn is_registered(&self, name: &str) -> Result<bool> {
        let output = Command::new(SCHTASKS)
            .arg("/Query")
            .arg("/TN")
            .arg(self.task_name(name))
            .output()?;

        Ok(output.status.success())
    }
}
