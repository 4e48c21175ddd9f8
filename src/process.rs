/*
 * Copyright 2024 Oxide Computer Company
 */

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::common::*;

const POWERSHELL: &str = r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe";
const SC: &str = r"C:\Windows\System32\sc.exe";
const TASKKILL: &str = r"C:\Windows\System32\taskkill.exe";

/*
 * "sc start" exit status when the service is running already.
 */
const ERROR_SERVICE_ALREADY_RUNNING: i32 = 1056;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub command_line: String,
}

/**
 * How to recognise running instances of a managed process.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// An OS service with this name is in the running state.
    Service(String),
    /// Any process whose command line contains this token.
    CommandLineToken(String),
}

impl Liveness {
    /**
     * Select the entries in a process table snapshot that are instances of
     * this process.  Service liveness is not a property of the process table,
     * so it never matches anything here.
     */
    pub fn instances<'a>(&self, table: &'a [ProcessInfo]) -> Vec<&'a ProcessInfo> {
        match self {
            Liveness::Service(_) => Vec::new(),
            Liveness::CommandLineToken(token) => table
                .iter()
                .filter(|p| p.command_line.contains(token.as_str()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl SpawnCommand {
    pub fn command_line(&self) -> String {
        let mut out = self.program.display().to_string();
        for a in &self.args {
            out.push(' ');
            out.push_str(a);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    StartService(String),
    Spawn(SpawnCommand),
}

/**
 * The parts of the OS process and service tables that the supervisor needs.
 */
pub trait ProcessTable {
    fn snapshot(&self) -> Result<Vec<ProcessInfo>>;
    fn terminate(&self, log: &Logger, pid: u32) -> Result<()>;
    /**
     * Start a process that outlives us.  Its stdout and stderr are appended to
     * the given file.  Returns the process ID of the new process.
     */
    fn spawn(&self, log: &Logger, cmd: &SpawnCommand, output: &Path)
        -> Result<u32>;
    fn service_running(&self, name: &str) -> Result<bool>;
    fn start_service(&self, log: &Logger, name: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Win32Process {
    process_id: u32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    command_line: Option<String>,
}

/*
 * ConvertTo-Json renders a single result as a bare object rather than as an
 * array with one element.
 */
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Win32Process>),
    One(Win32Process),
}

pub fn parse_snapshot(json: &str) -> Result<Vec<ProcessInfo>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }

    let list = match serde_json::from_str(json)
        .context("parsing process table")?
    {
        OneOrMany::Many(l) => l,
        OneOrMany::One(p) => vec![p],
    };

    Ok(list
        .into_iter()
        .map(|p| ProcessInfo {
            pid: p.process_id,
            name: p.name.unwrap_or_default(),
            command_line: p.command_line.unwrap_or_default(),
        })
        .collect())
}

pub struct WindowsProcesses;

impl ProcessTable for WindowsProcesses {
    fn snapshot(&self) -> Result<Vec<ProcessInfo>> {
        let output = exec_quiet(
            POWERSHELL,
            &[
                "-NoProfile",
                "-NonInteractive",
                "-Command",
                "Get-CimInstance Win32_Process | \
                Select-Object ProcessId,Name,CommandLine | \
                ConvertTo-Json -Compress",
            ],
        )?;

        let me = std::process::id();
        Ok(parse_snapshot(&String::from_utf8_lossy(&output.stdout))?
            .into_iter()
            .filter(|p| p.pid != me)
            .collect())
    }

    fn terminate(&self, log: &Logger, pid: u32) -> Result<()> {
        exec(log, TASKKILL, &["/PID", &pid.to_string(), "/T", "/F"])?;
        Ok(())
    }

    fn spawn(
        &self,
        log: &Logger,
        cmd: &SpawnCommand,
        output: &Path,
    ) -> Result<u32> {
        info!(log, "spawn: {} (in {})", cmd.command_line(),
            cmd.cwd.display());

        let out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output)
            .with_context(|| format!("opening {}", output.display()))?;
        let err = out.try_clone()?;

        let mut c = Command::new(&cmd.program);
        c.args(&cmd.args)
            .current_dir(&cmd.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err));

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            c.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        /*
         * The child is not waited for; dropping the handle leaves it running.
         */
        let child = c
            .spawn()
            .with_context(|| format!("spawning {}", cmd.command_line()))?;
        Ok(child.id())
    }

    fn service_running(&self, name: &str) -> Result<bool> {
        let output = Command::new(SC).arg("query").arg(name).output()?;

        if !output.status.success() {
            /*
             * Most commonly the service does not exist (yet).
             */
            return Ok(false);
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .any(|l| l.trim().starts_with("STATE") && l.contains("RUNNING")))
    }

    fn start_service(&self, log: &Logger, name: &str) -> Result<()> {
        info!(log, "exec: sc start {}", name);
        let output = Command::new(SC).arg("start").arg(name).output()?;

        if !output.status.success()
            && output.status.code() != Some(ERROR_SERVICE_ALREADY_RUNNING)
        {
            bail!("sc start {} failed: {}", name, output.info());
        }

        Ok(())
    }
}
