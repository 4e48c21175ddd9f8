/*
 * Copyright 2024 Oxide Computer Company
 */

/*
 * In-memory stand-ins for the machine, used by unit tests.
 */

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::common::*;
use crate::config::Config;
use crate::host::Host;
use crate::installer::Installer;
use crate::process::{ProcessInfo, ProcessTable, SpawnCommand};
use crate::trigger::BootTrigger;

pub fn test_log() -> Logger {
    Logger::root(slog::Discard, o!())
}

/**
 * A configuration rooted in a fresh temporary directory, with no settling
 * delay and a credential in place.
 */
pub fn test_config() -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().expect("temporary directory");
    let root = dir.path();

    let mut c = Config::default();
    c.paths.state_dir = root.join("state");
    c.paths.agent = root.join("bin").join("hostagent.exe");
    c.paths.novnc_dir = root.join("noVNC");
    c.paths.app_dir = root.join("app");
    c.paths.python = root.join("python.exe");
    c.paths.display_server = root.join("tvnserver.exe");
    c.account.password = Some("correct horse".into());
    c.supervisor.settle_secs = 0;

    (dir, c)
}

#[derive(Default)]
struct ProcState {
    table: Vec<ProcessInfo>,
    cwds: BTreeMap<u32, PathBuf>,
    next_pid: u32,
    services: BTreeSet<String>,
    events: Vec<String>,
    unkillable: BTreeSet<u32>,
    spawn_failures: Vec<String>,
    snapshot_fails: bool,
}

pub struct FakeProcesses {
    inner: RefCell<ProcState>,
}

impl FakeProcesses {
    pub fn new() -> FakeProcesses {
        FakeProcesses {
            inner: RefCell::new(ProcState { next_pid: 1000, ..Default::default() }),
        }
    }

    pub fn add(&self, name: &str, command_line: &str) -> u32 {
        let mut i = self.inner.borrow_mut();
        i.next_pid += 4;
        let pid = i.next_pid;
        i.table.push(ProcessInfo {
            pid,
            name: name.into(),
            command_line: command_line.into(),
        });
        pid
    }

    pub fn table(&self) -> Vec<ProcessInfo> {
        self.inner.borrow().table.clone()
    }

    /// Working directories of the live processes we launched.
    pub fn live_cwds(&self) -> Vec<PathBuf> {
        let i = self.inner.borrow();
        i.table.iter().filter_map(|p| i.cwds.get(&p.pid).cloned()).collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.inner.borrow().events.clone()
    }

    pub fn is_service_running(&self, name: &str) -> bool {
        self.inner.borrow().services.contains(name)
    }

    pub fn refuse_termination(&self, pid: u32) {
        self.inner.borrow_mut().unkillable.insert(pid);
    }

    /// Fail to spawn any command line containing this token.
    pub fn fail_spawn(&self, token: &str) {
        self.inner.borrow_mut().spawn_failures.push(token.into());
    }

    pub fn fail_snapshot(&self) {
        self.inner.borrow_mut().snapshot_fails = true;
    }
}

impl ProcessTable for FakeProcesses {
    fn snapshot(&self) -> Result<Vec<ProcessInfo>> {
        if self.inner.borrow().snapshot_fails {
            bail!("access denied");
        }
        Ok(self.table())
    }

    fn terminate(&self, _log: &Logger, pid: u32) -> Result<()> {
        let mut i = self.inner.borrow_mut();
        i.events.push(format!("terminate {}", pid));
        if i.unkillable.contains(&pid) {
            bail!("access denied");
        }
        i.table.retain(|p| p.pid != pid);
        Ok(())
    }

    fn spawn(
        &self,
        _log: &Logger,
        cmd: &SpawnCommand,
        _output: &Path,
    ) -> Result<u32> {
        let cl = cmd.command_line();
        self.inner.borrow_mut().events.push(format!("spawn {}", cl));
        if self
            .inner
            .borrow()
            .spawn_failures
            .iter()
            .any(|t| cl.contains(t.as_str()))
        {
            bail!("file not found");
        }
        let pid = self.add("python.exe", &cl);
        self.inner.borrow_mut().cwds.insert(pid, cmd.cwd.clone());
        Ok(pid)
    }

    fn service_running(&self, name: &str) -> Result<bool> {
        Ok(self.is_service_running(name))
    }

    fn start_service(&self, _log: &Logger, name: &str) -> Result<()> {
        let mut i = self.inner.borrow_mut();
        i.events.push(format!("start-service {}", name));
        i.services.insert(name.into());
        Ok(())
    }
}

pub struct FakeTriggers {
    inner: RefCell<BTreeMap<String, (PathBuf, Vec<String>)>>,
    removal_fails: RefCell<bool>,
}

impl FakeTriggers {
    pub fn new() -> FakeTriggers {
        FakeTriggers {
            inner: RefCell::new(BTreeMap::new()),
            removal_fails: RefCell::new(false),
        }
    }

    pub fn fail_removal(&self) {
        *self.removal_fails.borrow_mut() = true;
    }

    pub fn get(&self, name: &str) -> Option<(PathBuf, Vec<String>)> {
        self.inner.borrow().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.borrow().keys().cloned().collect()
    }
}

impl BootTrigger for FakeTriggers {
    fn register(
        &self,
        _log: &Logger,
        name: &str,
        program: &Path,
        args: &[&str],
    ) -> Result<()> {
        self.inner.borrow_mut().insert(
            name.into(),
            (program.to_path_buf(), args.iter().map(|a| a.to_string()).collect()),
        );
        Ok(())
    }

    fn unregister(&self, _log: &Logger, name: &str) -> Result<()> {
        if *self.removal_fails.borrow() {
            bail!("task scheduler unavailable");
        }
        self.inner.borrow_mut().remove(name);
        Ok(())
    }

    fn is_registered(&self, name: &str) -> Result<bool> {
        Ok(self.inner.borrow().contains_key(name))
    }
}

pub struct FakeInstaller {
    installed: RefCell<Vec<String>>,
    fail: RefCell<Option<String>>,
}

impl FakeInstaller {
    pub fn new() -> FakeInstaller {
        FakeInstaller { installed: RefCell::new(Vec::new()), fail: RefCell::new(None) }
    }

    pub fn fail_on(&self, package: &str) {
        *self.fail.borrow_mut() = Some(package.into());
    }

    pub fn installed(&self) -> Vec<String> {
        self.installed.borrow().clone()
    }
}

impl Installer for FakeInstaller {
    fn ensure_manager(&self, _log: &Logger) -> Result<()> {
        Ok(())
    }

    fn install(&self, _log: &Logger, package: &str) -> Result<()> {
        if self.fail.borrow().as_deref() == Some(package) {
            bail!("package {} not found", package);
        }
        let mut i = self.installed.borrow_mut();
        if !i.iter().any(|p| p == package) {
            i.push(package.into());
        }
        Ok(())
    }

    fn install_python_modules(
        &self,
        _log: &Logger,
        _python: &Path,
        _modules: &[String],
    ) -> Result<()> {
        Ok(())
    }
}

/**
 * Records each host action as a line of text.  Downloads and unpacking touch
 * the real (temporary) file system so that later steps can find their files.
 */
pub struct FakeHost {
    calls: RefCell<Vec<String>>,
    fail: RefCell<Option<String>>,
}

impl FakeHost {
    pub fn new() -> FakeHost {
        FakeHost { calls: RefCell::new(Vec::new()), fail: RefCell::new(None) }
    }

    /// Fail any action whose record starts with this word.
    pub fn fail_on(&self, action: &str) {
        *self.fail.borrow_mut() = Some(action.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, action: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.split(' ').next() == Some(action))
            .count()
    }

    fn record(&self, call: String) -> Result<()> {
        let failing = match self.fail.borrow().as_deref() {
            Some(f) => call.split(' ').next() == Some(f),
            None => false,
        };
        self.calls.borrow_mut().push(call.clone());
        if failing {
            bail!("{}: injected failure", call);
        }
        Ok(())
    }
}

impl Host for FakeHost {
    fn set_account_password(
        &self,
        _log: &Logger,
        user: &str,
        _password: &str,
    ) -> Result<()> {
        self.record(format!("set-password {}", user))
    }

    fn enable_autologon(
        &self,
        _log: &Logger,
        user: &str,
        _password: &str,
    ) -> Result<()> {
        self.record(format!("autologon {}", user))
    }

    fn disable_power_transitions(&self, _log: &Logger) -> Result<()> {
        self.record("power".into())
    }

    fn open_inbound_port(
        &self,
        _log: &Logger,
        rule: &str,
        port: u16,
    ) -> Result<()> {
        self.record(format!("firewall {} {}", rule, port))
    }

    fn configure_display_server(
        &self,
        _log: &Logger,
        settings: &[(&str, u32)],
    ) -> Result<()> {
        self.record(format!("display-config {:?}", settings))
    }

    fn install_display_service(
        &self,
        _log: &Logger,
        server: &Path,
    ) -> Result<()> {
        self.record(format!("display-service {}", server.display()))
    }

    fn fetch(
        &self,
        _log: &Logger,
        url: &str,
        dest: &Path,
        _sha256: Option<&str>,
    ) -> Result<()> {
        self.record(format!("fetch {}", url))?;
        std::fs::write(dest, url)?;
        Ok(())
    }

    fn unpack(&self, _log: &Logger, archive: &Path, dest: &Path) -> Result<()> {
        self.record(format!("unpack {}", archive.display()))?;
        let top = dest.join("noVNC-1.4.0");
        std::fs::create_dir_all(&top)?;
        std::fs::write(top.join("vnc.html"), "<html></html>")?;
        Ok(())
    }

    fn install_program(&self, _log: &Logger, dest: &Path) -> Result<()> {
        self.record(format!("install-program {}", dest.display()))
    }

    fn restart(&self, _log: &Logger) -> Result<()> {
        self.record("restart".into())
    }
}
