/*
 * Copyright 2024 Oxide Computer Company
 */

use std::fmt;

use crate::common::*;
use crate::config::Config;
use crate::host::Host;
use crate::process::{Launch, Liveness, ProcessInfo, ProcessTable};
use crate::registry::{managed_processes, ManagedProcess};
use crate::trigger::{BootTrigger, SERVICES};

/**
 * What reconciliation did for one managed process.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The process was running and healthy; it was left alone.
    AlreadyRunning,
    /// The OS service was started.
    StartedService,
    /// Stale instances (if any) were terminated and a new one launched.
    /// Instances that refused termination are listed as survivors.
    Launched { replaced: Vec<u32>, survivors: Vec<u32>, pid: u32 },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::AlreadyRunning => write!(f, "already running"),
            Action::StartedService => write!(f, "service started"),
            Action::Launched { replaced, survivors, pid } => {
                if replaced.is_empty() {
                    write!(f, "launched pid {}", pid)?;
                } else {
                    write!(f, "replaced pids {:?} with pid {}", replaced, pid)?;
                }
                if !survivors.is_empty() {
                    write!(f, " (pids {:?} survived termination)", survivors)?;
                }
                Ok(())
            }
        }
    }
}

pub struct ProcessReport {
    pub name: &'static str,
    pub result: Result<Action>,
}

/**
 * Keeps the managed processes running.  A reconcile pass makes no assumptions
 * about what happened before it: it works only from the live process table, so
 * it can be run on every boot and by hand as often as needed.
 */
pub struct Supervisor<'a> {
    log: Logger,
    config: &'a Config,
    procs: &'a dyn ProcessTable,
    triggers: &'a dyn BootTrigger,
    host: &'a dyn Host,
    /*
     * Arguments placed before the subcommand when this program is invoked by
     * a boot trigger (e.g., a non-default configuration file).
     */
    global_args: Vec<String>,
}

impl<'a> Supervisor<'a> {
    pub fn new(
        log: Logger,
        config: &'a Config,
        procs: &'a dyn ProcessTable,
        triggers: &'a dyn BootTrigger,
        host: &'a dyn Host,
        global_args: Vec<String>,
    ) -> Supervisor<'a> {
        Supervisor { log, config, procs, triggers, host, global_args }
    }

    pub fn processes(&self) -> &'a dyn ProcessTable {
        self.procs
    }

    /**
     * Make this supervisor permanent: install the program somewhere stable,
     * have it run at every boot, and heal the current boot right away rather
     * than waiting for the next one.
     */
    pub fn install(&self) -> Result<Vec<ProcessReport>> {
        let log = &self.log;
        let agent = &self.config.paths.agent;

        info!(log, "installing service supervisor");
        self.host.install_program(log, agent)?;

        let mut args: Vec<&str> =
            self.global_args.iter().map(|s| s.as_str()).collect();
        args.push("reconcile");
        self.triggers.register(log, SERVICES, agent, &args)?;

        Ok(self.reconcile())
    }

    pub fn reconcile(&self) -> Vec<ProcessReport> {
        let log = &self.log;
        let settle = self.config.supervisor.settle_secs;

        info!(log, "reconcile: waiting {}s for the system to settle", settle);
        sleep(settle.saturating_mul(1000));

        /*
         * One snapshot serves every process.  Each process only ever removes
         * its own instances from the table, so the snapshot stays accurate for
         * the processes still to be visited.
         */
        let table = self.procs.snapshot();
        if let Err(e) = &table {
            error!(log, "could not list processes: {:?}", e);
        }

        let mut reports = Vec::new();
        for mp in managed_processes(self.config) {
            let result = self.reconcile_one(&mp, table.as_deref());
            match &result {
                Ok(a) => info!(log, "{}: {}", mp.name, a),
                Err(e) => error!(log, "{}: reconcile failed: {:?}", mp.name, e),
            }
            reports.push(ProcessReport { name: mp.name, result });
        }

        let failed = reports.iter().filter(|r| r.result.is_err()).count();
        if failed == 0 {
            info!(log, "reconcile complete: all {} processes ok",
                reports.len());
        } else {
            warn!(log, "reconcile complete: {} of {} processes failed",
                failed, reports.len());
        }

        reports
    }

    fn reconcile_one(
        &self,
        mp: &ManagedProcess,
        table: std::result::Result<&[ProcessInfo], &anyhow::Error>,
    ) -> Result<Action> {
        let log = &self.log;

        let mut replaced = Vec::new();
        let mut survivors = Vec::new();
        match &mp.liveness {
            Liveness::Service(name) => {
                if self.procs.service_running(name)? {
                    return Ok(Action::AlreadyRunning);
                }
            }
            Liveness::CommandLineToken(_) => {
                let table = table.map_err(|e| {
                    anyhow!("process table unavailable: {}", e)
                })?;

                for stale in mp.liveness.instances(table) {
                    info!(log, "{}: terminating stale pid {} ({})", mp.name,
                        stale.pid, stale.name);
                    match self.procs.terminate(log, stale.pid) {
                        Ok(()) => replaced.push(stale.pid),
                        Err(e) => {
                            warn!(log, "{}: terminate pid {}: {:?}", mp.name,
                                stale.pid, e);
                            survivors.push(stale.pid);
                        }
                    }
                }
            }
        }

        match &mp.launch {
            Launch::StartService(name) => {
                self.procs.start_service(log, name)?;
                Ok(Action::StartedService)
            }
            Launch::Spawn(cmd) => {
                let pid = self.procs.spawn(log, cmd,
                    &self.config.services_log())?;
                Ok(Action::Launched { replaced, survivors, pid })
            }
        }
    }

    /**
     * Report, without changing anything, whether each managed process
     * currently appears to be running.
     */
    pub fn survey(&self) -> Result<Vec<(&'static str, bool)>> {
        let table = self.procs.snapshot()?;

        managed_processes(self.config)
            .iter()
            .map(|mp| -> Result<(&'static str, bool)> {
                let alive = match &mp.liveness {
                    Liveness::Service(name) => {
                        self.procs.service_running(name)?
                    }
                    l @ Liveness::CommandLineToken(_) => {
                        !l.instances(&table).is_empty()
                    }
                };
                Ok((mp.name, alive))
            })
            .collect()
    }
}
