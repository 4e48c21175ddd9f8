/*
 * Copyright 2024 Oxide Computer Company
 */

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod common;
mod config;
mod fetch;
mod file;
mod host;
mod installer;
mod orchestrator;
mod payload;
mod process;
mod registry;
mod state;
mod supervisor;
mod trigger;

#[cfg(test)]
mod testutil;

use common::*;
use config::{Config, DEFAULT_CONFIG};
use host::WindowsHost;
use installer::Chocolatey;
use orchestrator::{Orchestrator, Outcome};
use process::WindowsProcesses;
use state::StateStore;
use supervisor::Supervisor;
use trigger::{BootTrigger, ScheduledTasks, RESUME, SERVICES};

/// Scheduled task folder holding our boot triggers.
const TASK_FOLDER: &str = "DesktopHost";

#[derive(Parser)]
#[command(
    name = "hostagent",
    about = "Provision a remote desktop host and keep its services running"
)]
struct Args {
    /// Configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Cmd {
    /// Run the next provisioning phase (the default)
    Provision,
    /// Terminate stale instances of the managed processes and relaunch them
    Reconcile,
    /// Install the service supervisor as a boot trigger and reconcile now
    InstallServices,
    /// Show provisioning and service state without changing anything
    Status,
}

fn main() {
    let args = Args::parse();
    let cmd = args.command.unwrap_or(Cmd::Provision);

    let path = args.config.clone().unwrap_or_else(|| DEFAULT_CONFIG.into());
    let config = match Config::load(&path) {
        Ok(c) => c,
        Err(e) => {
            let log = init_log(None);
            error!(log, "fatal error: configuration {}: {:?}", path.display(),
                e);
            std::process::exit(1);
        }
    };

    /*
     * The log files live in the state directory, so it must exist before the
     * first record is written.  Failure here only costs us the log files.
     */
    std::fs::create_dir_all(&config.paths.state_dir).ok();

    let logfile = match cmd {
        Cmd::Provision => Some(config.provision_log()),
        Cmd::Reconcile | Cmd::InstallServices => Some(config.services_log()),
        Cmd::Status => None,
    };
    let log = init_log(logfile.as_deref());

    match run(&log, &args, cmd, &config) {
        Ok(()) => {
            info!(log, "ok, run complete");
            std::process::exit(0);
        }
        Err(e) => {
            error!(log, "fatal error: {:?}", e);
            std::process::exit(1);
        }
    }
}

fn run(log: &Logger, args: &Args, cmd: Cmd, config: &Config) -> Result<()> {
    /*
     * Boot triggers must find the same configuration file we were given.  They
     * do not run in our working directory.
     */
    let global_args: Vec<String> = match &args.config {
        Some(p) => {
            let p = if p.is_absolute() {
                p.clone()
            } else {
                std::env::current_dir()?.join(p)
            };
            vec!["--config".into(), p.display().to_string()]
        }
        None => Vec::new(),
    };

    let procs = WindowsProcesses;
    let triggers = ScheduledTasks::new(TASK_FOLDER);
    let host = WindowsHost { fetch_attempts: config.remote.attempts };

    let svlog = if cmd == Cmd::Provision {
        init_log(Some(config.services_log().as_path()))
    } else {
        log.clone()
    };
    let supervisor = Supervisor::new(svlog, config, &procs, &triggers, &host,
        global_args.clone());

    match cmd {
        Cmd::Provision => {
            let state = StateStore::new(config.state_file());
            let installer = Chocolatey;
            let orch = Orchestrator::new(log.clone(), config, &state,
                &triggers, &installer, &host, &supervisor, global_args);

            match orch.run()? {
                Outcome::RestartRequested => {
                    info!(log, "restart requested; provisioning resumes at \
                        next boot");
                }
                Outcome::Completed => {
                    info!(log, "provisioning complete");
                }
                Outcome::Reset => {
                    info!(log, "state reset; run again to start over");
                }
            }
        }
        Cmd::Reconcile => {
            supervisor.reconcile();
        }
        Cmd::InstallServices => {
            supervisor.install()?;
        }
        Cmd::Status => status(config, &triggers, &supervisor)?,
    }

    Ok(())
}

fn status(
    config: &Config,
    triggers: &dyn BootTrigger,
    supervisor: &Supervisor,
) -> Result<()> {
    let state = StateStore::new(config.state_file());
    let quiet = Logger::root(slog::Discard, o!());

    println!("phase:    {}", state.read(&quiet));
    for name in [RESUME, SERVICES] {
        let reg = if triggers.is_registered(name)? { "registered" } else {
            "absent" };
        println!("trigger:  {:<18} {}", name, reg);
    }
    for (name, alive) in supervisor.survey()? {
        println!("process:  {:<18} {}", name,
            if alive { "running" } else { "not running" });
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_subcommand() {
        let a = Args::try_parse_from(["hostagent"]).unwrap();
        assert!(a.command.is_none());
        assert!(a.config.is_none());
    }

    #[test]
    fn global_config_before_subcommand() {
        let a = Args::try_parse_from(
            ["hostagent", "--config", r"D:\host.toml", "reconcile"]).unwrap();
        assert!(a.command == Some(Cmd::Reconcile));
        assert_eq!(a.config, Some(PathBuf::from(r"D:\host.toml")));
    }

    #[test]
    fn subcommand_names() {
        for (arg, cmd) in [
            ("provision", Cmd::Provision),
            ("install-services", Cmd::InstallServices),
            ("status", Cmd::Status),
        ] {
            let a = Args::try_parse_from(["hostagent", arg]).unwrap();
            assert!(a.command == Some(cmd), "{}", arg);
        }
    }
}
