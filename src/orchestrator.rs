/*
 * Copyright 2024 Oxide Computer Company
 */

use crate::common::*;
use crate::config::Config;
use crate::fetch::promote_unpacked;
use crate::file::{ensure_dir, exists_dir, write_file};
use crate::host::Host;
use crate::installer::Installer;
use crate::payload;
use crate::registry::{APP_SERVER_SCRIPT, DISPLAY_SERVICE};
use crate::state::{Phase, StateStore};
use crate::supervisor::Supervisor;
use crate::trigger::{BootTrigger, RESUME};

/**
 * How an invocation ended, when it did not fail.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Initial setup is done and the machine is about to restart.
    RestartRequested,
    /// Provisioning is complete; the supervisor is installed.
    Completed,
    /// The state record was unrecognisable and has been reset.
    Reset,
}

/**
 * The individual actions performed within a phase.  A phase is a checkpoint:
 * its steps run in order, and the first failure abandons the rest of the
 * phase without recording any progress.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SetCredential,
    InstallPackageManager,
    InstallPackages,
    ConfigureSession,
    RegisterResumeTrigger,
    PersistPostRestart,
    Restart,
    ConfigureDisplayServer,
    StartDisplayService,
    OpenFirewall,
    InstallPythonModules,
    InstallFrontEnd,
    FetchAppServer,
    InstallSupervisor,
    PersistCompleted,
    RemoveResumeTrigger,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::SetCredential => "set account credential",
            Step::InstallPackageManager => "install package manager",
            Step::InstallPackages => "install packages",
            Step::ConfigureSession => "configure auto-logon and power",
            Step::RegisterResumeTrigger => "register resume trigger",
            Step::PersistPostRestart => "persist POST_RESTART",
            Step::Restart => "restart",
            Step::ConfigureDisplayServer => "configure display server",
            Step::StartDisplayService => "start display service",
            Step::OpenFirewall => "open firewall",
            Step::InstallPythonModules => "install python modules",
            Step::InstallFrontEnd => "install display front-end",
            Step::FetchAppServer => "fetch application server",
            Step::InstallSupervisor => "install service supervisor",
            Step::PersistCompleted => "persist COMPLETED",
            Step::RemoveResumeTrigger => "remove resume trigger",
        }
    }
}

pub fn steps(phase: &Phase) -> &'static [Step] {
    match phase {
        Phase::Initial => &[
            Step::SetCredential,
            Step::InstallPackageManager,
            Step::InstallPackages,
            Step::ConfigureSession,
            Step::RegisterResumeTrigger,
            Step::PersistPostRestart,
            Step::Restart,
        ],
        Phase::PostRestart => &[
            Step::ConfigureDisplayServer,
            Step::StartDisplayService,
            Step::OpenFirewall,
            Step::InstallPythonModules,
            Step::InstallFrontEnd,
            Step::FetchAppServer,
            Step::InstallSupervisor,
            Step::PersistCompleted,
            Step::RemoveResumeTrigger,
        ],
        /*
         * Removing the resume trigger again covers a previous run that
         * persisted COMPLETED but failed before it could remove the trigger.
         * The supervisor goes first so that it is installed regardless.
         */
        Phase::Completed => &[
            Step::InstallSupervisor,
            Step::RemoveResumeTrigger,
        ],
        Phase::Unrecognised(_) => &[],
    }
}

pub struct Orchestrator<'a> {
    log: Logger,
    config: &'a Config,
    state: &'a StateStore,
    triggers: &'a dyn BootTrigger,
    installer: &'a dyn Installer,
    host: &'a dyn Host,
    supervisor: &'a Supervisor<'a>,
    global_args: Vec<String>,
}

impl<'a> Orchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: Logger,
        config: &'a Config,
        state: &'a StateStore,
        triggers: &'a dyn BootTrigger,
        installer: &'a dyn Installer,
        host: &'a dyn Host,
        supervisor: &'a Supervisor<'a>,
        global_args: Vec<String>,
    ) -> Orchestrator<'a> {
        Orchestrator {
            log,
            config,
            state,
            triggers,
            installer,
            host,
            supervisor,
            global_args,
        }
    }

    /**
     * Perform one invocation: read the persisted phase, then run that phase.
     * Nothing is carried over from any previous invocation except what the
     * state record says.
     */
    pub fn run(&self) -> Result<Outcome> {
        let log = &self.log;

        let phase = self.state.read(log);
        info!(log, "provisioning phase: {}", phase);

        if let Phase::Unrecognised(_) = &phase {
            warn!(log, "phase {} not recognised; starting over", phase);
            self.state.write(log, &Phase::Initial)?;
            return Ok(Outcome::Reset);
        }

        for step in steps(&phase) {
            info!(log, "[{}] {}", phase.token(), step.name());
            self.perform(*step).with_context(|| {
                format!("phase {}: {} failed", phase.token(), step.name())
            })?;
        }

        let outcome = match &phase {
            Phase::Initial => Outcome::RestartRequested,
            _ => Outcome::Completed,
        };
        info!(log, "phase {} complete", phase.token());
        Ok(outcome)
    }

    fn perform(&self, step: Step) -> Result<()> {
        let log = &self.log;
        let c = self.config;

        match step {
            Step::SetCredential => {
                let pw = c.account.password()?;
                self.host.set_account_password(log, &c.account.user, &pw)
            }
            Step::InstallPackageManager => self.installer.ensure_manager(log),
            Step::InstallPackages => {
                for pkg in &c.packages.install {
                    self.installer.install(log, pkg)?;
                }
                Ok(())
            }
            Step::ConfigureSession => {
                let pw = c.account.password()?;
                self.host.enable_autologon(log, &c.account.user, &pw)?;
                self.host.disable_power_transitions(log)
            }
            Step::RegisterResumeTrigger => {
                self.host.install_program(log, &c.paths.agent)?;
                let args = self.trigger_args("provision");
                self.triggers.register(log, RESUME, &c.paths.agent, &args)
            }
            Step::PersistPostRestart => {
                self.state.write(log, &Phase::PostRestart)
            }
            Step::Restart => self.host.restart(log),
            Step::ConfigureDisplayServer => {
                let settings = payload::display_server_settings(&c.ports);
                self.host.configure_display_server(log, &settings)
            }
            Step::StartDisplayService => {
                self.host
                    .install_display_service(log, &c.paths.display_server)?;
                self.supervisor
                    .processes()
                    .start_service(log, DISPLAY_SERVICE)
            }
            Step::OpenFirewall => {
                for (rule, port) in c.ports.inbound() {
                    self.host.open_inbound_port(log, rule, port)?;
                }
                Ok(())
            }
            Step::InstallPythonModules => self.installer.install_python_modules(
                log,
                &c.paths.python,
                &c.packages.python_modules,
            ),
            Step::InstallFrontEnd => self.install_front_end(),
            Step::FetchAppServer => {
                ensure_dir(log, &c.paths.app_dir)?;
                self.host.fetch(
                    log,
                    &c.remote.app_server_url,
                    &c.paths.app_dir.join(APP_SERVER_SCRIPT),
                    c.remote.app_server_sha256.as_deref(),
                )
            }
            Step::InstallSupervisor => {
                let reports = self.supervisor.install()?;
                for r in reports.iter().filter(|r| r.result.is_err()) {
                    warn!(log, "{} not healthy yet; see {}", r.name,
                        c.services_log().display());
                }
                Ok(())
            }
            Step::PersistCompleted => self.state.write(log, &Phase::Completed),
            Step::RemoveResumeTrigger => self.triggers.unregister(log, RESUME),
        }
    }

    fn trigger_args(&self, subcommand: &'static str) -> Vec<&str> {
        let mut args: Vec<&str> =
            self.global_args.iter().map(|s| s.as_str()).collect();
        args.push(subcommand);
        args
    }

    fn install_front_end(&self) -> Result<()> {
        let log = &self.log;
        let c = self.config;

        let downloads = c.paths.state_dir.join("downloads");
        let archive = downloads.join("novnc.zip");
        let staging = downloads.join("novnc");

        ensure_dir(log, &downloads)?;
        self.host.fetch(log, &c.remote.novnc_url, &archive,
            c.remote.novnc_sha256.as_deref())?;

        if exists_dir(&staging)? {
            std::fs::remove_dir_all(&staging)?;
        }
        self.host.unpack(log, &archive, &staging)?;
        promote_unpacked(log, &staging, &c.paths.novnc_dir)?;

        let landing = c.paths.novnc_dir.join(payload::LANDING_PAGE);
        info!(log, "rewrite landing page {}", landing.display());
        write_file(&landing, &payload::redirect_page())?;
        Ok(())
    }
}
