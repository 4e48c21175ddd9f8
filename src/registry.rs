/*
 * Copyright 2024 Oxide Computer Company
 */

use crate::config::Config;
use crate::process::{Launch, Liveness, SpawnCommand};

pub const DISPLAY_SERVICE: &str = "tvnserver";
pub const PROXY_TOKEN: &str = "websockify";
pub const APP_SERVER_SCRIPT: &str = "vm_server.py";

/**
 * A long-running helper that the host must keep alive.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcess {
    pub name: &'static str,
    pub liveness: Liveness,
    pub launch: Launch,
}

/**
 * The fixed set of managed processes, in the order the supervisor visits them.
 * Only locations and port numbers come from the configuration.
 */
pub fn managed_processes(c: &Config) -> Vec<ManagedProcess> {
    vec![
        ManagedProcess {
            name: "display service",
            liveness: Liveness::Service(DISPLAY_SERVICE.into()),
            launch: Launch::StartService(DISPLAY_SERVICE.into()),
        },
        ManagedProcess {
            name: "display proxy",
            liveness: Liveness::CommandLineToken(PROXY_TOKEN.into()),
            launch: Launch::Spawn(SpawnCommand {
                program: c.paths.python.clone(),
                args: vec![
                    "-m".into(),
                    PROXY_TOKEN.into(),
                    "--web".into(),
                    c.paths.novnc_dir.display().to_string(),
                    c.ports.proxy.to_string(),
                    format!("localhost:{}", c.ports.display),
                ],
                /*
                 * Not the web directory: it is replaced wholesale when the
                 * front-end is reinstalled, and Windows will not remove a
                 * directory that a running process has as its cwd.
                 */
                cwd: c.paths.state_dir.clone(),
            }),
        },
        ManagedProcess {
            name: "application server",
            liveness: Liveness::CommandLineToken(APP_SERVER_SCRIPT.into()),
            launch: Launch::Spawn(SpawnCommand {
                program: c.paths.python.clone(),
                args: vec![c
                    .paths
                    .app_dir
                    .join(APP_SERVER_SCRIPT)
                    .display()
                    .to_string()],
                cwd: c.paths.app_dir.clone(),
            }),
        },
    ]
}
