/*
 * Copyright 2024 Oxide Computer Company
 */

use std::fmt;
use std::path::{Path, PathBuf};

use crate::common::*;
use crate::file::{read_file, write_file_atomic};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Initial,
    PostRestart,
    Completed,
    /**
     * Whatever was in the record did not name a phase.  The content is kept
     * only so that it can be reported.
     */
    Unrecognised(String),
}

impl Phase {
    pub fn parse(line: &str) -> Phase {
        match line.trim() {
            "INITIAL" => Phase::Initial,
            "POST_RESTART" => Phase::PostRestart,
            "COMPLETED" => Phase::Completed,
            other => Phase::Unrecognised(other.to_string()),
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Phase::Initial => "INITIAL",
            Phase::PostRestart => "POST_RESTART",
            Phase::Completed => "COMPLETED",
            Phase::Unrecognised(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Unrecognised(s) => write!(f, "unrecognised ({:?})", s),
            p => write!(f, "{}", p.token()),
        }
    }
}

/**
 * The single durable record of provisioning progress.  Nothing else survives a
 * restart, so every decision the orchestrator makes starts with a read() here.
 */
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> StateStore {
        StateStore { path: path.as_ref().to_path_buf() }
    }

    /**
     * Returns the phase named on the first line of the record.  A record that
     * is absent, or that cannot be read at all, means we have not started.
     */
    pub fn read(&self, log: &Logger) -> Phase {
        match read_file(&self.path) {
            Ok(Some(data)) => Phase::parse(data.lines().next().unwrap_or("")),
            Ok(None) => Phase::Initial,
            Err(e) => {
                warn!(log, "state file {} unreadable ({:?}), assuming INITIAL",
                    self.path.display(), e);
                Phase::Initial
            }
        }
    }

    pub fn write(&self, log: &Logger, phase: &Phase) -> Result<()> {
        if let Phase::Unrecognised(_) = phase {
            bail!("refusing to persist {}", phase);
        }

        info!(log, "persist phase {}", phase);
        if let Some(dir) = self.path.parent() {
            crate::file::ensure_dir(log, dir)?;
        }
        write_file_atomic(&self.path, &format!("{}\n", phase.token()))
            .with_context(|| format!("writing phase {}", phase))
    }
}
