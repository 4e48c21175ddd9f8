/*
 * Copyright 2024 Oxide Computer Company
 */

use atty::Stream;
use slog::Drain;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

pub use anyhow::{anyhow, bail, Context, Result};
pub use slog::{error, info, o, warn, Logger};

/**
 * Append-only diagnostic log.  Each record becomes one line of the form
 * "[yyyy-MM-dd HH:mm:ss] message".  Writes are best effort: if the file cannot
 * be opened or written, the record is silently dropped so that logging never
 * interferes with the action being logged.
 */
pub struct FileDrain {
    path: PathBuf,
}

impl FileDrain {
    pub fn new<P: AsRef<Path>>(path: P) -> FileDrain {
        FileDrain { path: path.as_ref().to_path_buf() }
    }
}

pub fn log_line(when: chrono::NaiveDateTime, msg: &str) -> String {
    format!("[{}] {}\n", when.format("%Y-%m-%d %H:%M:%S"), msg)
}

impl Drain for FileDrain {
    type Ok = ();
    type Err = slog::Never;

    fn log(
        &self,
        record: &slog::Record,
        _values: &slog::OwnedKVList,
    ) -> std::result::Result<(), slog::Never> {
        let now = chrono::Local::now().naive_local();
        let line = log_line(now, &record.msg().to_string());

        if let Ok(mut f) =
            OpenOptions::new().create(true).append(true).open(&self.path)
        {
            f.write_all(line.as_bytes()).ok();
        }

        Ok(())
    }
}

/**
 * Initialise a logger which writes to stdout, and which does the right thing on
 * both an interactive terminal and when stdout is not a tty.  If a log file is
 * provided, every record is also appended to that file.
 */
pub fn init_log(file: Option<&Path>) -> Logger {
    let dec = slog_term::TermDecorator::new().stdout().build();
    if atty::is(Stream::Stdout) {
        let dr = Mutex::new(slog_term::CompactFormat::new(dec)
            .build()).fuse();
        root(dr, file)
    } else {
        let dr = Mutex::new(slog_term::FullFormat::new(dec)
            .use_original_order()
            .build()).fuse();
        root(dr, file)
    }
}

fn root<D>(term: D, file: Option<&Path>) -> Logger
where
    D: Drain<Ok = (), Err = slog::Never>
        + Send
        + Sync
        + std::panic::RefUnwindSafe
        + std::panic::UnwindSafe
        + 'static,
{
    match file {
        Some(path) => {
            let dr = slog::Duplicate::new(term, FileDrain::new(path))
                .ignore_res();
            slog::Logger::root(dr, o!())
        }
        None => slog::Logger::root(term, o!()),
    }
}

pub trait OutputExt {
    fn info(&self) -> String;
}

impl OutputExt for std::process::Output {
    fn info(&self) -> String {
        let mut out = String::new();

        if let Some(code) = self.status.code() {
            out.push_str(&format!("exit code {}", code));
        }

        /*
         * Attempt to render stderr from the command:
         */
        let stderr = String::from_utf8_lossy(&self.stderr).trim().to_string();
        let extra = if stderr.is_empty() {
            /*
             * If there is no stderr output, this command might emit its
             * failure message on stdout:
             */
            String::from_utf8_lossy(&self.stdout).trim().to_string()
        } else {
            stderr
        };

        if !extra.is_empty() {
            if !out.is_empty() {
                out.push_str(": ");
            }
            out.push_str(&extra);
        }

        out
    }
}

/**
 * Run a command to completion, failing if it does not exit successfully.  The
 * arguments are logged before execution; use exec_quiet() for invocations that
 * carry a credential.
 */
pub fn exec(
    log: &Logger,
    program: &str,
    args: &[&str],
) -> Result<std::process::Output> {
    info!(log, "exec: {} {}", program, args.join(" "));
    exec_quiet(program, args)
}

pub fn exec_quiet(program: &str, args: &[&str]) -> Result<std::process::Output> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("spawning {}", program))?;

    if !output.status.success() {
        bail!("{} {} failed: {}", program, args.first().unwrap_or(&""),
            output.info());
    }

    Ok(output)
}

pub fn sleep(ms: u64) {
    std::thread::sleep(std::time::Duration::from_millis(ms));
}
