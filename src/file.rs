/*
 * Copyright 2024 Oxide Computer Company
 */

use crate::common::*;
use serde::Deserialize;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

pub fn ensure_dir<P: AsRef<Path>>(log: &Logger, path: P) -> Result<()> {
    let path = path.as_ref();
    if !exists_dir(path)? {
        info!(log, "mkdir {}", path.display());
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

pub fn exists_dir<P: AsRef<Path>>(p: P) -> Result<bool> {
    let p = p.as_ref();
    let md = match std::fs::metadata(p) {
        Ok(md) => md,
        Err(e) => match e.kind() {
            ErrorKind::NotFound => return Ok(false),
            _ => bail!("checking {}: {}", p.display(), e),
        },
    };

    if !md.is_dir() {
        bail!("\"{}\" exists but is not a directory", p.display());
    }

    Ok(true)
}

pub fn exists_file<P: AsRef<Path>>(p: P) -> Result<bool> {
    let p = p.as_ref();
    let md = match std::fs::metadata(p) {
        Ok(md) => md,
        Err(e) => match e.kind() {
            ErrorKind::NotFound => return Ok(false),
            _ => bail!("checking {}: {}", p.display(), e),
        },
    };

    if !md.is_file() {
        bail!("\"{}\" exists but is not a file", p.display());
    }

    Ok(true)
}

pub fn read_file<P: AsRef<Path>>(p: P) -> Result<Option<String>> {
    let p = p.as_ref();
    let f = match File::open(p) {
        Ok(f) => f,
        Err(e) => {
            match e.kind() {
                ErrorKind::NotFound => return Ok(None),
                _ => bail!("open \"{}\": {}", p.display(), e),
            };
        }
    };
    let mut r = std::io::BufReader::new(f);
    let mut out = String::new();
    r.read_to_string(&mut out)?;
    Ok(Some(out))
}

pub fn read_toml<T, P>(p: P) -> Result<Option<T>>
where
    for<'de> T: Deserialize<'de>,
    P: AsRef<Path>,
{
    let p = p.as_ref();
    match read_file(p)? {
        None => Ok(None),
        Some(s) => Ok(Some(
            toml::from_str(&s)
                .with_context(|| format!("parsing {}", p.display()))?,
        )),
    }
}

pub fn write_file<P: AsRef<Path>>(p: P, data: &str) -> Result<()> {
    let f = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(p.as_ref())?;
    let mut w = std::io::BufWriter::new(f);
    w.write_all(data.as_bytes())?;
    w.flush()?;
    Ok(())
}

/**
 * Replace the contents of a file such that a crash at any point leaves either
 * the complete old contents or the complete new contents.  The data is written
 * to a temporary file in the same directory, flushed to disk, and then renamed
 * over the target.
 */
pub fn write_file_atomic<P: AsRef<Path>>(p: P, data: &str) -> Result<()> {
    let p = p.as_ref();
    let dir = match p.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };

    let mut tf = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("temporary file in {}", dir.display()))?;
    tf.write_all(data.as_bytes())?;
    tf.as_file().sync_all()?;
    tf.persist(p)
        .with_context(|| format!("replacing {}", p.display()))?;
    Ok(())
}
