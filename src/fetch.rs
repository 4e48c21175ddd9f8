/*
 * Copyright 2024 Oxide Computer Company
 */

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::common::*;
use crate::file::exists_dir;

/**
 * Download a remote asset into a local file, retrying a bounded number of
 * times on transport errors or server-side failures.  If an expected SHA-256
 * digest is provided the contents must match it; otherwise the asset is
 * accepted as-is.
 */
pub fn download(
    log: &Logger,
    url: &str,
    dest: &Path,
    attempts: u32,
    sha256: Option<&str>,
) -> Result<()> {
    let client = reqwest::blocking::ClientBuilder::new()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let mut attempt = 0;
    let body = loop {
        attempt += 1;
        info!(log, "fetch {} (attempt {}/{})", url, attempt, attempts);

        match client.get(url).send() {
            Ok(res) => {
                let status = res.status();
                if status.is_client_error() {
                    bail!("fetch {}: status {}", url, status);
                } else if !status.is_success() {
                    error!(log, "fetch {}: bad status {}", url, status);
                } else {
                    /*
                     * The body can still fail part way through, which is
                     * no different from a failed connection.
                     */
                    match res.bytes() {
                        Ok(body) => break body,
                        Err(e) => error!(log, "fetch {}: reading body: {}",
                            url, e),
                    }
                }
            }
            Err(e) => {
                error!(log, "fetch {}: {}", url, e);
            }
        }

        if attempt >= attempts.max(1) {
            bail!("fetch {}: giving up after {} attempts", url, attempt);
        }
        sleep(5_000);
    };

    match sha256 {
        Some(expected) => {
            verify_sha256(&body, expected)
                .with_context(|| format!("verifying {}", url))?;
            info!(log, "fetch {}: digest ok", url);
        }
        None => {
            warn!(log, "fetch {}: no digest configured, contents unverified",
                url);
        }
    }

    if let Some(dir) = dest.parent() {
        crate::file::ensure_dir(log, dir)?;
    }
    std::fs::write(dest, &body)
        .with_context(|| format!("writing {}", dest.display()))?;
    info!(log, "fetched {} bytes to {}", body.len(), dest.display());
    Ok(())
}

pub fn verify_sha256(data: &[u8], expected: &str) -> Result<()> {
    let actual = hex::encode(Sha256::digest(data));
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        bail!("SHA-256 mismatch: expected {}, got {}", expected.trim(), actual);
    }
    Ok(())
}

/**
 * Archives from source forges usually wrap everything in one versioned
 * top-level directory (e.g., "noVNC-1.4.0").  If the staging directory holds
 * exactly one directory and nothing else, move that directory to the
 * destination; otherwise move the staging directory itself.  Any previous
 * destination is removed first.
 */
pub fn promote_unpacked(log: &Logger, staging: &Path, dest: &Path) -> Result<()> {
    let entries = std::fs::read_dir(staging)?
        .collect::<std::io::Result<Vec<_>>>()?;

    let src = match entries.as_slice() {
        [one] if one.file_type()?.is_dir() => one.path(),
        _ => staging.to_path_buf(),
    };

    if exists_dir(dest)? {
        info!(log, "removing previous {}", dest.display());
        std::fs::remove_dir_all(dest)?;
    }
    if let Some(dir) = dest.parent() {
        crate::file::ensure_dir(log, dir)?;
    }

    info!(log, "rename {} -> {}", src.display(), dest.display());
    std::fs::rename(&src, dest)?;

    if src != staging && exists_dir(staging)? {
        std::fs::remove_dir_all(staging)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::test_log;

    #[test]
    fn digest_match() -> Result<()> {
        /*
         * SHA-256 of the empty string:
         */
        let empty = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        verify_sha256(b"", empty)?;
        verify_sha256(b"", &empty.to_uppercase())?;
        assert!(verify_sha256(b"x", empty).is_err());
        Ok(())
    }

    /**
     * Serve the given responses, one per connection, and return the URL.
     */
    fn serve(responses: Vec<Vec<u8>>) -> Result<String> {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}/novnc.zip", listener.local_addr()?);

        std::thread::spawn(move || {
            for res in responses {
                let Ok((mut conn, _)) = listener.accept() else { return };
                let mut req = Vec::new();
                let mut buf = [0u8; 1024];
                while !req.windows(4).any(|w| w == b"\r\n\r\n") {
                    match conn.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => req.extend_from_slice(&buf[..n]),
                    }
                }
                conn.write_all(&res).ok();
            }
        });

        Ok(url)
    }

    #[test]
    fn truncated_body_is_retried() -> Result<()> {
        let log = test_log();
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("novnc.zip");

        let short = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\
            Connection: close\r\n\r\npartial".to_vec();
        let full = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\
            Connection: close\r\n\r\nhello".to_vec();
        let url = serve(vec![short, full])?;

        download(&log, &url, &dest, 3, None)?;
        assert_eq!(std::fs::read(&dest)?, b"hello");
        Ok(())
    }

    #[test]
    fn truncated_body_exhausts_attempts() -> Result<()> {
        let log = test_log();
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("novnc.zip");

        let short = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\
            Connection: close\r\n\r\npartial".to_vec();
        let url = serve(vec![short])?;

        let e = download(&log, &url, &dest, 1, None).unwrap_err();
        assert!(e.to_string().contains("giving up after 1 attempts"));
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn promote_single_top_level_dir() -> Result<()> {
        let log = test_log();
        let dir = tempfile::tempdir()?;
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(staging.join("noVNC-1.4.0").join("app"))?;
        std::fs::write(staging.join("noVNC-1.4.0").join("vnc.html"), "x")?;

        let dest = dir.path().join("noVNC");
        std::fs::create_dir_all(&dest)?;
        std::fs::write(dest.join("stale.html"), "old")?;

        promote_unpacked(&log, &staging, &dest)?;

        assert!(dest.join("vnc.html").is_file());
        assert!(dest.join("app").is_dir());
        assert!(!dest.join("stale.html").exists());
        assert!(!staging.exists());
        Ok(())
    }

    #[test]
    fn promote_flat_archive() -> Result<()> {
        let log = test_log();
        let dir = tempfile::tempdir()?;
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging)?;
        std::fs::write(staging.join("vnc.html"), "x")?;
        std::fs::write(staging.join("vnc_lite.html"), "y")?;

        let dest = dir.path().join("noVNC");
        promote_unpacked(&log, &staging, &dest)?;

        assert!(dest.join("vnc.html").is_file());
        assert!(dest.join("vnc_lite.html").is_file());
        Ok(())
    }
}
