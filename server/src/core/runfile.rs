//! Process state files
//!
//! A lock file records the pid and listen address; a sibling file records
//! the server URL. Both are created at start and removed on clean shutdown.
//! Staleness needs no pid probing: the lock is an OS advisory lock, so a
//! dead holder releases it and the next start simply re-acquires and
//! overwrites the entries.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::constants::{RUN_FILE_NAME, URL_FILE_NAME};

/// Contents of the lock file
#[derive(Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub pid: u32,
    pub addr: String,
}

/// Holds the run lock for the process lifetime; releases on drop
///
/// The guard removes both files on all exit paths that unwind or return
/// normally; a killed process leaves the files behind but also releases
/// the advisory lock, so the entries are ignored on next start.
pub struct RunFile {
    lock_file: File,
    lock_path: PathBuf,
    url_path: PathBuf,
}

impl RunFile {
    /// Acquire the run lock and write the pid/address and URL files
    pub fn acquire(data_dir: &Path, addr: &str, url: &str) -> Result<Self> {
        let lock_path = data_dir.join(RUN_FILE_NAME);
        let url_path = data_dir.join(URL_FILE_NAME);

        let mut lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        if lock_file.try_lock_exclusive().is_err() {
            // Live holder: surface who has it
            let mut raw = String::new();
            let _ = lock_file.read_to_string(&mut raw);
            let holder = serde_json::from_str::<RunRecord>(&raw).ok();
            match holder {
                Some(record) => anyhow::bail!(
                    "Another instance is already running (pid {}, {})",
                    record.pid,
                    record.addr
                ),
                None => anyhow::bail!("Another instance is already running"),
            }
        }

        let record = RunRecord {
            pid: std::process::id(),
            addr: addr.to_string(),
        };
        lock_file.set_len(0)?;
        lock_file.rewind()?;
        lock_file.write_all(serde_json::to_string(&record)?.as_bytes())?;
        lock_file.flush()?;

        std::fs::write(&url_path, url)
            .with_context(|| format!("Failed to write URL file: {}", url_path.display()))?;

        tracing::debug!(
            lock = %lock_path.display(),
            pid = record.pid,
            "Run files created"
        );

        Ok(Self {
            lock_file,
            lock_path,
            url_path,
        })
    }
}

impl Drop for RunFile {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock_file);
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            tracing::warn!(error = %e, "Failed to remove lock file");
        }
        if let Err(e) = std::fs::remove_file(&self.url_path) {
            tracing::warn!(error = %e, "Failed to remove URL file");
        }
        tracing::debug!("Run files released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_and_drop_removes() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(RUN_FILE_NAME);
        let url_path = dir.path().join(URL_FILE_NAME);

        {
            let _run = RunFile::acquire(dir.path(), "127.0.0.1:7437", "http://127.0.0.1:7437")
                .unwrap();
            assert!(lock_path.exists());
            assert_eq!(
                std::fs::read_to_string(&url_path).unwrap(),
                "http://127.0.0.1:7437"
            );
            let record: RunRecord =
                serde_json::from_str(&std::fs::read_to_string(&lock_path).unwrap()).unwrap();
            assert_eq!(record.pid, std::process::id());
        }

        assert!(!lock_path.exists());
        assert!(!url_path.exists());
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let _run =
            RunFile::acquire(dir.path(), "127.0.0.1:7437", "http://127.0.0.1:7437").unwrap();
        let second = RunFile::acquire(dir.path(), "127.0.0.1:7438", "http://127.0.0.1:7438");
        assert!(second.is_err());
    }

    #[test]
    fn test_stale_entries_are_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        // Simulate a crashed holder: file present, lock not held
        std::fs::write(
            dir.path().join(RUN_FILE_NAME),
            r#"{"pid": 999999, "addr": "127.0.0.1:1"}"#,
        )
        .unwrap();

        let _run =
            RunFile::acquire(dir.path(), "127.0.0.1:7437", "http://127.0.0.1:7437").unwrap();
        let record: RunRecord = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(RUN_FILE_NAME)).unwrap(),
        )
        .unwrap();
        assert_eq!(record.pid, std::process::id());
    }
}
