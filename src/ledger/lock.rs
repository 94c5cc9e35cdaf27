use crate::error::Error;
use anyhow::Result;
use fs4::fs_std::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Single-writer guard for a ledger file.
///
/// An exclusive advisory lock on `<ledger>.lock`, held for the lifetime of the
/// guard. The OS drops the lock when the process exits, so a lock file left by
/// a killed run does not block the next one. The file itself is never removed.
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
    _file: File,
}

impl LedgerLock {
    pub fn acquire(ledger_path: &Path) -> Result<Self> {
        let path = lock_path(ledger_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                Error::Io(format!(
                    "Failed to open lock file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.kind() == fs4::lock_contended_error().kind() {
                return Err(Error::LedgerLocked(path.display().to_string()).into());
            }
            return Err(Error::Io(format!("Failed to lock {}: {}", path.display(), e)).into());
        }

        if let Err(e) = write_owner(&mut file) {
            debug!("Could not record owner in {}: {}", path.display(), e);
        }
        debug!("Acquired ledger lock {}", path.display());

        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        debug!("Released ledger lock {}", self.path.display());
    }
}

/// Owner pid, informative only
fn write_owner(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())
}

fn lock_path(ledger_path: &Path) -> PathBuf {
    let mut name = ledger_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_and_released() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = dir.path().join("cameras.csv");

        let lock = LedgerLock::acquire(&ledger)?;
        assert_eq!(lock.path(), dir.path().join("cameras.csv.lock"));

        let second = LedgerLock::acquire(&ledger);
        let err = second.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::LedgerLocked(_))
        ));

        drop(lock);
        assert!(LedgerLock::acquire(&ledger).is_ok());
        Ok(())
    }

    #[test]
    fn test_leftover_lock_file_does_not_block() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = dir.path().join("c.csv");
        // Left behind by a run that was killed mid-write
        std::fs::write(dir.path().join("c.csv.lock"), "999999\n")?;

        let lock = LedgerLock::acquire(&ledger)?;
        let owner = std::fs::read_to_string(lock.path())?;
        assert_eq!(owner.trim(), std::process::id().to_string());
        Ok(())
    }
}
