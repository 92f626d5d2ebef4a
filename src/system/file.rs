//! Advisory exclusive file locking, modeled on sudo-rs's
//! `timestamp::FileLock`: RAII acquire, explicit `unlock()` so errors
//! inside the locked section propagate before the guard is dropped.

use crate::common::Error;
use std::fs::File;
use std::os::unix::io::AsRawFd;

pub struct FileLock<'a> {
    file: &'a File,
    unlocked: bool,
}

impl<'a> FileLock<'a> {
    pub fn exclusive(file: &'a File) -> Result<FileLock<'a>, Error> {
        // SAFETY: `file`'s fd is valid for the duration of this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(FileLock {
            file,
            unlocked: false,
        })
    }

    /// Tries to acquire without blocking; used by callers that treat
    /// lock contention as "file absent" (the credential cache).
    pub fn try_exclusive(file: &'a File) -> Result<Option<FileLock<'a>>, Error> {
        // SAFETY: see `exclusive`.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(Some(FileLock {
                file,
                unlocked: false,
            }));
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Ok(None)
        } else {
            Err(Error::Io(err))
        }
    }

    pub fn unlock(mut self) -> Result<(), Error> {
        self.release()
    }

    fn release(&mut self) -> Result<(), Error> {
        if self.unlocked {
            return Ok(());
        }
        self.unlocked = true;
        // SAFETY: `self.file`'s fd is still open and was locked above.
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    #[test]
    fn exclusive_then_try_exclusive_fails() {
        let path = std::env::temp_dir().join(format!("sudosh-filelock-test-{}", std::process::id()));
        let f1 = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .unwrap();
        let _lock = FileLock::exclusive(&f1).unwrap();

        let f2 = OpenOptions::new().write(true).open(&path).unwrap();
        let attempt = FileLock::try_exclusive(&f2).unwrap();
        assert!(attempt.is_none());

        let _ = std::fs::remove_file(&path);
    }
}
