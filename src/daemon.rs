/*! Process plumbing: going to the background and the PID file. */

use crate::error::{Error, Result};
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, close, dup2, fork, setsid, ForkResult};
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process;

pub const DEFAULT_PID_PATH: &str = "/var/run/eapol-proxy.pid";

/// Classic double fork: detach from the controlling terminal, drop into
/// a fresh session, chdir to the root, and point stdio at the null
/// device.  Anything worth saying after this goes through the log.
pub fn daemonize() -> Result<()> {
    if let ForkResult::Parent { .. } = unsafe { fork() }.map_err(io::Error::from)? {
        process::exit(0);
    }
    setsid().map_err(io::Error::from)?;
    if let ForkResult::Parent { .. } = unsafe { fork() }.map_err(io::Error::from)? {
        process::exit(0);
    }
    chdir("/").map_err(io::Error::from)?;
    let null = open("/dev/null", OFlag::O_RDWR, Mode::empty()).map_err(io::Error::from)?;
    for fd in 0..=2 {
        dup2(null, fd).map_err(io::Error::from)?;
    }
    if null > 2 {
        close(null).map_err(io::Error::from)?;
    }
    Ok(())
}

/// The PID file, held (and locked) for the daemon's lifetime.
///
/// Taking it: lock the file exclusively, check whether the PID already
/// in it belongs to a live process, then rewind, write our own PID,
/// fsync, and read it back.  Refuses to start over a live instance.
pub struct PidFile {
    file: std::fs::File,
    path: PathBuf,
}

impl PidFile {
    pub fn take(path: &Path) -> Result<PidFile> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o644)
            .open(path)?;

        let mut contents = String::new();
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } < 0 {
            // Someone holds the lock; the advisory lock doesn't stop us
            // reading who.
            file.read_to_string(&mut contents)?;
            return Err(Error::AlreadyRunning(
                contents.trim().parse().unwrap_or(-1),
            ));
        }

        file.read_to_string(&mut contents)?;
        if let Ok(pid) = contents.trim().parse::<i32>() {
            if pid > 0 && pid != process::id() as i32 && alive(pid) {
                return Err(Error::AlreadyRunning(pid));
            }
        }

        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        writeln!(file, "{}", process::id())?;
        file.sync_all()?;

        file.seek(SeekFrom::Start(0))?;
        let mut back = String::new();
        file.read_to_string(&mut back)?;
        if back.trim().parse::<u32>() != Ok(process::id()) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("{}: PID read-back mismatch", path.display()),
            )));
        }
        Ok(PidFile {
            file,
            path: path.to_owned(),
        })
    }
}

/// A process exists if `kill(pid, 0)` succeeds, or fails with EPERM
/// (it exists, it just isn't ours).
fn alive(pid: i32) -> bool {
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Unlink before the fd (and with it the lock) goes away.
        let _ = std::fs::remove_file(&self.path);
        let _ = self.file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn writes_own_pid_with_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pid");
        let pidfile = PidFile::take(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{}\n", process::id()));
        drop(pidfile);
        assert!(!path.exists());
    }

    #[test]
    fn second_take_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pid");
        let _held = PidFile::take(&path).unwrap();
        // A second open file description conflicts on the flock.
        assert!(matches!(
            PidFile::take(&path),
            Err(Error::AlreadyRunning(_))
        ));
    }

    #[test]
    fn stale_pid_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pid");
        // A PID far above any real pid_max: guaranteed dead.
        std::fs::write(&path, "999999999\n").unwrap();
        let _pidfile = PidFile::take(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim().parse::<u32>().unwrap(), process::id());
    }
}
