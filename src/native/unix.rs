//! Unix signal delivery.
//!
//! `ESRCH` (no such process) and `EPERM` (pid recycled by a process we do not
//! own) both mean "nothing of ours left to signal" and are reported as
//! `Ok(false)`, not as errors.

use std::io;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::{Pid, getpgid};

use crate::native::ProcessTable;

pub(crate) use nix::sys::signal::Signal::{SIGKILL, SIGTERM};

fn to_pid(pid: u32) -> io::Result<Pid> {
    // 0 and -1 address whole groups or every process; 1 is init.
    match i32::try_from(pid) {
        Ok(raw) if raw > 1 => Ok(Pid::from_raw(raw)),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        )),
    }
}

fn delivered(res: nix::Result<()>) -> io::Result<bool> {
    match res {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) | Err(Errno::EPERM) => Ok(false),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Sends `sig` to one process. Returns false if it no longer exists.
pub(crate) fn signal_process(pid: u32, sig: Signal) -> io::Result<bool> {
    delivered(kill(to_pid(pid)?, sig))
}

/// Sends `sig` to every member of process group `pgid`.
pub(crate) fn signal_group(pgid: u32, sig: Signal) -> io::Result<bool> {
    delivered(killpg(to_pid(pgid)?, sig))
}

/// Process group id of `pid`, or `None` if the process is gone.
pub(crate) fn group_of(pid: u32) -> io::Result<Option<u32>> {
    match getpgid(Some(to_pid(pid)?)) {
        Ok(pgid) => Ok(Some(pgid.as_raw() as u32)),
        Err(Errno::ESRCH) => Ok(None),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Live members of process group `pgid`, sorted.
pub(crate) fn group_members(pgid: u32) -> io::Result<Vec<u32>> {
    let table = ProcessTable::capture()?;
    Ok(table
        .pids()
        .into_iter()
        .filter(|&pid| matches!(group_of(pid), Ok(Some(g)) if g == pgid))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_reserved_pids() {
        for pid in [0, 1, u32::MAX] {
            let err = signal_process(pid, SIGTERM).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
        assert!(signal_group(0, SIGKILL).is_err());
    }

    #[test]
    fn test_missing_process_is_not_an_error() {
        // Max pid on Linux is 2^22; this one cannot exist.
        let ghost = 0x7fff_fff0;
        assert!(!signal_process(ghost, SIGTERM).unwrap());
        assert!(!signal_group(ghost, SIGKILL).unwrap());
    }

    #[test]
    fn test_group_of_self() {
        let me = std::process::id();
        assert!(signal_process(me, Signal::SIGCONT).unwrap());
        assert!(group_of(me).unwrap().is_some_and(|pgid| pgid > 0));
        assert_eq!(group_of(0x7fff_fff0).unwrap(), None);
    }

    #[test]
    fn test_group_members_include_self() {
        let me = std::process::id();
        let pgid = group_of(me).unwrap().unwrap();
        assert!(group_members(pgid).unwrap().contains(&me));
    }
}
