//! Process-group signalling.
//!
//! The broker is launched as the leader of its own process group, so
//! signalling the group also reaches anything it forked.

use ville_types::VilleError;

/// A signal the supervisor sends to the broker's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    Kill,
}

impl std::fmt::Display for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopSignal::Terminate => f.write_str("SIGTERM"),
            StopSignal::Kill => f.write_str("SIGKILL"),
        }
    }
}

/// Send `signal` to the process group led by `pgid`.
///
/// A group that no longer exists is not an error.
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: StopSignal) -> Result<(), VilleError> {
    let sig = match signal {
        StopSignal::Terminate => libc::SIGTERM,
        StopSignal::Kill => libc::SIGKILL,
    };
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| VilleError::BrokerStop(format!("pid {pgid} out of range")))?;
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid, sig) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(VilleError::BrokerStop(format!("{signal} to group {pgid}: {err}")))
    }
}

/// Without process groups only the child itself can be killed; the caller
/// falls back to `Child::start_kill`.
#[cfg(not(unix))]
pub fn signal_group(_pgid: u32, _signal: StopSignal) -> Result<(), VilleError> {
    Err(VilleError::BrokerStop(
        "process-group signals are not supported on this platform".to_string(),
    ))
}
