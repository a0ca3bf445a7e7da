//! [`BrokerSupervisor`] – runs the MQTT broker as a child process.
//!
//! Start-up is a sequence of checks, each with its own failure:
//!
//! 1. **Probe** – run `<exe> <probe_args>`; a spawn failure or an exit code
//!    outside `probe_ok_codes` means the broker is not installed
//!    ([`VilleError::BrokerMissing`]).
//! 2. **Launch** – spawn `<exe> <args>` as the leader of a new process group.
//! 3. **Grace period** – wait `startup_grace`, then require the process to
//!    still be alive.
//! 4. **Readiness** – optionally wait until the port accepts TCP connections.
//!
//! Failures in steps 2–4 are [`VilleError::BrokerStartFailed`]; anything
//! already spawned is stopped before the error is returned.
//!
//! Stopping sends `SIGTERM` to the group, waits `stop_timeout`, then sends
//! `SIGKILL`.  Stop never blocks indefinitely and is idempotent.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};
use ville_types::VilleError;

use crate::signal::{StopSignal, signal_group};

/// Placeholder in launch arguments replaced by the configured port.
pub const PORT_PLACEHOLDER: &str = "{port}";

const READINESS_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub executable: PathBuf,
    /// Launch arguments; `{port}` is substituted.
    pub args: Vec<String>,
    pub probe_args: Vec<String>,
    /// Exit codes of the probe that count as "installed".  `mosquitto -h`
    /// exits with 3.
    pub probe_ok_codes: Vec<i32>,
    /// Host used for the readiness probe.
    pub host: String,
    pub port: u16,
    pub startup_grace: Duration,
    /// `None` skips the readiness probe.
    pub readiness_timeout: Option<Duration>,
    pub stop_timeout: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("mosquitto"),
            args: vec!["-p".to_string(), PORT_PLACEHOLDER.to_string()],
            probe_args: vec!["-h".to_string()],
            probe_ok_codes: vec![0, 3],
            host: "127.0.0.1".to_string(),
            port: 1883,
            startup_grace: Duration::from_millis(500),
            readiness_timeout: Some(Duration::from_secs(5)),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl BrokerSettings {
    /// Launch arguments with the port filled in.
    pub fn launch_args(&self) -> Vec<String> {
        let port = self.port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }

    fn executable_name(&self) -> String {
        self.executable.display().to_string()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BrokerSupervisor
// ────────────────────────────────────────────────────────────────────────────

pub struct BrokerSupervisor {
    settings: BrokerSettings,
    child: Option<Child>,
}

impl BrokerSupervisor {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            child: None,
        }
    }

    /// Process id of the running broker, if one was started.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// `true` while the broker process has not exited.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_))) | Some(Err(_)) | None => false,
        }
    }

    /// Probe, launch and wait for the broker.  Does nothing if it is
    /// already running.
    pub async fn start(&mut self) -> Result<(), VilleError> {
        if self.is_running() {
            debug!("broker already running");
            return Ok(());
        }
        self.child = None;

        self.probe().await?;
        self.launch()?;

        if let Err(e) = self.await_startup().await {
            error!(error = %e, "broker failed to start; cleaning up");
            if let Err(stop_err) = self.stop().await {
                warn!(error = %stop_err, "cleanup after failed start");
            }
            return Err(e);
        }

        info!(
            pid = self.pid(),
            port = self.settings.port,
            "broker started"
        );
        Ok(())
    }

    async fn probe(&self) -> Result<(), VilleError> {
        let missing = |details: String| VilleError::BrokerMissing {
            executable: self.settings.executable_name(),
            details,
        };

        let status = Command::new(&self.settings.executable)
            .args(&self.settings.probe_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| missing(e.to_string()))?;

        match status.code() {
            Some(code) if self.settings.probe_ok_codes.contains(&code) => Ok(()),
            _ => Err(missing(format!("probe exited with {status}"))),
        }
    }

    fn launch(&mut self) -> Result<(), VilleError> {
        let args = self.settings.launch_args();
        let mut cmd = Command::new(&self.settings.executable);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            VilleError::BrokerStartFailed(format!(
                "spawn `{}`: {e}",
                self.settings.executable_name()
            ))
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "broker", "{line}");
                }
            });
        }

        debug!(pid = child.id(), ?args, "broker spawned");
        self.child = Some(child);
        Ok(())
    }

    async fn await_startup(&mut self) -> Result<(), VilleError> {
        sleep(self.settings.startup_grace).await;
        self.ensure_alive()?;

        let Some(limit) = self.settings.readiness_timeout else {
            return Ok(());
        };
        let deadline = Instant::now() + limit;
        let addr = (self.settings.host.clone(), self.settings.port);
        loop {
            // A silently dropped SYN must not outlive the deadline.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Ok(Ok(_)) = timeout(remaining, TcpStream::connect(addr.clone())).await {
                return Ok(());
            }
            self.ensure_alive()?;
            if Instant::now() >= deadline {
                return Err(VilleError::BrokerStartFailed(format!(
                    "{}:{} not accepting connections after {limit:?}",
                    addr.0, addr.1
                )));
            }
            sleep(READINESS_POLL).await;
        }
    }

    fn ensure_alive(&mut self) -> Result<(), VilleError> {
        let Some(child) = self.child.as_mut() else {
            return Err(VilleError::BrokerStartFailed("broker was never spawned".to_string()));
        };
        match child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => Err(VilleError::BrokerStartFailed(format!(
                "broker exited during startup with {status}"
            ))),
            Err(e) => Err(VilleError::BrokerStartFailed(format!("wait on broker: {e}"))),
        }
    }

    /// Terminate the broker, escalating to `SIGKILL` after `stop_timeout`.
    pub async fn stop(&mut self) -> Result<(), VilleError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            info!(%status, "broker had already exited");
            return Ok(());
        }
        let Some(pid) = child.id() else {
            return Ok(());
        };

        info!(pid, "stopping broker");
        if let Err(e) = signal_group(pid, StopSignal::Terminate) {
            warn!(pid, error = %e, "SIGTERM failed; killing broker");
            return kill_and_reap(&mut child, pid, self.settings.stop_timeout).await;
        }

        match timeout(self.settings.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid, %status, "broker stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(VilleError::BrokerStop(format!("wait on broker: {e}"))),
            Err(_) => {
                warn!(
                    pid,
                    timeout = ?self.settings.stop_timeout,
                    "broker ignored SIGTERM; sending SIGKILL"
                );
                kill_and_reap(&mut child, pid, self.settings.stop_timeout).await
            }
        }
    }
}

async fn kill_and_reap(child: &mut Child, pid: u32, limit: Duration) -> Result<(), VilleError> {
    if signal_group(pid, StopSignal::Kill).is_err() {
        child
            .start_kill()
            .map_err(|e| VilleError::BrokerStop(format!("kill broker: {e}")))?;
    }
    match timeout(limit, child.wait()).await {
        Ok(Ok(status)) => {
            warn!(pid, %status, "broker was forcefully terminated");
            Ok(())
        }
        Ok(Err(e)) => Err(VilleError::BrokerStop(format!("wait on broker: {e}"))),
        Err(_) => Err(VilleError::BrokerStop(format!(
            "broker {pid} survived SIGKILL for {limit:?}"
        ))),
    }
}

impl Drop for BrokerSupervisor {
    fn drop(&mut self) {
        // kill_on_drop only reaches the group leader.
        if let Some(pid) = self.child.as_ref().and_then(Child::id) {
            let _ = signal_group(pid, StopSignal::Kill);
        }
    }
}
