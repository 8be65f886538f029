//! Agent process supervision.
//!
//! [`AgentRunner`] is the contract the lifecycles drive: start the local
//! agent subprocess, stop it, wait for it to exit, persist its PID and
//! clean up. [`ProcessRunner`] is the real implementation over
//! `tokio::process`; the bootstrap probe uses the same contract for its
//! throwaway agent.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::errors::CoordError;

/// Boxed future returned by [`AgentRunner`] operations.
pub type RunnerFut<'a> = Pin<Box<dyn Future<Output = Result<(), CoordError>> + Send + 'a>>;

/// Poll interval while waiting for a non-child agent process to exit.
const EXIT_POLL: Duration = Duration::from_millis(200);

/// Contract for supervising the agent OS process.
pub trait AgentRunner: Send + Sync {
    /// Spawn the agent process.
    fn run(&self) -> RunnerFut<'_>;

    /// Force the agent process to stop.
    fn stop(&self) -> RunnerFut<'_>;

    /// Block until the agent process has exited.
    fn wait(&self) -> RunnerFut<'_>;

    /// Remove the PID file and any other runner-owned state.
    fn cleanup(&self) -> RunnerFut<'_>;

    /// Persist the agent's process id to the PID file.
    fn write_pid(&self) -> RunnerFut<'_>;
}

/// Real [`AgentRunner`] over `tokio::process`.
pub struct ProcessRunner {
    binary: PathBuf,
    args: Vec<String>,
    pid_file: PathBuf,
    child: Mutex<Option<Child>>,
}

impl ProcessRunner {
    pub fn new(binary: PathBuf, args: Vec<String>, pid_file: PathBuf) -> Self {
        Self {
            binary,
            args,
            pid_file,
            child: Mutex::new(None),
        }
    }

    /// Runner for the configured agent, reading its config fragments
    /// from the config's agent directory.
    pub fn for_agent(config: &NodeConfig) -> Self {
        let args = vec![
            "agent".to_string(),
            format!("-config-dir={}", config.paths.config_dir.display()),
        ];
        Self::new(
            config.paths.agent_binary.clone(),
            args,
            config.paths.pid_file.clone(),
        )
    }

    /// PID recorded by a previous coordinator invocation, if any.
    fn recorded_pid(&self) -> Option<u32> {
        let contents = std::fs::read_to_string(&self.pid_file).ok()?;
        contents.trim().parse().ok()
    }

    fn proc_alive(pid: u32) -> bool {
        Path::new(&format!("/proc/{pid}")).exists()
    }

    /// Refuse to start over a live agent; drop a stale PID file.
    ///
    /// This is what keeps two coordinator invocations from racing each
    /// other on the same node.
    fn check_stale_pid(&self) -> Result<(), CoordError> {
        if !self.pid_file.exists() {
            return Ok(());
        }
        if let Some(pid) = self.recorded_pid() {
            if Self::proc_alive(pid) {
                return Err(CoordError::Config(format!(
                    "agent already running with pid {pid} (per {})",
                    self.pid_file.display()
                )));
            }
        }
        warn!(
            "removing stale PID file {} (recorded process is gone)",
            self.pid_file.display()
        );
        std::fs::remove_file(&self.pid_file)?;
        Ok(())
    }

    /// SIGTERM the PID recorded by an earlier invocation.
    ///
    /// `stop` and `wait` normally act on the child spawned by `run`, but
    /// the stop lifecycle runs in its own coordinator invocation where no
    /// such child exists; the PID file is the only handle on the agent.
    fn signal_recorded(&self, pid: u32) -> Result<(), CoordError> {
        info!("forcing stop of recorded agent pid {pid}");
        // SAFETY: kill only delivers a signal; no memory is touched.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            // The process exited between the liveness check and the signal.
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(CoordError::Io(err));
            }
        }
        Ok(())
    }
}

impl AgentRunner for ProcessRunner {
    fn run(&self) -> RunnerFut<'_> {
        Box::pin(async move {
            self.check_stale_pid()?;
            info!(
                "starting agent: {} {}",
                self.binary.display(),
                self.args.join(" ")
            );
            let child = Command::new(&self.binary).args(&self.args).spawn()?;
            *self.child.lock().await = Some(child);
            Ok(())
        })
    }

    fn stop(&self) -> RunnerFut<'_> {
        Box::pin(async move {
            let mut guard = self.child.lock().await;
            if let Some(child) = guard.as_mut() {
                info!("forcing agent process stop");
                match child.start_kill() {
                    Ok(()) => Ok(()),
                    // Already exited; nothing left to kill.
                    Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
                    Err(e) => Err(CoordError::Io(e)),
                }
            } else if let Some(pid) = self.recorded_pid() {
                if Self::proc_alive(pid) {
                    self.signal_recorded(pid)
                } else {
                    Ok(())
                }
            } else {
                warn!("no agent process recorded; nothing to stop");
                Ok(())
            }
        })
    }

    fn wait(&self) -> RunnerFut<'_> {
        Box::pin(async move {
            let mut guard = self.child.lock().await;
            if let Some(child) = guard.as_mut() {
                let status = child.wait().await?;
                info!("agent process exited with {status}");
                *guard = None;
            } else if let Some(pid) = self.recorded_pid() {
                // Not our child, so there is no exit status to reap;
                // the /proc entry disappearing is the exit signal.
                while Self::proc_alive(pid) {
                    tokio::time::sleep(EXIT_POLL).await;
                }
                info!("recorded agent pid {pid} has exited");
            }
            Ok(())
        })
    }

    fn cleanup(&self) -> RunnerFut<'_> {
        Box::pin(async move {
            match std::fs::remove_file(&self.pid_file) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(CoordError::Io(e)),
            }
        })
    }

    fn write_pid(&self) -> RunnerFut<'_> {
        Box::pin(async move {
            let guard = self.child.lock().await;
            let pid = guard.as_ref().and_then(Child::id).ok_or_else(|| {
                CoordError::Config("agent process id is not available".to_string())
            })?;
            if let Some(parent) = self.pid_file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&self.pid_file, format!("{pid}\n"))?;
            info!("wrote pid {pid} to {}", self.pid_file.display());
            Ok(())
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_for(binary: &str, args: &[&str], pid_file: PathBuf) -> ProcessRunner {
        ProcessRunner::new(
            PathBuf::from(binary),
            args.iter().map(|s| s.to_string()).collect(),
            pid_file,
        )
    }

    #[tokio::test]
    async fn run_write_pid_wait_cleanup_round_trip() {
        let scratch = tempfile::tempdir().unwrap();
        let pid_file = scratch.path().join("agent.pid");
        let runner = runner_for("sleep", &["10"], pid_file.clone());

        runner.run().await.unwrap();
        runner.write_pid().await.unwrap();
        let recorded: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(recorded > 0);

        runner.stop().await.unwrap();
        runner.wait().await.unwrap();

        runner.cleanup().await.unwrap();
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn wait_after_natural_exit_succeeds() {
        let scratch = tempfile::tempdir().unwrap();
        let runner = runner_for("true", &[], scratch.path().join("agent.pid"));
        runner.run().await.unwrap();
        runner.wait().await.unwrap();
        // Waiting twice is harmless.
        runner.wait().await.unwrap();
    }

    #[tokio::test]
    async fn refuses_to_start_over_a_live_pid() {
        let scratch = tempfile::tempdir().unwrap();
        let pid_file = scratch.path().join("agent.pid");
        // Our own pid is certainly alive.
        std::fs::write(&pid_file, format!("{}\n", std::process::id())).unwrap();

        let runner = runner_for("true", &[], pid_file);
        let err = runner.run().await.unwrap_err();
        assert!(err.to_string().contains("already running"));
    }

    #[tokio::test]
    async fn stale_pid_file_is_swept_aside() {
        let scratch = tempfile::tempdir().unwrap();
        let pid_file = scratch.path().join("agent.pid");
        // Max pid on Linux is far below this; the process cannot exist.
        std::fs::write(&pid_file, "999999999\n").unwrap();

        let runner = runner_for("true", &[], pid_file.clone());
        runner.run().await.unwrap();
        runner.wait().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_a_running_child_is_a_no_op() {
        let scratch = tempfile::tempdir().unwrap();
        let runner = runner_for("true", &[], scratch.path().join("agent.pid"));
        runner.stop().await.unwrap();
        runner.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn stop_falls_back_to_the_recorded_pid() {
        let scratch = tempfile::tempdir().unwrap();
        let pid_file = scratch.path().join("agent.pid");

        // The agent was started by an earlier invocation; this one only
        // has the PID file to go on.
        let booter = runner_for("sleep", &["30"], pid_file.clone());
        booter.run().await.unwrap();
        booter.write_pid().await.unwrap();
        let pid: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(Path::new(&format!("/proc/{pid}")).exists());

        let stopper = runner_for("sleep", &["30"], pid_file);
        stopper.stop().await.unwrap();
        // Reap through the spawning runner so the /proc entry can go away.
        booter.wait().await.unwrap();
        stopper.wait().await.unwrap();
        assert!(!Path::new(&format!("/proc/{pid}")).exists());
    }

    #[tokio::test]
    async fn stop_tolerates_an_already_dead_recorded_pid() {
        let scratch = tempfile::tempdir().unwrap();
        let pid_file = scratch.path().join("agent.pid");
        std::fs::write(&pid_file, "999999999\n").unwrap();

        let runner = runner_for("true", &[], pid_file);
        runner.stop().await.unwrap();
        runner.wait().await.unwrap();
    }
}
