//! OS process supervision for strategy workers.
//!
//! The supervisor owns the `name → child process` table exclusively. A
//! handle exists from the moment a spawn survives its settle delay until the
//! process is confirmed gone, voluntarily or by force.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use common::{Config, Directive, Error, Result};

/// A SIGKILLed process dies promptly; this only bounds the reap.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// How a worker process is launched and how long lifecycle operations wait.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Worker executable, e.g. `/opt/hummingbot/bin/hummingbot`.
    pub worker_bin: String,
    /// Fixed arguments placed before the strategy file flag.
    pub worker_args: Vec<String>,
    /// Directory receiving one `<name>.log` per worker (stdout + stderr).
    pub logs_dir: PathBuf,
    /// Delay before a fresh spawn is checked for an immediate exit.
    pub spawn_settle: Duration,
    /// Time a worker gets to exit voluntarily before it is force-killed.
    pub terminate_grace: Duration,
}

impl SupervisorConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            worker_bin: cfg.worker_bin.clone(),
            worker_args: cfg.worker_args.clone(),
            logs_dir: cfg.logs_dir.clone(),
            spawn_settle: cfg.spawn_settle,
            terminate_grace: cfg.terminate_grace,
        }
    }
}

pub struct ProcessSupervisor {
    cfg: SupervisorConfig,
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessSupervisor {
    pub fn new(cfg: SupervisorConfig) -> Self {
        Self { cfg, children: Mutex::new(HashMap::new()) }
    }

    /// Launch the worker for `name` with its config file and verify it
    /// survives the settle delay. A process that exits immediately is reaped
    /// and never registered.
    pub async fn spawn(&self, name: &str, config_path: &Path) -> Result<()> {
        if self.children.lock().await.contains_key(name) {
            return Err(Error::Conflict(format!("worker for '{name}' is already running")));
        }

        std::fs::create_dir_all(&self.cfg.logs_dir)?;
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.cfg.logs_dir.join(format!("{name}.log")))?;
        let log_file_err = log_file.try_clone()?;

        let mut child = Command::new(&self.cfg.worker_bin)
            .args(&self.cfg.worker_args)
            .arg("--strategy-file")
            .arg(config_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Process(format!("failed to launch worker for '{name}': {e}")))?;

        tokio::time::sleep(self.cfg.spawn_settle).await;

        if let Some(status) = child.try_wait()? {
            return Err(Error::Process(format!(
                "worker for '{name}' exited during startup ({status})"
            )));
        }

        info!(name = %name, pid = ?child.id(), "Worker spawned");
        self.children.lock().await.insert(name.to_string(), child);
        Ok(())
    }

    /// Stop the worker for `name`: ask it to exit via an in-band `stop`
    /// directive and a closed stdin, then force-kill after the grace period.
    ///
    /// The handle is always gone on return; a worker that already exited
    /// counts as success. Returns whether a forced kill was needed.
    pub async fn terminate(&self, name: &str) -> Result<bool> {
        let child = self.children.lock().await.remove(name);
        let Some(mut child) = child else {
            return Ok(false); // already gone
        };

        if let Some(mut stdin) = child.stdin.take() {
            // Best effort: the worker may have stopped reading its stdin.
            let _ = stdin.write_all(&directive_line(Directive::Stop)).await;
            let _ = stdin.shutdown().await;
        }

        match timeout(self.cfg.terminate_grace, child.wait()).await {
            Ok(status) => {
                status?;
                info!(name = %name, "Worker exited voluntarily");
                Ok(false)
            }
            Err(_) => {
                warn!(name = %name, grace = ?self.cfg.terminate_grace, "Grace period elapsed, force-killing worker");
                child.start_kill()?;
                child.wait().await?;
                Ok(true)
            }
        }
    }

    /// Deliver a pause/resume instruction as one JSON line on the worker's
    /// stdin. Fails observably when no handle exists, the process already
    /// exited, or the pipe is closed.
    pub async fn send_directive(&self, name: &str, directive: Directive) -> Result<()> {
        let mut children = self.children.lock().await;
        let child = children
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("no worker process for '{name}'")))?;

        if child.try_wait()?.is_some() {
            children.remove(name);
            return Err(Error::Process(format!("worker for '{name}' already exited")));
        }

        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Process(format!("worker for '{name}' has no control channel")))?;
        stdin
            .write_all(&directive_line(directive))
            .await
            .map_err(|e| Error::Process(format!("directive write to '{name}' failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Process(format!("directive flush to '{name}' failed: {e}")))?;

        info!(name = %name, directive = %directive, "Directive delivered");
        Ok(())
    }

    /// Names whose process exited since the last poll. Exited handles are
    /// dropped; the monitoring loop reconciles registry status from the
    /// returned set.
    pub async fn poll_all(&self) -> Vec<String> {
        let mut children = self.children.lock().await;
        let mut exited = Vec::new();
        for (name, child) in children.iter_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    warn!(name = %name, status = %status, "Worker exited unexpectedly");
                    exited.push(name.clone());
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(name = %name, error = %e, "Failed to poll worker, dropping handle");
                    exited.push(name.clone());
                }
            }
        }
        for name in &exited {
            children.remove(name);
        }
        exited
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.children.lock().await.contains_key(name)
    }

    pub async fn running_count(&self) -> usize {
        self.children.lock().await.len()
    }

    pub async fn tracked_names(&self) -> Vec<String> {
        self.children.lock().await.keys().cloned().collect()
    }

    /// Terminate every tracked worker in parallel. The voluntary-exit
    /// window is the terminate grace clamped to `global_timeout`; whatever
    /// outlives it is killed and then reaped, so no worker is left a
    /// zombie when the daemon keeps running afterwards. Returns the names
    /// that were live when shutdown began.
    pub async fn terminate_all(&self, global_timeout: Duration) -> Vec<String> {
        let workers: Vec<(String, Child)> = self.children.lock().await.drain().collect();
        let names: Vec<String> = workers.iter().map(|(name, _)| name.clone()).collect();
        if names.is_empty() {
            return names;
        }

        info!(count = names.len(), "Terminating all workers");
        let grace = self.cfg.terminate_grace.min(global_timeout);
        let shutdowns = workers.into_iter().map(|(name, mut child)| async move {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(&directive_line(Directive::Stop)).await;
                let _ = stdin.shutdown().await;
            }
            match timeout(grace, child.wait()).await {
                Ok(_) => info!(name = %name, "Worker exited voluntarily"),
                Err(_) => {
                    warn!(name = %name, "Grace period elapsed, force-killing worker");
                    let _ = child.start_kill();
                    if timeout(KILL_REAP_TIMEOUT, child.wait()).await.is_err() {
                        warn!(name = %name, "Worker not reaped after kill");
                    }
                }
            }
        });
        futures_util::future::join_all(shutdowns).await;
        names
    }
}

fn directive_line(directive: Directive) -> Vec<u8> {
    let mut line = serde_json::to_vec(&json!({ "directive": directive }))
        .unwrap_or_else(|_| b"{}".to_vec());
    line.push(b'\n');
    line
}
