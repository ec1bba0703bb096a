//! Lifecycle of the single MPV process owned by a player.

use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::Arc;
use std::time::Duration;

use super::process::{cleanup_socket, Launcher, ProcessError};

/// How many times to look for the socket after launch.
const SOCKET_CHECK_RETRIES: u32 = 20;
/// Pause between socket checks.
const SOCKET_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// A launched process together with its control socket.
#[derive(Debug)]
pub struct RunningProcess {
  child: Child,
}

impl RunningProcess {
  pub fn pid(&self) -> u32 {
    self.child.id()
  }
}

/// What the supervisor knows about its process.
#[derive(Debug, Default)]
pub enum ProcessState {
  #[default]
  NotStarted,
  Running(RunningProcess),
  /// The process ended on its own. Cleared by the next launch.
  Exited,
}

/// Owns the MPV process: launches it on demand, notices when it dies and
/// kills it on shutdown.
pub struct Supervisor {
  socket_path: PathBuf,
  launcher: Arc<dyn Launcher>,
  state: ProcessState,
  socket_check_retries: u32,
  socket_check_interval: Duration,
}

impl Supervisor {
  pub fn new(socket_path: PathBuf, launcher: Arc<dyn Launcher>) -> Self {
    Self {
      socket_path,
      launcher,
      state: ProcessState::NotStarted,
      socket_check_retries: SOCKET_CHECK_RETRIES,
      socket_check_interval: SOCKET_CHECK_INTERVAL,
    }
  }

  #[cfg(test)]
  pub(crate) fn with_socket_check(mut self, retries: u32, interval: Duration) -> Self {
    self.socket_check_retries = retries;
    self.socket_check_interval = interval;
    self
  }

  pub fn socket_path(&self) -> &Path {
    &self.socket_path
  }

  pub fn state(&self) -> &ProcessState {
    &self.state
  }

  /// Check whether the process is alive, moving to `Exited` if it is not.
  pub fn is_running(&mut self) -> bool {
    let exited = match &mut self.state {
      ProcessState::Running(process) => match process.child.try_wait() {
        Ok(None) => false,
        Ok(Some(status)) => {
          log::info!("MPV process exited on its own with: {}", status);
          true
        }
        Err(e) => {
          log::warn!("Could not poll MPV process, treating it as gone: {}", e);
          true
        }
      },
      _ => return false,
    };

    if exited {
      self.state = ProcessState::Exited;
    }
    !exited
  }

  /// Make sure a live process is listening on the socket.
  ///
  /// A no-op when the process is already running. Otherwise a stale socket
  /// file is removed, the process is launched and the socket is waited for.
  pub async fn ensure_running(&mut self) -> Result<(), ProcessError> {
    if self.is_running() {
      return Ok(());
    }

    log::info!("Starting new MPV process...");
    cleanup_socket(&self.socket_path);

    let child = self.launcher.launch(&self.socket_path)?;
    let pid = child.id();

    for _ in 0..self.socket_check_retries {
      if self.socket_path.exists() {
        log::info!("MPV socket detected (pid: {}). Process ready.", pid);
        self.state = ProcessState::Running(RunningProcess { child });
        return Ok(());
      }
      tokio::time::sleep(self.socket_check_interval).await;
    }

    log::error!(
      "Timed out waiting for MPV socket at {}",
      self.socket_path.display()
    );
    terminate(child).await;
    self.state = ProcessState::NotStarted;
    Err(ProcessError::SocketTimeout(self.socket_path.clone()))
  }

  /// Kill the process if it is running and remove the socket file.
  /// Failures are logged, never returned.
  pub async fn shutdown(&mut self) {
    // Refresh first so a process that already exited is not killed again.
    self.is_running();
    match std::mem::take(&mut self.state) {
      ProcessState::Running(process) => terminate(process.child).await,
      ProcessState::Exited => log::info!("MPV process already exited"),
      ProcessState::NotStarted => log::debug!("No MPV process to stop"),
    }

    cleanup_socket(&self.socket_path);
    log::info!("MPV supervisor stopped");
  }
}

impl Drop for Supervisor {
  fn drop(&mut self) {
    if let ProcessState::Running(process) = &mut self.state {
      log::warn!("Supervisor dropped with MPV running (pid: {}), killing it", process.pid());
      if let Err(e) = process.child.kill() {
        log::error!("Error terminating MPV process: {}", e);
      }
      match process.child.wait() {
        Ok(status) => log::info!("MPV process exited with: {}", status),
        Err(e) => log::error!("wait() failed: {}", e),
      }
      cleanup_socket(&self.socket_path);
    }
  }
}

/// Kill and reap a child without blocking the async runtime.
async fn terminate(mut child: Child) {
  let pid = child.id();
  log::info!("Killing MPV process (pid: {})", pid);

  let result = tokio::task::spawn_blocking(move || {
    let kill_result = child.kill();
    let wait_result = child.wait();
    (kill_result, wait_result)
  })
  .await;

  match result {
    Ok((kill_result, wait_result)) => {
      if let Err(e) = kill_result {
        log::error!("Error terminating MPV process: {}", e);
      }
      match wait_result {
        Ok(status) => log::info!("MPV process exited with: {}", status),
        Err(e) => log::error!("wait() failed: {}", e),
      }
    }
    Err(e) => {
      log::error!("spawn_blocking panicked during process cleanup: {}", e);
    }
  }
}
