//! MPV process detection and spawning.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::config::{PlaybackConfig, PlayerConfig};

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found")]
  NotFound,
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] std::io::Error),
  #[error("MPV started but its socket did not appear at {}", .0.display())]
  SocketTimeout(PathBuf),
}

/// Starts the external player. The supervisor only cares that the returned
/// child eventually creates the control socket at `socket_path`.
pub trait Launcher: Send + Sync {
  fn launch(&self, socket_path: &Path) -> Result<Child, ProcessError>;
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(target_os = "macos")]
  {
    let common_paths = [
      "/usr/local/bin/mpv",
      "/opt/homebrew/bin/mpv",
      "/Applications/mpv.app/Contents/MacOS/mpv",
    ];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  #[cfg(target_os = "linux")]
  {
    let common_paths = ["/usr/bin/mpv", "/usr/local/bin/mpv", "/snap/bin/mpv"];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  None
}

/// Command-line arguments for a headless, idle MPV listening on `socket_path`.
pub fn mpv_args(socket_path: &Path, playback: &PlaybackConfig, extra_args: &[String]) -> Vec<String> {
  let mut args = vec![
    "--idle".to_string(),
    format!("--input-ipc-server={}", socket_path.display()),
    "--no-video".to_string(),
    "--no-config".to_string(),
  ];

  if playback.loop_file {
    args.push("--loop-file=yes".to_string());
  } else {
    args.push("--loop-file=no".to_string());
  }

  if playback.save_position_on_quit {
    args.push("--save-position-on-quit".to_string());
  }

  args.extend(extra_args.iter().cloned());
  args
}

/// Launches the real MPV binary using the player configuration current at
/// launch time.
pub struct MpvLauncher {
  config: Arc<RwLock<PlayerConfig>>,
}

impl MpvLauncher {
  pub fn new(config: Arc<RwLock<PlayerConfig>>) -> Self {
    Self { config }
  }
}

impl Launcher for MpvLauncher {
  fn launch(&self, socket_path: &Path) -> Result<Child, ProcessError> {
    let (mpv_exe, args) = {
      let config = self.config.read();
      let mpv_exe = config
        .mpv_path
        .as_ref()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .or_else(find_mpv)
        .ok_or(ProcessError::NotFound)?;
      (mpv_exe, mpv_args(socket_path, &config.playback, &config.mpv_args))
    };

    log::info!("Spawning MPV: {:?} with IPC: {}", mpv_exe, socket_path.display());
    log::debug!("MPV args: {:?}", args);

    let mut child = Command::new(&mpv_exe)
      .args(&args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()?;

    if let Some(stdout) = child.stdout.take() {
      forward_output("stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
      forward_output("stderr", stderr);
    }

    Ok(child)
  }
}

/// Drain one of the child's output pipes into the log. The thread ends when
/// the pipe closes, which happens when the process exits.
fn forward_output<R: Read + Send + 'static>(stream: &'static str, pipe: R) {
  let spawned = std::thread::Builder::new()
    .name(format!("mpv-{stream}"))
    .spawn(move || {
      for line in BufReader::new(pipe).lines() {
        match line {
          Ok(line) if !line.trim().is_empty() => {
            log::debug!(target: "mpv", "[{}] {}", stream, line);
          }
          Ok(_) => {}
          Err(e) => {
            log::debug!(target: "mpv", "[{}] stopped reading: {}", stream, e);
            break;
          }
        }
      }
    });

  if let Err(e) = spawned {
    log::warn!("Could not start MPV {} forwarder: {}", stream, e);
  }
}

/// Remove the socket file. A missing file is not an error.
pub fn cleanup_socket(path: &Path) {
  #[cfg(unix)]
  {
    match std::fs::remove_file(path) {
      Ok(()) => log::debug!("Removed MPV socket {}", path.display()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => log::warn!("Could not remove MPV socket {}: {}", path.display(), e),
    }
  }
  #[cfg(not(unix))]
  {
    let _ = path;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mpv_args_defaults() {
    let args = mpv_args(Path::new("/tmp/test.sock"), &PlaybackConfig::default(), &[]);
    assert_eq!(
      args,
      vec![
        "--idle",
        "--input-ipc-server=/tmp/test.sock",
        "--no-video",
        "--no-config",
        "--loop-file=no",
      ]
    );
  }

  #[test]
  fn test_mpv_args_playback_flags_and_extras() {
    let playback = PlaybackConfig {
      loop_file: true,
      save_position_on_quit: true,
    };
    let extra = vec!["--volume=50".to_string()];
    let args = mpv_args(Path::new("/tmp/test.sock"), &playback, &extra);

    assert!(args.contains(&"--loop-file=yes".to_string()));
    assert!(!args.contains(&"--loop-file=no".to_string()));
    assert!(args.contains(&"--save-position-on-quit".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("--volume=50"));
  }

  #[test]
  fn test_cleanup_socket_removes_file_and_tolerates_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpv.sock");
    std::fs::write(&path, b"").unwrap();

    cleanup_socket(&path);
    assert!(!path.exists());

    // Second call hits NotFound and stays quiet.
    cleanup_socket(&path);
  }

  #[test]
  fn test_launcher_reports_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = PlayerConfig {
      mpv_path: Some(dir.path().join("no-such-mpv").display().to_string()),
      ..PlayerConfig::default()
    };
    let launcher = MpvLauncher::new(Arc::new(RwLock::new(config)));

    let err = launcher.launch(&dir.path().join("mpv.sock")).unwrap_err();
    assert!(matches!(err, ProcessError::SpawnFailed(_)));
  }
}
