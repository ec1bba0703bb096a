//! High-level MPV player used by the rest of the application.
//!
//! Every public method takes the same async lock for its whole duration, so
//! commands reach MPV in exactly the order callers issued them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use super::ipc::{self, Exchange, IpcError, READ_DEADLINE};
use super::process::{Launcher, MpvLauncher, ProcessError};
use super::protocol::{MpvCommand, MpvEvent, PropertyValue};
use super::supervisor::Supervisor;
use crate::config::PlayerConfig;

/// Events buffered for `events()` before new ones are dropped.
const EVENT_BUFFER: usize = 64;

#[derive(Error, Debug)]
pub enum PlayError {
  #[error("Could not start MPV: {0}")]
  Launch(#[from] ProcessError),
  #[error("Could not reach MPV: {0}")]
  Ipc(#[from] IpcError),
  #[error("MPV command failed: {0}")]
  CommandFailed(String),
  #[error("Player is closed")]
  Closed,
}

impl PlayError {
  /// True when MPV is running but its socket could not be used, as opposed
  /// to MPV rejecting the command.
  pub fn is_connection_error(&self) -> bool {
    matches!(
      self,
      PlayError::Ipc(IpcError::ConnectionFailed(_) | IpcError::WriteFailed(_))
    )
  }
}

/// Snapshot of MPV's transport state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
  pub is_playing: bool,
  /// Seconds.
  pub position: f64,
  /// Seconds.
  pub duration: f64,
  pub speed: f64,
}

/// The four properties read by `get_state`.
#[derive(Debug, Clone, Copy)]
enum StateQuery {
  Pause,
  TimePos,
  Duration,
  Speed,
}

impl StateQuery {
  const ALL: [StateQuery; 4] = [
    StateQuery::Pause,
    StateQuery::TimePos,
    StateQuery::Duration,
    StateQuery::Speed,
  ];

  fn property(self) -> &'static str {
    match self {
      StateQuery::Pause => "pause",
      StateQuery::TimePos => "time-pos",
      StateQuery::Duration => "duration",
      StateQuery::Speed => "speed",
    }
  }

  fn apply(self, state: &mut PlaybackState, value: PropertyValue) {
    match (self, value) {
      (StateQuery::Pause, PropertyValue::Bool(paused)) => state.is_playing = !paused,
      (StateQuery::TimePos, PropertyValue::Number(pos)) => state.position = pos,
      (StateQuery::TimePos, PropertyValue::Null) => state.position = 0.0,
      (StateQuery::Duration, PropertyValue::Number(dur)) => state.duration = dur,
      (StateQuery::Duration, PropertyValue::Null) => state.duration = 0.0,
      (StateQuery::Speed, PropertyValue::Number(speed)) => state.speed = speed,
      (query, other) => {
        log::debug!("Ignoring unexpected {} value: {:?}", query.property(), other);
      }
    }
  }
}

struct PlayerInner {
  supervisor: Supervisor,
  /// Last answered state. Fields MPV fails to answer keep these values.
  last_state: PlaybackState,
  closed: bool,
}

/// Drives one MPV process for the lifetime of the player.
pub struct MpvPlayer {
  config: Arc<RwLock<PlayerConfig>>,
  inner: Mutex<PlayerInner>,
  read_deadline: Duration,
  event_tx: Sender<MpvEvent>,
  event_rx: Receiver<MpvEvent>,
}

impl MpvPlayer {
  /// Create a player that launches the real MPV binary.
  /// Nothing is spawned until the first `play`.
  pub fn new(config: PlayerConfig) -> Self {
    let socket_path = config.resolved_socket_path();
    let config = Arc::new(RwLock::new(config));
    let launcher = Arc::new(MpvLauncher::new(config.clone()));
    Self::from_parts(config, Supervisor::new(socket_path, launcher))
  }

  /// Create a player with a custom way of starting the process.
  pub fn with_launcher(socket_path: PathBuf, launcher: Arc<dyn Launcher>) -> Self {
    Self::from_parts(
      Arc::new(RwLock::new(PlayerConfig::default())),
      Supervisor::new(socket_path, launcher),
    )
  }

  fn from_parts(config: Arc<RwLock<PlayerConfig>>, supervisor: Supervisor) -> Self {
    let (event_tx, event_rx) = async_channel::bounded(EVENT_BUFFER);
    Self {
      config,
      inner: Mutex::new(PlayerInner {
        supervisor,
        last_state: PlaybackState::default(),
        closed: false,
      }),
      read_deadline: READ_DEADLINE,
      event_tx,
      event_rx,
    }
  }

  /// Current configuration.
  pub fn config(&self) -> PlayerConfig {
    self.config.read().clone()
  }

  /// Update binary path, extra args and playback flags. Takes effect on the
  /// next launch; the socket path is fixed for the player's lifetime.
  pub fn set_config(&self, config: PlayerConfig) {
    *self.config.write() = config;
  }

  /// Events MPV sent while answering commands.
  pub fn events(&self) -> Receiver<MpvEvent> {
    self.event_rx.clone()
  }

  pub async fn socket_path(&self) -> PathBuf {
    self.inner.lock().await.supervisor.socket_path().to_path_buf()
  }

  /// Check if an MPV process is alive.
  pub async fn is_running(&self) -> bool {
    self.inner.lock().await.supervisor.is_running()
  }

  pub async fn is_closed(&self) -> bool {
    self.inner.lock().await.closed
  }

  /// Start MPV if needed and replace the current media with `url`.
  pub async fn play(&self, url: &str) -> Result<(), PlayError> {
    let mut inner = self.inner.lock().await;
    if inner.closed {
      return Err(PlayError::Closed);
    }

    inner.supervisor.ensure_running().await?;

    log::info!("Loading media: {}", url);
    self.send(&inner, MpvCommand::loadfile(url)).await?;
    inner.last_state = PlaybackState::default();
    Ok(())
  }

  /// Toggle pause.
  pub async fn pause(&self) -> Result<(), PlayError> {
    self.send_if_running(MpvCommand::toggle_pause()).await
  }

  /// Stop playback. MPV stays alive and idle.
  pub async fn stop(&self) -> Result<(), PlayError> {
    self.send_if_running(MpvCommand::stop()).await
  }

  /// Seek relative to the current position.
  pub async fn seek(&self, delta_seconds: i64) -> Result<(), PlayError> {
    self.send_if_running(MpvCommand::seek_relative(delta_seconds)).await
  }

  /// Add `delta` to the playback speed.
  pub async fn change_speed(&self, delta: f64) -> Result<(), PlayError> {
    self.send_if_running(MpvCommand::add_speed(delta)).await
  }

  /// Back to normal speed.
  pub async fn reset_speed(&self) -> Result<(), PlayError> {
    self.send_if_running(MpvCommand::set_speed(1.0)).await
  }

  /// Query pause, position, duration and speed in one exchange.
  ///
  /// Returns the zero state when MPV is not running. Queries MPV fails or
  /// forgets to answer leave the previously known value in place.
  pub async fn get_state(&self) -> Result<PlaybackState, PlayError> {
    let mut inner = self.inner.lock().await;
    if !inner.supervisor.is_running() {
      inner.last_state = PlaybackState::default();
      return Ok(PlaybackState::default());
    }

    let queries: Vec<(StateQuery, MpvCommand)> = StateQuery::ALL
      .iter()
      .map(|q| (*q, MpvCommand::get_property(q.property())))
      .collect();
    let commands: Vec<MpvCommand> = queries.iter().map(|(_, cmd)| cmd.clone()).collect();

    let exchange = self.exchange(&inner, &commands).await?;

    let mut state = inner.last_state;
    for (query, cmd) in &queries {
      let Some(id) = cmd.request_id else {
        continue;
      };
      match exchange.response_for(id) {
        Some(response) if response.is_success() => query.apply(&mut state, response.value()),
        Some(response) => log::debug!(
          "MPV could not answer {}: {}",
          query.property(),
          response.error_message()
        ),
        None => log::debug!("No answer for {} before the deadline", query.property()),
      }
    }

    inner.last_state = state;
    Ok(state)
  }

  /// Kill MPV and remove its socket. The player cannot be used to play
  /// again afterwards. Never fails; problems are only logged.
  pub async fn close(&self) {
    let mut inner = self.inner.lock().await;
    inner.closed = true;
    inner.last_state = PlaybackState::default();
    inner.supervisor.shutdown().await;
    log::info!("MPV player closed");
  }

  async fn send_if_running(&self, cmd: MpvCommand) -> Result<(), PlayError> {
    let mut inner = self.inner.lock().await;
    if !inner.supervisor.is_running() {
      log::debug!("MPV not running, skipping {:?}", cmd.command.first());
      return Ok(());
    }
    self.send(&inner, cmd).await
  }

  /// Send a single command. A missing reply is tolerated; a reply with an
  /// error code is not.
  async fn send(&self, inner: &PlayerInner, cmd: MpvCommand) -> Result<(), PlayError> {
    let exchange = self.exchange(inner, std::slice::from_ref(&cmd)).await?;

    match exchange.responses.first() {
      Some(response) if !response.is_success() => {
        Err(PlayError::CommandFailed(response.error_message()))
      }
      Some(_) => Ok(()),
      None => {
        log::debug!("No reply from MPV for {:?}, assuming it was applied", cmd.command);
        Ok(())
      }
    }
  }

  async fn exchange(
    &self,
    inner: &PlayerInner,
    commands: &[MpvCommand],
  ) -> Result<Exchange, PlayError> {
    let mut exchange =
      ipc::exchange(inner.supervisor.socket_path(), commands, self.read_deadline).await?;
    self.forward_events(std::mem::take(&mut exchange.events));
    Ok(exchange)
  }

  fn forward_events(&self, events: Vec<MpvEvent>) {
    for event in events {
      if let Err(e) = self.event_tx.try_send(event) {
        log::debug!("Dropping MPV event: {}", e);
      }
    }
  }
}
