//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Global request ID counter. Starts at 1 so an id never collides with the
/// `0` mpv echoes for untracked commands.
static REQUEST_ID: AtomicI64 = AtomicI64::new(1);

/// Generate a unique request ID for MPV commands.
pub fn next_request_id() -> i64 {
  REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// One token of a command. The first token of every command is the
/// instruction name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Arg {
  Str(String),
  Int(i64),
  Float(f64),
  Bool(bool),
}

impl From<&str> for Arg {
  fn from(value: &str) -> Self {
    Arg::Str(value.to_string())
  }
}

impl From<String> for Arg {
  fn from(value: String) -> Self {
    Arg::Str(value)
  }
}

impl From<i64> for Arg {
  fn from(value: i64) -> Self {
    Arg::Int(value)
  }
}

impl From<f64> for Arg {
  fn from(value: f64) -> Self {
    Arg::Float(value)
  }
}

impl From<bool> for Arg {
  fn from(value: bool) -> Self {
    Arg::Bool(value)
  }
}

/// Command sent to MPV via IPC.
#[derive(Debug, Clone, Serialize)]
pub struct MpvCommand {
  pub command: Vec<Arg>,
  /// Only set on commands whose result is consumed.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub request_id: Option<i64>,
}

impl MpvCommand {
  /// Create an untracked command.
  pub fn new(args: Vec<Arg>) -> Self {
    Self {
      command: args,
      request_id: None,
    }
  }

  /// Tag the command with a fresh request ID.
  pub fn tracked(mut self) -> Self {
    self.request_id = Some(next_request_id());
    self
  }

  /// Load a file, replacing whatever is currently playing.
  pub fn loadfile(url: &str) -> Self {
    Self::new(vec!["loadfile".into(), url.into(), "replace".into()])
  }

  /// Toggle the pause state.
  pub fn toggle_pause() -> Self {
    Self::cycle("pause")
  }

  /// Stop playback and clear the playlist. The process stays idle.
  pub fn stop() -> Self {
    Self::new(vec!["stop".into()])
  }

  /// Seek relative to the current position, in seconds.
  pub fn seek_relative(seconds: i64) -> Self {
    Self::new(vec!["seek".into(), seconds.into(), "relative".into()])
  }

  /// Add `delta` to the playback speed.
  pub fn add_speed(delta: f64) -> Self {
    Self::new(vec!["add".into(), "speed".into(), delta.into()])
  }

  /// Set the playback speed multiplier.
  pub fn set_speed(speed: f64) -> Self {
    Self::new(vec!["set_property".into(), "speed".into(), speed.into()])
  }

  /// Cycle (toggle) a property.
  pub fn cycle(property: &str) -> Self {
    Self::new(vec!["cycle".into(), property.into()])
  }

  /// Get a property value. Always tracked, since the answer is the point.
  pub fn get_property(name: &str) -> Self {
    Self::new(vec!["get_property".into(), name.into()]).tracked()
  }

  /// Encode as one newline-terminated JSON line.
  pub fn encode(&self) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(self)?;
    line.push('\n');
    Ok(line)
  }
}

/// Response from MPV for a command.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MpvResponse {
  /// "success" or error message.
  #[serde(default)]
  pub error: Option<String>,
  /// Response data (command-specific).
  #[serde(default)]
  pub data: Option<serde_json::Value>,
  /// Matching request ID. mpv echoes 0 for untracked commands.
  #[serde(default)]
  pub request_id: Option<i64>,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error.as_deref() == Some("success")
  }

  /// Typed view of the data payload. Missing data reads as `Null`.
  pub fn value(&self) -> PropertyValue {
    self
      .data
      .clone()
      .map(PropertyValue::from)
      .unwrap_or(PropertyValue::Null)
  }

  /// Error text for a failed command.
  pub fn error_message(&self) -> String {
    self
      .error
      .clone()
      .unwrap_or_else(|| "no error code in response".to_string())
  }
}

/// Event sent by MPV (property changes, playback events, etc.).
#[derive(Debug, Clone, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "end-file", "idle").
  pub event: String,
  /// Observer ID for property-change events.
  pub id: Option<i64>,
  /// Property name for property-change events.
  pub name: Option<String>,
  /// Event data.
  pub data: Option<serde_json::Value>,
  /// Reason for end-file events (e.g., "eof", "stop", "quit", "error").
  pub reason: Option<String>,
}

/// Typed property values from MPV.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
  Bool(bool),
  Number(f64),
  String(String),
  /// Arrays and objects, kept as their JSON text.
  Json(String),
  Null,
}

impl PropertyValue {
  pub fn as_bool(&self) -> Option<bool> {
    match self {
      PropertyValue::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      PropertyValue::Number(n) => Some(*n),
      _ => None,
    }
  }
}

impl From<serde_json::Value> for PropertyValue {
  fn from(value: serde_json::Value) -> Self {
    match value {
      serde_json::Value::Bool(b) => PropertyValue::Bool(b),
      serde_json::Value::Number(n) => PropertyValue::Number(n.as_f64().unwrap_or(0.0)),
      serde_json::Value::String(s) => PropertyValue::String(s),
      serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
        PropertyValue::Json(value.to_string())
      }
      serde_json::Value::Null => PropertyValue::Null,
    }
  }
}

/// Message received from MPV IPC (either response or event).
#[derive(Debug, Clone)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
}

impl MpvMessage {
  /// Parse a JSON line from MPV.
  ///
  /// Anything with a non-empty `event` field is an event, whether or not it
  /// also carries a request id.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    let is_event = value
      .get("event")
      .and_then(|e| e.as_str())
      .is_some_and(|e| !e.is_empty());

    if is_event {
      Ok(MpvMessage::Event(serde_json::from_value(value)?))
    } else {
      Ok(MpvMessage::Response(serde_json::from_value(value)?))
    }
  }
}
