//! Short-lived IPC exchanges with MPV.
//!
//! Every call dials the control socket, writes its commands, collects the
//! answers and drops the connection. Nothing is held open between calls.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::Instant;

use super::protocol::{MpvCommand, MpvEvent, MpvMessage, MpvResponse};

/// Read deadline for one exchange, armed when the connection is opened.
pub const READ_DEADLINE: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),
  #[error("Write failed: {0}")]
  WriteFailed(#[from] std::io::Error),
  #[error("Failed to encode command: {0}")]
  Encode(#[from] serde_json::Error),
}

/// Everything read back during one exchange.
#[derive(Debug, Default)]
pub struct Exchange {
  /// Non-event responses, in arrival order. May be shorter than the number
  /// of commands sent if the deadline tripped or the stream ended.
  pub responses: Vec<MpvResponse>,
  /// Unsolicited events that were interleaved with the responses.
  pub events: Vec<MpvEvent>,
}

impl Exchange {
  /// Find the response for a tracked command.
  pub fn response_for(&self, request_id: i64) -> Option<&MpvResponse> {
    self
      .responses
      .iter()
      .find(|r| r.request_id == Some(request_id))
  }
}

/// Dial the control socket and run one exchange.
#[cfg(unix)]
pub async fn exchange(
  path: &Path,
  commands: &[MpvCommand],
  deadline: Duration,
) -> Result<Exchange, IpcError> {
  use tokio::net::UnixStream;

  let stream = UnixStream::connect(path)
    .await
    .map_err(|e| IpcError::ConnectionFailed(format!("{}: {}", path.display(), e)))?;

  exchange_on(stream, commands, deadline).await
}

#[cfg(not(unix))]
pub async fn exchange(
  path: &Path,
  _commands: &[MpvCommand],
  _deadline: Duration,
) -> Result<Exchange, IpcError> {
  Err(IpcError::ConnectionFailed(format!(
    "{}: unix sockets are not supported on this platform",
    path.display()
  )))
}

/// Run one exchange over an already-open stream.
pub async fn exchange_on<S>(
  stream: S,
  commands: &[MpvCommand],
  deadline: Duration,
) -> Result<Exchange, IpcError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let expires = Instant::now() + deadline;
  let (reader, mut writer) = tokio::io::split(stream);

  for cmd in commands {
    let line = cmd.encode()?;
    log::debug!("Sending MPV command: {}", line.trim_end());
    writer.write_all(line.as_bytes()).await?;
  }
  writer.flush().await?;

  let mut buf_reader = BufReader::new(reader);
  let mut buf = Vec::new();
  let mut exchange = Exchange::default();

  while exchange.responses.len() < commands.len() {
    buf.clear();
    // Raw bytes: MPV passes filenames and tags through without re-encoding.
    match tokio::time::timeout_at(expires, buf_reader.read_until(b'\n', &mut buf)).await {
      Err(_) => {
        log::debug!(
          "MPV read deadline hit with {}/{} responses",
          exchange.responses.len(),
          commands.len()
        );
        break;
      }
      Ok(Ok(0)) => {
        log::debug!("MPV closed the connection");
        break;
      }
      Ok(Ok(_)) => {
        let line = String::from_utf8_lossy(&buf);
        let trimmed = line.trim();
        if trimmed.is_empty() {
          continue;
        }

        match MpvMessage::parse(trimmed) {
          Ok(MpvMessage::Response(response)) => {
            log::debug!(
              "MPV response: request_id={:?} error={:?}",
              response.request_id,
              response.error
            );
            exchange.responses.push(response);
          }
          Ok(MpvMessage::Event(event)) => {
            log::debug!("MPV event during exchange: {}", event.event);
            exchange.events.push(event);
          }
          Err(e) => {
            log::warn!("Failed to parse MPV message: {} - {}", e, trimmed);
          }
        }
      }
      Ok(Err(e)) => {
        log::error!("MPV IPC read error: {}", e);
        break;
      }
    }
  }

  Ok(exchange)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, DuplexStream};

  /// Read `count` command lines from the fake peer side.
  async fn read_commands(peer: &mut DuplexStream, count: usize) -> Vec<serde_json::Value> {
    let mut received = String::new();
    let mut buf = [0u8; 1024];
    while received.matches('\n').count() < count {
      let n = peer.read(&mut buf).await.unwrap();
      assert!(n > 0, "client closed before sending all commands");
      received.push_str(std::str::from_utf8(&buf[..n]).unwrap());
    }
    received
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect()
  }

  #[tokio::test]
  async fn test_collects_one_response_per_command() {
    let (client, mut peer) = tokio::io::duplex(4096);
    let cmds = vec![
      MpvCommand::get_property("pause"),
      MpvCommand::get_property("duration"),
    ];
    let (pause_id, dur_id) = (cmds[0].request_id.unwrap(), cmds[1].request_id.unwrap());

    let server = tokio::spawn(async move {
      let sent = read_commands(&mut peer, 2).await;
      assert_eq!(sent[0]["command"], serde_json::json!(["get_property", "pause"]));
      // Out of order on purpose.
      let reply = format!(
        "{{\"error\":\"success\",\"data\":215.4,\"request_id\":{dur_id}}}\n\
         {{\"error\":\"success\",\"data\":true,\"request_id\":{pause_id}}}\n"
      );
      peer.write_all(reply.as_bytes()).await.unwrap();
      peer
    });

    let exchange = exchange_on(client, &cmds, READ_DEADLINE).await.unwrap();
    let _peer = server.await.unwrap();

    assert_eq!(exchange.responses.len(), 2);
    assert_eq!(
      exchange.response_for(pause_id).unwrap().value().as_bool(),
      Some(true)
    );
    assert_eq!(
      exchange.response_for(dur_id).unwrap().value().as_f64(),
      Some(215.4)
    );
  }

  #[tokio::test]
  async fn test_events_are_not_counted() {
    let (client, mut peer) = tokio::io::duplex(4096);
    let cmd = MpvCommand::get_property("speed");
    let id = cmd.request_id.unwrap();

    let server = tokio::spawn(async move {
      read_commands(&mut peer, 1).await;
      let reply = format!(
        "{{\"event\":\"playback-restart\"}}\n\
         {{\"event\":\"property-change\",\"name\":\"speed\",\"data\":2.0,\"request_id\":{id}}}\n\
         {{\"error\":\"success\",\"data\":1.5,\"request_id\":{id}}}\n"
      );
      peer.write_all(reply.as_bytes()).await.unwrap();
      peer
    });

    let exchange = exchange_on(client, &[cmd], READ_DEADLINE).await.unwrap();
    let _peer = server.await.unwrap();

    assert_eq!(exchange.events.len(), 2);
    assert_eq!(exchange.responses.len(), 1);
    assert_eq!(exchange.responses[0].value().as_f64(), Some(1.5));
  }

  #[tokio::test]
  async fn test_malformed_lines_are_skipped() {
    let (client, mut peer) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
      read_commands(&mut peer, 1).await;
      peer
        .write_all(b"garbage\n\n{\"error\":\"success\",\"data\":null,\"request_id\":0}\n")
        .await
        .unwrap();
      peer
    });

    let exchange = exchange_on(client, &[MpvCommand::stop()], READ_DEADLINE)
      .await
      .unwrap();
    let _peer = server.await.unwrap();

    assert_eq!(exchange.responses.len(), 1);
    assert!(exchange.responses[0].is_success());
  }

  #[tokio::test]
  async fn test_non_utf8_line_does_not_end_the_read() {
    let (client, mut peer) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
      let sent = read_commands(&mut peer, 1).await;
      let id = sent[0]["request_id"].as_i64().unwrap();
      peer
        .write_all(b"{\"event\":\"metadata-update\",\"data\":\"\xff\xfe\"}\n")
        .await
        .unwrap();
      let reply = format!("{{\"error\":\"success\",\"data\":false,\"request_id\":{id}}}\n");
      peer.write_all(reply.as_bytes()).await.unwrap();
      peer
    });

    let exchange = exchange_on(client, &[MpvCommand::get_property("pause")], READ_DEADLINE)
      .await
      .unwrap();
    let _peer = server.await.unwrap();

    assert_eq!(exchange.responses.len(), 1);
    assert_eq!(exchange.responses[0].value().as_bool(), Some(false));
    assert_eq!(exchange.events.len(), 1);
    assert_eq!(exchange.events[0].event, "metadata-update");
  }

  #[tokio::test]
  async fn test_short_read_returns_partial_result_at_deadline() {
    let (client, mut peer) = tokio::io::duplex(4096);
    let cmds = vec![
      MpvCommand::get_property("pause"),
      MpvCommand::get_property("time-pos"),
    ];
    let pos_id = cmds[1].request_id.unwrap();

    let server = tokio::spawn(async move {
      read_commands(&mut peer, 2).await;
      let reply = format!("{{\"error\":\"success\",\"data\":3.0,\"request_id\":{pos_id}}}\n");
      peer.write_all(reply.as_bytes()).await.unwrap();
      // Keep the stream open so only the deadline can end the read.
      tokio::time::sleep(Duration::from_secs(2)).await;
      peer
    });

    let started = std::time::Instant::now();
    let exchange = exchange_on(client, &cmds, Duration::from_millis(100))
      .await
      .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(exchange.responses.len(), 1);
    assert_eq!(exchange.responses[0].request_id, Some(pos_id));
    server.abort();
  }

  #[tokio::test]
  async fn test_closed_stream_returns_what_was_read() {
    let (client, mut peer) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
      read_commands(&mut peer, 2).await;
      peer
        .write_all(b"{\"error\":\"success\",\"request_id\":0}\n")
        .await
        .unwrap();
      drop(peer);
    });

    let cmds = vec![MpvCommand::stop(), MpvCommand::toggle_pause()];
    let exchange = exchange_on(client, &cmds, READ_DEADLINE).await.unwrap();
    server.await.unwrap();

    assert_eq!(exchange.responses.len(), 1);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_missing_socket_is_a_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nothing.sock");

    let err = exchange(&path, &[MpvCommand::stop()], READ_DEADLINE)
      .await
      .unwrap_err();
    assert!(matches!(err, IpcError::ConnectionFailed(_)));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_exchange_over_unix_socket() {
    use tokio::net::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpv.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let (reader, mut writer) = stream.into_split();
      let mut lines = BufReader::new(reader).lines();
      let line = lines.next_line().await.unwrap().unwrap();
      let cmd: serde_json::Value = serde_json::from_str(&line).unwrap();
      let reply = serde_json::json!({
        "error": "success",
        "data": false,
        "request_id": cmd["request_id"],
      });
      writer
        .write_all(format!("{}\n", reply).as_bytes())
        .await
        .unwrap();
    });

    let exchange = exchange(&path, &[MpvCommand::get_property("pause")], READ_DEADLINE)
      .await
      .unwrap();
    server.await.unwrap();

    assert_eq!(exchange.responses.len(), 1);
    assert_eq!(exchange.responses[0].value().as_bool(), Some(false));
  }
}
