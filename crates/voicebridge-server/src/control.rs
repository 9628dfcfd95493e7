//! ESL-equivalent control-socket client (spec.md §6): a line-based command
//! protocol over TCP, grounded on `spark-transport-tcp`'s listener/channel
//! split-stream framing style, adapted from its `no_std` transport
//! abstraction down to a plain Tokio client since this binary has no
//! alternate runtime to stay portable across.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use voicebridge_core::{CallId, TenantId, VoiceError};
use voicebridge_transfer::{PresenceSource, PresenceStatus, SwitchTransferControl};

/// Every command round-trip is bounded; the switch is assumed local/LAN so
/// this is generous, not a tight SLA.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct EslControlClient {
    write: Mutex<OwnedWriteHalf>,
    read: Mutex<Lines<BufReader<OwnedReadHalf>>>,
    self_host: String,
}

impl EslControlClient {
    pub async fn connect(host: &str, port: u16, password: &str, self_host: impl Into<String>) -> Result<Self, VoiceError> {
        let stream = tokio::time::timeout(COMMAND_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| connect_err(host, port, "timed out"))?
            .map_err(|e| connect_err(host, port, &e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        let client = Self {
            write: Mutex::new(write_half),
            read: Mutex::new(BufReader::new(read_half).lines()),
            self_host: self_host.into(),
        };

        let auth_reply = client.send_command(&format!("auth {password}")).await?;
        if !auth_reply.starts_with("+OK") {
            return Err(VoiceError::Internal {
                detail: format!("control socket auth rejected: {auth_reply}"),
            });
        }
        Ok(client)
    }

    /// Send one line, await one reply line, both under [`COMMAND_TIMEOUT`].
    async fn send_command(&self, command: &str) -> Result<String, VoiceError> {
        tokio::time::timeout(COMMAND_TIMEOUT, self.send_command_inner(command))
            .await
            .map_err(|_| VoiceError::Internal {
                detail: format!("control socket command timed out: {command}"),
            })?
    }

    async fn send_command_inner(&self, command: &str) -> Result<String, VoiceError> {
        debug!(command, "sending control socket command");
        {
            let mut write = self.write.lock().await;
            write.write_all(command.as_bytes()).await.map_err(io_err)?;
            write.write_all(b"\n").await.map_err(io_err)?;
            write.flush().await.map_err(io_err)?;
        }
        let mut read = self.read.lock().await;
        match read.next_line().await.map_err(io_err)? {
            Some(line) => Ok(line),
            None => Err(VoiceError::Internal {
                detail: "control socket closed while awaiting reply".to_string(),
            }),
        }
    }
}

fn io_err(err: std::io::Error) -> VoiceError {
    VoiceError::Internal {
        detail: format!("control socket I/O error: {err}"),
    }
}

fn connect_err(host: &str, port: u16, detail: &str) -> VoiceError {
    VoiceError::Internal {
        detail: format!("failed to connect to control socket {host}:{port}: {detail}"),
    }
}

#[async_trait]
impl SwitchTransferControl for EslControlClient {
    async fn originate(&self, call_id: &CallId, destination: &str, call_timeout: Duration) -> Result<String, VoiceError> {
        let command = format!(
            "originate {{call_timeout={}}}{destination} XML default",
            call_timeout.as_secs()
        );
        let reply = self.send_command(&command).await?;
        parse_uuid_reply(&reply).ok_or_else(|| VoiceError::TransferFailed {
            call_id: call_id.to_string(),
            reason: format!("originate failed: {reply}"),
        })
    }

    async fn whisper(&self, b_leg_uuid: &str, message: &str) -> Result<(), VoiceError> {
        let encoded_message = urlencode(message);
        let ws_url = format!(
            "ws://{}:{}/whisper/{b_leg_uuid}?text={encoded_message}",
            self.self_host,
            crate::config::TRANSFER_WS_PORT
        );
        let command = format!("uuid_audio_stream {b_leg_uuid} start {ws_url} wav");
        let reply = self.send_command(&command).await?;
        if reply.starts_with("+OK") {
            Ok(())
        } else {
            Err(VoiceError::Internal {
                detail: format!("whisper announcement failed: {reply}"),
            })
        }
    }

    async fn bridge(&self, a_leg_uuid: &str, b_leg_uuid: &str) -> Result<(), VoiceError> {
        let reply = self.send_command(&format!("bridge {a_leg_uuid} {b_leg_uuid}")).await?;
        if reply.starts_with("+OK") {
            Ok(())
        } else {
            Err(VoiceError::Internal {
                detail: format!("bridge failed: {reply}"),
            })
        }
    }
}

#[async_trait]
impl PresenceSource for EslControlClient {
    async fn query(&self, tenant: &TenantId, destination: &str) -> Result<PresenceStatus, VoiceError> {
        let reply = self.send_command(&format!("sofia_contact {destination}")).await?;
        if reply.starts_with("-ERR") || reply.trim().is_empty() {
            debug!(%tenant, destination, "presence lookup: offline");
            Ok(PresenceStatus::Offline)
        } else {
            Ok(PresenceStatus::Online)
        }
    }
}

/// Also issues `uuid_kill` to clear the audio-socket-side call leg, for the
/// hangup half of `SwitchAudioLink`.
pub async fn uuid_kill(client: &Arc<EslControlClient>, uuid: &str, cause: &str) {
    let command = format!("uuid_kill {uuid} {cause}");
    if let Err(err) = client.send_command(&command).await {
        warn!(uuid, cause, %err, "uuid_kill failed");
    }
}

fn parse_uuid_reply(reply: &str) -> Option<String> {
    let reply = reply.strip_prefix("+OK ")?;
    if reply.trim().is_empty() {
        None
    } else {
        Some(reply.trim().to_string())
    }
}

fn urlencode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uuid_from_ok_reply() {
        assert_eq!(parse_uuid_reply("+OK b-leg-123"), Some("b-leg-123".to_string()));
        assert_eq!(parse_uuid_reply("-ERR NO_ANSWER"), None);
    }

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("hello world"), "hello%20world");
        assert_eq!(urlencode("a-b_c.d~e"), "a-b_c.d~e");
    }
}
