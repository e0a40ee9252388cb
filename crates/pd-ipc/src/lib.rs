//! Message channels between the browser process and its UI surfaces.
//!
//! Every message is an [`IpcEnvelope`]: a named channel plus a JSON payload,
//! carried in a length-prefixed frame.

use pd_core::BrowserError;
use pd_core::BrowserResult;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::sync::mpsc;
use std::time::Duration;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;
const HARD_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;
const FRAME_PREFIX_BYTES: usize = 4;

/// Which side of a channel an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Browser,
    Window,
    Settings,
}

impl EndpointRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Window => "window",
            Self::Settings => "settings",
        }
    }

    pub fn from_role_name(value: &str) -> Option<Self> {
        match value {
            "browser" => Some(Self::Browser),
            "window" => Some(Self::Window),
            "settings" => Some(Self::Settings),
            _ => None,
        }
    }
}

/// Named message with an arbitrary JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcEnvelope {
    pub channel: String,
    #[serde(default)]
    pub payload: Value,
}

impl IpcEnvelope {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    /// Decodes the payload into a typed message.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> BrowserResult<T> {
        T::deserialize(&self.payload).map_err(|error| {
            BrowserError::new(
                "ipc.payload_invalid",
                format!(
                    "payload on channel `{}` does not match its schema: {error}",
                    self.channel
                ),
            )
        })
    }
}

/// Defines how processes communicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub role: EndpointRole,
    pub max_message_bytes: usize,
}

impl ChannelConfig {
    pub fn hardened(role: EndpointRole) -> BrowserResult<Self> {
        let config = Self {
            role,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BrowserResult<()> {
        if self.max_message_bytes == 0 {
            return Err(BrowserError::new(
                "ipc.max_message_bytes_invalid",
                "channel max_message_bytes must be greater than zero",
            ));
        }

        if self.max_message_bytes > HARD_MAX_MESSAGE_BYTES {
            return Err(BrowserError::new(
                "ipc.max_message_bytes_too_large",
                "channel max_message_bytes exceeds hard limit (16 MiB)",
            ));
        }

        Ok(())
    }
}

/// Sending half of an endpoint; cheap to clone and shareable across threads.
#[derive(Debug, Clone)]
pub struct IpcSender {
    tx: mpsc::Sender<Vec<u8>>,
    config: ChannelConfig,
}

impl IpcSender {
    pub fn role(&self) -> EndpointRole {
        self.config.role
    }

    pub fn send(&self, envelope: &IpcEnvelope) -> BrowserResult<()> {
        let frame = encode_envelope(envelope, self.config.max_message_bytes)?;
        self.tx.send(frame).map_err(|error| {
            BrowserError::new(
                "ipc.send_failed",
                format!(
                    "failed to send `{}` from {} endpoint: {error}",
                    envelope.channel,
                    self.config.role.as_str()
                ),
            )
        })
    }
}

/// In-memory endpoint that applies framing and message-size checks.
pub struct LocalIpcEndpoint {
    sender: IpcSender,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl LocalIpcEndpoint {
    pub fn role(&self) -> EndpointRole {
        self.sender.role()
    }

    pub fn sender(&self) -> IpcSender {
        self.sender.clone()
    }

    pub fn send(&self, envelope: &IpcEnvelope) -> BrowserResult<()> {
        self.sender.send(envelope)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> BrowserResult<IpcEnvelope> {
        let frame = self.rx.recv_timeout(timeout).map_err(|error| {
            BrowserError::new(
                "ipc.recv_failed",
                format!(
                    "failed to receive message for {} endpoint: {error}",
                    self.role().as_str()
                ),
            )
        })?;
        decode_envelope(&frame, self.sender.config.max_message_bytes)
    }

    /// Returns `Ok(None)` when nothing is queued.
    pub fn try_recv(&self) -> BrowserResult<Option<IpcEnvelope>> {
        match self.rx.try_recv() {
            Ok(frame) => decode_envelope(&frame, self.sender.config.max_message_bytes).map(Some),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(BrowserError::new(
                "ipc.disconnected",
                format!("peer of {} endpoint has disconnected", self.role().as_str()),
            )),
        }
    }
}

/// Creates paired in-memory IPC endpoints.
pub fn local_channel_pair(
    left: ChannelConfig,
    right: ChannelConfig,
) -> BrowserResult<(LocalIpcEndpoint, LocalIpcEndpoint)> {
    left.validate()?;
    right.validate()?;

    let (left_to_right_tx, left_to_right_rx) = mpsc::channel();
    let (right_to_left_tx, right_to_left_rx) = mpsc::channel();

    Ok((
        LocalIpcEndpoint {
            sender: IpcSender {
                tx: left_to_right_tx,
                config: left,
            },
            rx: right_to_left_rx,
        },
        LocalIpcEndpoint {
            sender: IpcSender {
                tx: right_to_left_tx,
                config: right,
            },
            rx: left_to_right_rx,
        },
    ))
}

/// Encodes a payload as a length-prefixed frame.
pub fn encode_frame(payload: &[u8], max_message_bytes: usize) -> BrowserResult<Vec<u8>> {
    if payload.len() > max_message_bytes {
        return Err(BrowserError::new(
            "ipc.message_too_large",
            format!(
                "payload exceeds max_message_bytes ({} > {})",
                payload.len(),
                max_message_bytes
            ),
        ));
    }

    let len_u32 = u32::try_from(payload.len()).map_err(|_| {
        BrowserError::new(
            "ipc.message_too_large",
            "payload length does not fit in 32-bit frame prefix",
        )
    })?;

    let mut out = Vec::with_capacity(FRAME_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&len_u32.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes a length-prefixed frame and validates payload size.
pub fn decode_frame(frame: &[u8], max_message_bytes: usize) -> BrowserResult<Vec<u8>> {
    if frame.len() < FRAME_PREFIX_BYTES {
        return Err(BrowserError::new(
            "ipc.frame_too_short",
            "frame is shorter than the 4-byte length prefix",
        ));
    }

    let mut len_bytes = [0_u8; FRAME_PREFIX_BYTES];
    len_bytes.copy_from_slice(&frame[..FRAME_PREFIX_BYTES]);
    let payload_len = u32::from_be_bytes(len_bytes) as usize;
    if payload_len > max_message_bytes {
        return Err(BrowserError::new(
            "ipc.message_too_large",
            format!(
                "decoded payload exceeds max_message_bytes ({} > {})",
                payload_len, max_message_bytes
            ),
        ));
    }

    let expected = FRAME_PREFIX_BYTES + payload_len;
    if frame.len() != expected {
        return Err(BrowserError::new(
            "ipc.frame_length_mismatch",
            format!(
                "frame length mismatch: expected {expected} bytes, got {}",
                frame.len()
            ),
        ));
    }

    Ok(frame[FRAME_PREFIX_BYTES..].to_vec())
}

/// Encodes an envelope as a framed JSON document.
pub fn encode_envelope(envelope: &IpcEnvelope, max_message_bytes: usize) -> BrowserResult<Vec<u8>> {
    if envelope.channel.is_empty() {
        return Err(BrowserError::new(
            "ipc.channel_missing",
            "IPC envelope must name a channel",
        ));
    }

    let payload = serde_json::to_vec(envelope).map_err(|error| {
        BrowserError::new(
            "ipc.envelope_encode_failed",
            format!("failed to encode `{}` envelope: {error}", envelope.channel),
        )
    })?;
    encode_frame(&payload, max_message_bytes)
}

/// Decodes a framed JSON envelope.
pub fn decode_envelope(frame: &[u8], max_message_bytes: usize) -> BrowserResult<IpcEnvelope> {
    let payload = decode_frame(frame, max_message_bytes)?;
    let envelope: IpcEnvelope = serde_json::from_slice(&payload).map_err(|error| {
        BrowserError::new(
            "ipc.envelope_invalid",
            format!("IPC frame does not hold a valid envelope: {error}"),
        )
    })?;

    if envelope.channel.is_empty() {
        return Err(BrowserError::new(
            "ipc.channel_missing",
            "IPC envelope must name a channel",
        ));
    }

    Ok(envelope)
}
