use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A request or response command as it travels on the wire.
///
/// The server understands `"connect"`, `"disconnect"` and
/// `{"power": {"value": <number>}}`. Anything else is carried as
/// `Unknown` so the fault injector can send unrecognized commands
/// through the same encoder as well-formed traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireCommand", into = "WireCommand")]
pub enum Command {
    Connect,
    Power { value: f64 },
    Disconnect,
    Unknown(String),
}

// The untagged wire form: plain command names are bare strings, power
// updates are a nested object.
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WireCommand {
    Name(String),
    Power { power: PowerField },
}

#[derive(Clone, Serialize, Deserialize)]
struct PowerField {
    value: f64,
}

impl From<WireCommand> for Command {
    fn from(wire: WireCommand) -> Self {
        match wire {
            WireCommand::Name(name) => match name.as_str() {
                "connect" => Command::Connect,
                "disconnect" => Command::Disconnect,
                _ => Command::Unknown(name),
            },
            WireCommand::Power { power } => Command::Power { value: power.value },
        }
    }
}

impl From<Command> for WireCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::Connect => WireCommand::Name("connect".to_string()),
            Command::Disconnect => WireCommand::Name("disconnect".to_string()),
            Command::Unknown(name) => WireCommand::Name(name),
            Command::Power { value } => WireCommand::Power {
                power: PowerField { value },
            },
        }
    }
}

/// One protocol message. `uuid` is omitted from the JSON entirely when
/// absent, which is only legal for `Connect` in server-assigned mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub command: Command,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
}

impl Envelope {
    pub fn connect() -> Self {
        Self {
            command: Command::Connect,
            uuid: None,
        }
    }

    pub fn power(uuid: Uuid, value: f64) -> Self {
        Self {
            command: Command::Power { value },
            uuid: Some(uuid),
        }
    }

    pub fn disconnect(uuid: Uuid) -> Self {
        Self {
            command: Command::Disconnect,
            uuid: Some(uuid),
        }
    }
}

/// The server's reply to a `Connect` in server-assigned identity mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub uuid: Uuid,
}

/// A decoded server response. Acknowledgements to power updates and
/// disconnects are server-defined, so anything that is valid JSON but
/// neither an `Envelope` nor a `ConnectResponse` is kept opaque.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Envelope(Envelope),
    Connect(ConnectResponse),
    Ack(serde_json::Value),
}

#[derive(Debug, Error)]
#[error("failed to serialize envelope: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("response is not a recognizable message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize an envelope to its UTF-8 JSON wire form.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Pass raw bytes through untouched. The fault injector uses this to
/// transmit payloads that are not valid encodings at all.
pub fn encode_raw(raw: impl Into<Vec<u8>>) -> Vec<u8> {
    raw.into()
}

/// Parse a server response. The server answers out of a fixed-size
/// buffer, so trailing NUL padding and surrounding whitespace are
/// trimmed before parsing.
pub fn decode(raw: &[u8]) -> Result<Reply, DecodeError> {
    let trimmed = std::str::from_utf8(raw)?
        .trim_matches(|c| c == ' ' || c == '\n' || c == '\r' || c == '\0');
    if let Ok(envelope) = serde_json::from_str::<Envelope>(trimmed) {
        return Ok(Reply::Envelope(envelope));
    }
    if let Ok(connect) = serde_json::from_str::<ConnectResponse>(trimmed) {
        return Ok(Reply::Connect(connect));
    }
    Ok(Reply::Ack(serde_json::from_str(trimmed)?))
}
