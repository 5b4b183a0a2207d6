use rand::Rng;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec::{self, Command, EncodeError, Envelope};
use crate::transport::{Session, TransportError};

/// The named probes and what they exercise. `flood` lives outside this
/// table because it runs until cancelled instead of returning one
/// outcome.
pub const PROBES: &[(&str, &str)] = &[
    (
        "invalid_command",
        "well-formed envelope with an unrecognized command",
    ),
    ("invalid_json", "literal text that is not JSON at all"),
    (
        "invalid_json_long",
        "1 MiB of filler bytes to probe size-limit handling",
    ),
    (
        "invalid_power",
        "power update far below the documented minimum",
    ),
    ("invalid_utf8", "four bytes that fail UTF-8 validation"),
    (
        "invalid_uuid",
        "power update with a malformed identifier string",
    ),
];

pub const LONG_PAYLOAD_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unknown probe {0:?}")]
    Unknown(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// What a probe sent and what came back, surfaced unmodified. A server
/// rejection is a successful probe; only a transport-level failure to
/// get any response at all is an error.
#[derive(Debug)]
pub struct ProbeOutcome {
    pub sent: Vec<u8>,
    pub received: Vec<u8>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FloodReport {
    pub attempted: u64,
    pub delivered: u64,
}

/// Drives the codec and transport directly with crafted payloads,
/// bypassing the device model entirely.
pub struct FaultInjector {
    session: Session,
}

impl FaultInjector {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Run one named probe and surface the raw response.
    pub async fn run(&self, name: &str) -> Result<ProbeOutcome, ProbeError> {
        let payload = match name {
            "invalid_command" => invalid_command()?,
            "invalid_json" => invalid_json(),
            "invalid_json_long" => invalid_json_long(),
            "invalid_power" => invalid_power()?,
            "invalid_utf8" => invalid_utf8(),
            "invalid_uuid" => invalid_uuid(),
            _ => return Err(ProbeError::Unknown(name.to_string())),
        };
        let received = self.session.exchange(&payload).await?;
        Ok(ProbeOutcome {
            sent: payload,
            received,
        })
    }

    /// Send valid power updates, each under a fresh identity, with no
    /// pacing delay, until the token fires. Transport failures are
    /// counted rather than fatal; under flood they are the signal being
    /// probed for.
    pub async fn flood(&self, cancel: CancellationToken) -> Result<FloodReport, ProbeError> {
        let mut report = FloodReport::default();
        while !cancel.is_cancelled() {
            let payload = codec::encode(&Envelope::power(Uuid::new_v4(), random_power()))?;
            report.attempted += 1;
            match self.session.exchange(&payload).await {
                Ok(_) => report.delivered += 1,
                Err(err) => tracing::debug!("Flood exchange failed: {}", err),
            }
        }
        Ok(report)
    }
}

// A plausible reading, one decimal place, like a real sensor would send.
fn random_power() -> f64 {
    let mut rng = rand::thread_rng();
    rng.gen_range(1..1000) as f64 / 10.0
}

fn invalid_command() -> Result<Vec<u8>, ProbeError> {
    let envelope = Envelope {
        command: Command::Unknown("unknown".to_string()),
        uuid: Some(Uuid::new_v4()),
    };
    Ok(codec::encode(&envelope)?)
}

fn invalid_json() -> Vec<u8> {
    codec::encode_raw(&b"invalid json"[..])
}

fn invalid_json_long() -> Vec<u8> {
    codec::encode_raw(vec![b'A'; LONG_PAYLOAD_SIZE])
}

fn invalid_power() -> Result<Vec<u8>, ProbeError> {
    Ok(codec::encode(&Envelope::power(Uuid::new_v4(), -50.0))?)
}

fn invalid_utf8() -> Vec<u8> {
    codec::encode_raw(vec![0x00, 0x9f, 0x92, 0x96])
}

fn invalid_uuid() -> Vec<u8> {
    // The typed codec refuses to build this one, so craft the JSON
    // directly.
    let payload = json!({
        "command": {"power": {"value": random_power()}},
        "uuid": "invaliduuid",
    });
    codec::encode_raw(payload.to_string().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RESPONSE_BUFFER_SIZE;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::Duration;

    async fn spawn_stub(reply: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; RESPONSE_BUFFER_SIZE];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream.write_all(reply).await;
                });
            }
        });
        addr
    }

    #[test]
    fn long_payload_is_exactly_one_mebibyte() {
        let payload = invalid_json_long();
        assert_eq!(payload.len(), 1_048_576);
        assert!(payload.iter().all(|b| *b == b'A'));
    }

    #[test]
    fn utf8_payload_is_four_invalid_bytes() {
        let payload = invalid_utf8();
        assert_eq!(payload.len(), 4);
        assert!(std::str::from_utf8(&payload).is_err());
    }

    #[test]
    fn invalid_power_differs_only_in_the_value() {
        let payload = invalid_power().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        // Same shape as a valid power update, only the number is out of
        // range.
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(value["command"]["power"]["value"], -50.0);
        assert_eq!(value["command"].as_object().unwrap().len(), 1);
        assert_eq!(value["command"]["power"].as_object().unwrap().len(), 1);
        let uuid = value["uuid"].as_str().unwrap();
        assert!(Uuid::parse_str(uuid).is_ok());
    }

    #[test]
    fn invalid_uuid_keeps_a_valid_power_value() {
        let payload = invalid_uuid();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert!(Uuid::parse_str(value["uuid"].as_str().unwrap()).is_err());
        let power = value["command"]["power"]["value"].as_f64().unwrap();
        assert!((0.1..=99.9).contains(&power));
    }

    #[test]
    fn invalid_command_keeps_the_envelope_shape() {
        let payload = invalid_command().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["command"], "unknown");
        assert!(Uuid::parse_str(value["uuid"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn a_server_rejection_is_probe_success() {
        let addr = spawn_stub(br#"{"status":"error_invalid_power"}"#).await;
        let session = Session::new(addr.to_string(), Duration::from_secs(1));
        let injector = FaultInjector::new(session);

        let outcome = injector.run("invalid_power").await.unwrap();
        assert_eq!(outcome.received, br#"{"status":"error_invalid_power"}"#);
    }

    #[tokio::test]
    async fn unknown_probe_names_are_rejected() {
        let session = Session::new("127.0.0.1:9", Duration::from_millis(50));
        let injector = FaultInjector::new(session);
        let err = injector.run("no_such_probe").await.unwrap_err();
        assert!(matches!(err, ProbeError::Unknown(_)));
    }

    #[tokio::test]
    async fn every_registered_probe_gets_a_response() {
        let addr = spawn_stub(br#"{"status":"ok"}"#).await;
        let session = Session::new(addr.to_string(), Duration::from_secs(1));
        let injector = FaultInjector::new(session);
        for (name, _) in PROBES {
            let outcome = injector.run(name).await.unwrap();
            assert!(!outcome.sent.is_empty(), "{name} sent nothing");
            assert_eq!(outcome.received, br#"{"status":"ok"}"#, "{name}");
        }
    }

    #[tokio::test]
    async fn flood_stops_on_cancellation() {
        let addr = spawn_stub(br#"{"status":"ok"}"#).await;
        let session = Session::new(addr.to_string(), Duration::from_secs(1));
        let injector = FaultInjector::new(session);

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });

        let report = injector.flood(cancel).await.unwrap();
        assert!(report.attempted >= 1);
        assert!(report.delivered >= 1);
    }
}
