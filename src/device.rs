use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use uuid::Uuid;

use crate::codec::{self, DecodeError, EncodeError, Envelope, Reply};
use crate::transport::{Session, TransportError};

/// How a device obtains its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityPolicy {
    /// Generate a v4 identifier locally. No connect exchange takes
    /// place; the server registers the sensor on its first update.
    ClientAssigned,
    /// Perform a `Connect` exchange and adopt the identifier the server
    /// hands back.
    ServerAssigned,
}

/// How a device's reading evolves between updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdatePolicy {
    /// Each update draws a fresh value uniformly from the bounds.
    FreshRandom,
    /// Each update perturbs the previous value by a uniform delta in
    /// `[-step, step]` and clamps to the bounds.
    BoundedWalk { step: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct PowerBounds {
    pub min: f64,
    pub max: f64,
}

impl PowerBounds {
    pub fn new(min: f64, max: f64) -> Self {
        debug_assert!(min <= max);
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device is already connected")]
    AlreadyConnected,
    #[error("device is not connected")]
    NotConnected,
    #[error("device has disconnected")]
    Disconnected,
    #[error("connect exchange failed: {0}")]
    Connect(#[from] TransportError),
    #[error("connect response was not understood: {0}")]
    ConnectDecode(#[from] DecodeError),
    #[error("server did not assign an identity")]
    NoIdentityAssigned,
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Connected,
    Disconnected,
}

/// One simulated sensor.
///
/// The device is a state machine over its own identity and reading: it
/// connects exactly once, emits power updates while connected, and
/// disconnects at most once. It never observes another device's state,
/// so populations of devices need no locking between them.
pub struct SensorDevice {
    identity_policy: IdentityPolicy,
    bounds: PowerBounds,
    update_policy: UpdatePolicy,
    identity: Option<Uuid>,
    power: f64,
    phase: Phase,
    rng: StdRng,
}

impl SensorDevice {
    pub fn new(
        identity_policy: IdentityPolicy,
        bounds: PowerBounds,
        update_policy: UpdatePolicy,
    ) -> Self {
        let mut rng = StdRng::from_entropy();
        let power = rng.gen_range(bounds.min..=bounds.max);
        Self {
            identity_policy,
            bounds,
            update_policy,
            identity: None,
            power,
            phase: Phase::Created,
            rng,
        }
    }

    pub fn identity(&self) -> Option<Uuid> {
        self.identity
    }

    pub fn power(&self) -> f64 {
        self.power
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    /// Establish this device's identity.
    ///
    /// Client-assigned mode is purely local. Server-assigned mode sends
    /// a `Connect` envelope through `session` and adopts the identifier
    /// from the `ConnectResponse`.
    pub async fn connect(&mut self, session: &Session) -> Result<Uuid, DeviceError> {
        match self.phase {
            Phase::Connected => return Err(DeviceError::AlreadyConnected),
            Phase::Disconnected => return Err(DeviceError::Disconnected),
            Phase::Created => {}
        }
        let identity = match self.identity_policy {
            IdentityPolicy::ClientAssigned => Uuid::new_v4(),
            IdentityPolicy::ServerAssigned => {
                let payload = codec::encode(&Envelope::connect())?;
                let raw = session.exchange(&payload).await?;
                match codec::decode(&raw)? {
                    Reply::Connect(response) => response.uuid,
                    _ => return Err(DeviceError::NoIdentityAssigned),
                }
            }
        };
        self.identity = Some(identity);
        self.phase = Phase::Connected;
        Ok(identity)
    }

    /// Advance the reading by the configured policy and produce the
    /// next power-update envelope. The reading is clamped to the bounds
    /// after every mutation.
    pub fn next_update(&mut self) -> Result<Envelope, DeviceError> {
        let identity = self.connected_identity()?;
        self.power = match self.update_policy {
            UpdatePolicy::FreshRandom => self.rng.gen_range(self.bounds.min..=self.bounds.max),
            UpdatePolicy::BoundedWalk { step } => {
                let delta = self.rng.gen_range(-step..=step);
                self.bounds.clamp(self.power + delta)
            }
        };
        Ok(Envelope::power(identity, self.power))
    }

    /// Produce the disconnect envelope and retire the device. Any
    /// further call is an error; no message follows a disconnect.
    pub fn disconnect(&mut self) -> Result<Envelope, DeviceError> {
        let identity = self.connected_identity()?;
        self.phase = Phase::Disconnected;
        Ok(Envelope::disconnect(identity))
    }

    fn connected_identity(&self) -> Result<Uuid, DeviceError> {
        match (self.phase, self.identity) {
            (Phase::Connected, Some(identity)) => Ok(identity),
            (Phase::Disconnected, _) => Err(DeviceError::Disconnected),
            _ => Err(DeviceError::NotConnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Command;
    use crate::transport::RESPONSE_BUFFER_SIZE;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::Duration;

    fn unused_session() -> Session {
        // Never dialed in client-assigned mode.
        Session::new("127.0.0.1:9", Duration::from_millis(50))
    }

    #[tokio::test]
    async fn client_assigned_connect_is_local() {
        let mut device = SensorDevice::new(
            IdentityPolicy::ClientAssigned,
            PowerBounds::new(10.0, 100.0),
            UpdatePolicy::FreshRandom,
        );
        let identity = device.connect(&unused_session()).await.unwrap();
        assert_eq!(device.identity(), Some(identity));
        assert!(device.is_connected());

        let err = device.connect(&unused_session()).await.unwrap_err();
        assert!(matches!(err, DeviceError::AlreadyConnected));
    }

    #[tokio::test]
    async fn server_assigned_connect_adopts_the_response() {
        let assigned = Uuid::new_v4();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; RESPONSE_BUFFER_SIZE];
            let read = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..read], br#"{"command":"connect"}"#);
            let reply = format!(r#"{{"uuid":"{assigned}"}}"#);
            stream.write_all(reply.as_bytes()).await.unwrap();
        });

        let session = Session::new(addr.to_string(), Duration::from_secs(1));
        let mut device = SensorDevice::new(
            IdentityPolicy::ServerAssigned,
            PowerBounds::new(10.0, 100.0),
            UpdatePolicy::FreshRandom,
        );
        let identity = device.connect(&session).await.unwrap();
        assert_eq!(identity, assigned);

        let envelope = device.next_update().unwrap();
        assert_eq!(envelope.uuid, Some(assigned));
    }

    #[tokio::test]
    async fn bounded_walk_stays_in_bounds() {
        let bounds = PowerBounds::new(10.0, 20.0);
        let mut device = SensorDevice::new(
            IdentityPolicy::ClientAssigned,
            bounds,
            UpdatePolicy::BoundedWalk { step: 7.5 },
        );
        device.connect(&unused_session()).await.unwrap();
        for _ in 0..10_000 {
            let envelope = device.next_update().unwrap();
            match envelope.command {
                Command::Power { value } => {
                    assert!((bounds.min..=bounds.max).contains(&value), "{value}")
                }
                other => panic!("expected a power update, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn fresh_random_stays_in_bounds() {
        let bounds = PowerBounds::new(0.1, 99.9);
        let mut device = SensorDevice::new(
            IdentityPolicy::ClientAssigned,
            bounds,
            UpdatePolicy::FreshRandom,
        );
        device.connect(&unused_session()).await.unwrap();
        for _ in 0..1_000 {
            let envelope = device.next_update().unwrap();
            match envelope.command {
                Command::Power { value } => {
                    assert!((bounds.min..=bounds.max).contains(&value), "{value}")
                }
                other => panic!("expected a power update, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn no_messages_after_disconnect() {
        let mut device = SensorDevice::new(
            IdentityPolicy::ClientAssigned,
            PowerBounds::new(10.0, 100.0),
            UpdatePolicy::FreshRandom,
        );
        let identity = device.connect(&unused_session()).await.unwrap();

        let envelope = device.disconnect().unwrap();
        assert_eq!(envelope, Envelope::disconnect(identity));
        assert!(!device.is_connected());

        assert!(matches!(
            device.next_update().unwrap_err(),
            DeviceError::Disconnected
        ));
        assert!(matches!(
            device.disconnect().unwrap_err(),
            DeviceError::Disconnected
        ));
    }

    #[tokio::test]
    async fn updates_require_a_connection() {
        let mut device = SensorDevice::new(
            IdentityPolicy::ClientAssigned,
            PowerBounds::new(10.0, 100.0),
            UpdatePolicy::FreshRandom,
        );
        assert!(matches!(
            device.next_update().unwrap_err(),
            DeviceError::NotConnected
        ));
    }
}
