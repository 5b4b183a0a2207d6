use rand::Rng;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::device::{IdentityPolicy, PowerBounds, SensorDevice, UpdatePolicy};
use crate::transport::Session;

/// How long a device sleeps between updates.
#[derive(Debug, Clone, Copy)]
pub enum IntervalPolicy {
    Fixed(Duration),
    /// Uniformly jittered per tick within `[min, max]`.
    Jittered { min: Duration, max: Duration },
}

impl IntervalPolicy {
    fn sample(&self) -> Duration {
        match *self {
            IntervalPolicy::Fixed(interval) => interval,
            IntervalPolicy::Jittered { min, max } => {
                let millis = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(min.as_millis() as u64..=max.as_millis() as u64)
                };
                Duration::from_millis(millis)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum DisconnectPolicy {
    /// Devices disconnect only when the population is stopped.
    GracefulOnStop,
    /// After each update a device leaves the population with this
    /// probability, disconnecting normally on its way out.
    Spontaneous { probability: f64 },
}

#[derive(Debug, Clone)]
pub struct PopulationConfig {
    pub device_count: usize,
    pub identity_policy: IdentityPolicy,
    pub update_policy: UpdatePolicy,
    pub bounds: PowerBounds,
    pub interval: IntervalPolicy,
    /// `None` runs until the cancellation token fires.
    pub run_duration: Option<Duration>,
    pub disconnect_policy: DisconnectPolicy,
}

#[derive(Debug, Default, Clone, Copy)]
struct DeviceReport {
    updates_sent: u64,
    failed_exchanges: u64,
    disconnected: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PopulationSummary {
    pub devices: usize,
    pub updates_sent: u64,
    pub failed_exchanges: u64,
    pub disconnects: u64,
}

/// Owns a set of simulated sensors and runs each one's update loop as
/// an independent task. Devices share no mutable state; the only thing
/// they have in common is the target address and the cancellation
/// token.
pub struct Population {
    session: Session,
    config: PopulationConfig,
}

impl Population {
    pub fn new(session: Session, config: PopulationConfig) -> Self {
        Self { session, config }
    }

    /// Run every device loop to completion and aggregate their reports.
    ///
    /// A configured run duration cancels a child token so an external
    /// cancellation still stops the population early. Does not return
    /// until every device task has been joined.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<PopulationSummary> {
        let cancel = cancel.child_token();
        if let Some(duration) = self.config.run_duration {
            let deadline = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                tracing::debug!("Run duration elapsed, stopping the population");
                deadline.cancel();
            });
        }

        tracing::info!(
            "Starting {} devices against {}",
            self.config.device_count,
            self.session.address()
        );
        let mut handles = Vec::with_capacity(self.config.device_count);
        for index in 0..self.config.device_count {
            let session = self.session.clone();
            let config = self.config.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(device_loop(index, session, config, cancel)));
        }

        let mut summary = PopulationSummary {
            devices: self.config.device_count,
            ..Default::default()
        };
        for handle in handles {
            let report = handle.await?;
            summary.updates_sent += report.updates_sent;
            summary.failed_exchanges += report.failed_exchanges;
            if report.disconnected {
                summary.disconnects += 1;
            }
        }
        tracing::info!(
            "Population stopped [updates={} failed={} disconnects={}]",
            summary.updates_sent,
            summary.failed_exchanges,
            summary.disconnects
        );
        Ok(summary)
    }
}

async fn device_loop(
    index: usize,
    session: Session,
    config: PopulationConfig,
    cancel: CancellationToken,
) -> DeviceReport {
    let mut report = DeviceReport::default();
    let mut device = SensorDevice::new(config.identity_policy, config.bounds, config.update_policy);

    let identity = match device.connect(&session).await {
        Ok(identity) => identity,
        Err(err) => {
            tracing::warn!("Device {} failed to connect: {}", index, err);
            return report;
        }
    };
    tracing::debug!("Device {} connected as {}", index, identity);

    loop {
        let interval = config.interval.sample();
        // The cancellation check sits on the sleep, so shutdown latency
        // is bounded by one update interval.
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        // A failed exchange is this device's problem alone; log it and
        // wait for the next scheduled update.
        match send_update(&mut device, &session).await {
            Ok(()) => report.updates_sent += 1,
            Err(err) => {
                report.failed_exchanges += 1;
                tracing::warn!("Device {} update failed: {}", index, err);
            }
        }

        if let DisconnectPolicy::Spontaneous { probability } = config.disconnect_policy {
            let leaves = {
                let mut rng = rand::thread_rng();
                rng.gen_bool(probability)
            };
            if leaves {
                tracing::debug!("Device {} leaving spontaneously", index);
                break;
            }
        }
    }

    if device.is_connected() {
        match send_disconnect(&mut device, &session).await {
            Ok(()) => report.disconnected = true,
            Err(err) => {
                report.failed_exchanges += 1;
                tracing::warn!("Device {} disconnect failed: {}", index, err);
            }
        }
    }
    report
}

async fn send_update(device: &mut SensorDevice, session: &Session) -> anyhow::Result<()> {
    let envelope = device.next_update()?;
    let raw = session.exchange(&codec::encode(&envelope)?).await?;
    let reply = codec::decode(&raw)?;
    tracing::trace!("Update acknowledged: {:?}", reply);
    Ok(())
}

async fn send_disconnect(device: &mut SensorDevice, session: &Session) -> anyhow::Result<()> {
    let envelope = device.disconnect()?;
    let raw = session.exchange(&codec::encode(&envelope)?).await?;
    let reply = codec::decode(&raw)?;
    tracing::trace!("Disconnect acknowledged: {:?}", reply);
    Ok(())
}
