use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use power_probe::config::Config;
use power_probe::device::{IdentityPolicy, UpdatePolicy};
use power_probe::fault::{FaultInjector, PROBES};
use power_probe::population::{DisconnectPolicy, Population, PopulationConfig};
use power_probe::transport::Session;

const CONFIG_FILE: &str = "config.toml";

#[derive(Parser)]
#[command(
    name = "power-probe",
    about = "Load simulator and fault injector for a power telemetry server"
)]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = CONFIG_FILE)]
    config: String,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a population of simulated sensors against the server
    Simulate {
        /// Number of devices (overrides the config file)
        #[arg(long)]
        devices: Option<usize>,
        /// Stop after this many seconds (overrides the config file)
        #[arg(long)]
        duration_secs: Option<u64>,
        /// Let the server assign identities via connect exchanges
        #[arg(long)]
        server_assigned: bool,
        /// Draw each reading fresh instead of random-walking
        #[arg(long)]
        fresh_random: bool,
        /// Per-tick probability of a spontaneous disconnect
        #[arg(long)]
        spontaneous: Option<f64>,
    },
    /// Send one named malformed payload and report the response
    Probe { name: String },
    /// Flood the server with valid updates until interrupted
    Flood,
    /// List the available probes
    Probes,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::new(&args.config).context("Error loading config")?;
    tracing_subscriber::fmt::init();

    let session = Session::new(config.address(), config.read_timeout());
    match args.command {
        Cmd::Simulate {
            devices,
            duration_secs,
            server_assigned,
            fresh_random,
            spontaneous,
        } => {
            let population_config = PopulationConfig {
                device_count: devices.unwrap_or(config.device_count),
                identity_policy: if server_assigned {
                    IdentityPolicy::ServerAssigned
                } else {
                    IdentityPolicy::ClientAssigned
                },
                update_policy: if fresh_random {
                    UpdatePolicy::FreshRandom
                } else {
                    UpdatePolicy::BoundedWalk {
                        step: config.walk_step,
                    }
                },
                bounds: config.bounds(),
                interval: config.interval(),
                run_duration: duration_secs
                    .map(Duration::from_secs)
                    .or_else(|| config.run_duration()),
                disconnect_policy: match spontaneous {
                    Some(probability) => DisconnectPolicy::Spontaneous { probability },
                    None => DisconnectPolicy::GracefulOnStop,
                },
            };
            let cancel = cancel_on_ctrl_c();
            let population = Population::new(session, population_config);
            let summary = population.run(cancel).await?;
            tracing::info!(
                "Simulation finished: {} devices, {} updates, {} failed exchanges, {} disconnects",
                summary.devices,
                summary.updates_sent,
                summary.failed_exchanges,
                summary.disconnects
            );
        }
        Cmd::Probe { name } => {
            let injector = FaultInjector::new(session);
            let outcome = injector.run(&name).await?;
            tracing::info!("Probe {} sent {} bytes", name, outcome.sent.len());
            tracing::info!(
                "Server replied: {}",
                String::from_utf8_lossy(&outcome.received)
            );
        }
        Cmd::Flood => {
            tracing::info!("Flooding {} until ctrl-c", session.address());
            let cancel = cancel_on_ctrl_c();
            let injector = FaultInjector::new(session);
            let report = injector.flood(cancel).await?;
            tracing::info!(
                "Flood finished [attempted={} delivered={}]",
                report.attempted,
                report.delivered
            );
        }
        Cmd::Probes => {
            for (name, description) in PROBES {
                println!("{name} - {description}");
            }
            println!("flood - valid updates under fresh identities, unpaced, until ctrl-c");
        }
    }
    Ok(())
}

/// Wire ctrl-c to a cancellation token observed by every running loop.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(_) => {
                tracing::info!("Ctrl-c received, stopping");
                signal.cancel();
            }
            Err(err) => {
                // The OS failed to register the signal handler, so
                // there is nothing to react to.
                tracing::debug!("{}", err);
            }
        }
    });
    cancel
}
