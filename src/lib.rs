//! Protocol exerciser for a power telemetry ingestion server.
//!
//! Two jobs: simulate a population of independent sensor devices that
//! connect, report fluctuating power readings and disconnect, and probe
//! the server's validation with deliberately malformed payloads. The
//! server itself is an external collaborator reached only through its
//! one-message-per-connection TCP protocol.

pub mod codec;
pub mod config;
pub mod device;
pub mod fault;
pub mod population;
pub mod transport;
