//! # parksim
//!
//! Interactive parking-lot simulator streamed over WebSocket.
//!
//! Each connected client gets an independent simulation session: a virtual
//! clock running at 60x real time, a stochastic arrival process, shortest-
//! path stall assignment, tariff-aware pricing, and a causally ordered
//! event stream back to the client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       parksim                           │
//! │  ┌───────────────────────────────────────────────────┐  │
//! │  │ WebSocket endpoint (/simulation)                  │  │
//! │  │ - Validates the init payload                      │  │
//! │  │ - Dispatches control messages to the session      │  │
//! │  │ - Write loop: event frames + liveness pings       │  │
//! │  └───────────────────────────────────────────────────┘  │
//! │                          │                              │
//! │  ┌───────────────────────────────────────────────────┐  │
//! │  │ Session                                           │  │
//! │  │ - {stopped, running, paused} state machine        │  │
//! │  │ - Clock tick loop, arrival generator,             │  │
//! │  │   per-car departure timers, admission semaphore   │  │
//! │  │ - Single-consumer event serializer                │  │
//! │  └───────────────────────────────────────────────────┘  │
//! │                          │                              │
//! │      ┌───────────────────┼───────────────────┐          │
//! │      ▼                   ▼                   ▼          │
//! │  [grid + pathfind]   [random streams]    [tariff]       │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod clock;
mod config;
mod events;
mod grid;
mod pathfind;
mod random;
mod session;
mod tariff;
pub mod telemetry;
mod ws;

pub use clock::VirtualClock;
pub use config::Config;
pub use events::{CarEvent, EventKind, EventSink, SinkError};
pub use grid::{CellKind, Parking, ParkingLot, Stall, TopologyError};
pub use random::{ArrivalConfig, ConfigError, DelayDistribution, ParkingTimeConfig, Sampler};
pub use session::{Session, SessionState};
pub use tariff::{parking_cost, TariffError};

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tracing::info;

/// Build the complete parksim stack.
///
/// Returns:
/// - The main Axum router (the `/simulation` WebSocket endpoint)
/// - The metrics router, when metrics are enabled and the Prometheus
///   recorder could be installed
pub fn build_app(config: Config) -> (Router, Option<Router>) {
    info!(address = %config.address, "Building parksim");

    let metrics_router = if config.metrics_port != 0 {
        telemetry::install().map(|handle| {
            Router::new().route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            )
        })
    } else {
        None
    };

    (ws::router(Arc::new(config)), metrics_router)
}
