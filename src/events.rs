//! Wire events and the sink they are written to.
//!
//! Every observable fact about a car is a [`CarEvent`], serialized as one
//! JSON object per frame. Events reach the client through a single-consumer
//! serializer loop (owned by the session), which hands encoded frames to an
//! [`EventSink`]. The sink is the seam between the simulation and the
//! transport: the WebSocket layer provides one backed by its outbound
//! channel, tests provide one that collects frames in memory.

use crate::grid::Stall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Discriminator for the event frames sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A car appeared on the approach road
    Arrive,
    /// The car entered the lot and took a stall
    Park,
    /// The car declined to enter, or found no stall
    DroveAway,
    /// The car left its stall and the lot
    Leave,
}

impl EventKind {
    /// Wire name, also used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Arrive => "arrive",
            EventKind::Park => "park",
            EventKind::DroveAway => "drove-away",
            EventKind::Leave => "leave",
        }
    }
}

/// One event frame. `park_x`/`park_y` are present for park and leave,
/// `price` for leave only; absent fields are omitted from the JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarEvent {
    pub event: EventKind,
    pub car_id: String,
    /// Virtual-clock unix seconds at the moment the event was enqueued.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub park_x: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub park_y: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl CarEvent {
    pub fn arrive(car_id: &str, timestamp: i64) -> Self {
        Self {
            event: EventKind::Arrive,
            car_id: car_id.to_owned(),
            timestamp,
            park_x: None,
            park_y: None,
            price: None,
        }
    }

    pub fn park(car_id: &str, timestamp: i64, stall: Stall) -> Self {
        Self {
            event: EventKind::Park,
            car_id: car_id.to_owned(),
            timestamp,
            park_x: Some(stall.x),
            park_y: Some(stall.y),
            price: None,
        }
    }

    pub fn drove_away(car_id: &str, timestamp: i64) -> Self {
        Self {
            event: EventKind::DroveAway,
            car_id: car_id.to_owned(),
            timestamp,
            park_x: None,
            park_y: None,
            price: None,
        }
    }

    pub fn leave(car_id: &str, timestamp: i64, stall: Stall, price: f64) -> Self {
        Self {
            event: EventKind::Leave,
            car_id: car_id.to_owned(),
            timestamp,
            park_x: Some(stall.x),
            park_y: Some(stall.y),
            price: Some(price),
        }
    }
}

/// Error from a sink write. A failed write is fatal for the session.
#[derive(Debug, thiserror::Error)]
#[error("event sink closed")]
pub struct SinkError;

/// Destination for encoded event frames.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn send(&self, frame: String) -> Result<(), SinkError>;
}
