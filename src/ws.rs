//! WebSocket surface for simulation sessions.
//!
//! One connection is one session. The first inbound frame must be the init
//! payload (parking descriptor plus both distribution configs); a payload
//! that fails validation gets a single JSON error object back and the
//! channel closes. After a successful init the client drives the session
//! with plain-text control messages (`start`, `pause`, `resume`, `stop`,
//! `park <id> [<id>...]`) and receives one JSON event per frame, with a
//! ping every 15 real seconds to keep the channel alive.

use crate::config::Config;
use crate::events::{EventSink, SinkError};
use crate::grid::{Parking, TopologyError};
use crate::random::{ArrivalConfig, ConfigError, ParkingTimeConfig};
use crate::session::Session;
use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// How often the write loop pings an otherwise idle channel.
const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Capacity of the outbound frame channel feeding the write loop.
const OUTBOUND_CAPACITY: usize = 256;

/// Build the simulation router.
pub fn router(config: Arc<Config>) -> Router {
    Router::new()
        .route("/simulation", get(ws_handler))
        .with_state(config)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(config): State<Arc<Config>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, config))
}

/// Session init payload: the first frame on a fresh connection.
#[derive(Debug, Deserialize)]
struct InitParams {
    parking: Parking,
    arrival_config: ArrivalConfig,
    parking_time_config: ParkingTimeConfig,
    /// Unix seconds seeding the virtual clock; 0 or absent means "now".
    #[serde(default)]
    start_time: i64,
    /// Optional PRNG seed for reproducible runs.
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
enum InitError {
    #[error("error while reading params: {0}")]
    Read(String),

    #[error("error while parsing params: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid parking: {0}")]
    Parking(#[from] TopologyError),

    #[error("invalid arrival_config: {0}")]
    Arrival(ConfigError),

    #[error("invalid parking_time_config: {0}")]
    ParkingTime(ConfigError),

    #[error("connection closed before init")]
    Closed,

    #[error("timed out waiting for init")]
    Timeout,
}

/// Sink handing encoded event frames to the connection's write loop.
struct ChannelSink {
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, frame: String) -> Result<(), SinkError> {
        self.tx
            .send(Message::Text(frame.into()))
            .await
            .map_err(|_| SinkError)
    }
}

async fn handle_socket(mut socket: WebSocket, config: Arc<Config>) {
    let init = match read_init(&mut socket, config.idle_timeout()).await {
        Ok(init) => init,
        Err(error) => {
            warn!(error = %error, "rejecting session init");
            let reply = serde_json::json!({ "error": error.to_string() });
            let _ = socket.send(Message::Text(reply.to_string().into())).await;
            return;
        }
    };

    let (sender, receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    tokio::spawn(write_loop(sender, out_rx));

    let session = Session::new(
        &init.parking,
        init.arrival_config,
        init.parking_time_config,
        init.start_time,
        init.seed,
        Arc::new(ChannelSink {
            tx: out_tx.clone(),
        }),
    );

    // Init accepted; the client may now send control messages.
    if out_tx.send(Message::Text("ok".into())).await.is_err() {
        session.stop().await;
        return;
    }

    info!("simulation session established");
    read_loop(receiver, &session, config.idle_timeout()).await;
    session.stop().await;
}

/// Read frames until a valid init payload shows up, or fail.
async fn read_init(socket: &mut WebSocket, idle: Duration) -> Result<InitParams, InitError> {
    loop {
        let msg = tokio::time::timeout(idle, socket.recv())
            .await
            .map_err(|_| InitError::Timeout)?
            .ok_or(InitError::Closed)?
            .map_err(|error| InitError::Read(error.to_string()))?;

        match msg {
            Message::Text(text) => return parse_init(text.as_str()),
            Message::Close(_) => return Err(InitError::Closed),
            // Control frames before init are fine; keep waiting.
            _ => continue,
        }
    }
}

fn parse_init(text: &str) -> Result<InitParams, InitError> {
    let params: InitParams = serde_json::from_str(text)?;
    params.parking.validate()?;
    params
        .arrival_config
        .validate()
        .map_err(InitError::Arrival)?;
    params
        .parking_time_config
        .validate()
        .map_err(InitError::ParkingTime)?;
    Ok(params)
}

/// Dispatch control messages until the client disconnects, goes idle, or
/// asks for a stop. Unknown messages are ignored.
async fn read_loop(mut receiver: SplitStream<WebSocket>, session: &Session, idle: Duration) {
    loop {
        let msg = match tokio::time::timeout(idle, receiver.next()).await {
            Err(_) => {
                info!("client idle past timeout, closing session");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(error))) => {
                debug!(error = %error, "websocket read failed");
                return;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => match text.as_str() {
                "start" => session.start().await,
                "pause" => session.pause().await,
                "resume" => session.resume().await,
                "stop" => {
                    session.stop().await;
                    return;
                }
                other if other.starts_with("park") => session.check_park(other).await,
                other => trace!(msg = other, "ignoring unknown control message"),
            },
            Message::Close(_) => return,
            _ => {}
        }
    }
}

/// Forward outbound frames to the socket, pinging on an idle channel.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first interval tick completes immediately.
    ping.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { return };
                if let Err(error) = sender.send(msg).await {
                    debug!(error = %error, "websocket write failed");
                    return;
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                    return;
                }
            }
        }
    }
}
