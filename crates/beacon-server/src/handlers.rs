//! Connection handlers for the Beacon server.
//!
//! This module wires the WebSocket endpoint to the broker: inbound frames
//! become broker calls, and the broker's outbound events drain through the
//! gateway queue back onto the socket.

use crate::config::Config;
use crate::gateway::{self, WsGateway};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use beacon_core::{ids, Broker, EventSink};
use beacon_protocol::{codec, ClientEvent, ServerEvent, PROTOCOL_VERSION};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The coordination core.
    pub broker: Arc<Broker>,
    /// Connection and group tables.
    pub gateway: Arc<WsGateway>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let gateway = Arc::new(WsGateway::new());
        let broker = Arc::new(Broker::with_config(
            gateway.clone(),
            config.broker_config(),
        ));

        Self {
            broker,
            gateway,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Periodic reconciliation of stale offline entries
    let _sweeper = state.broker.clone().spawn_sweeper();

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/users", get(users_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health probe: broker counts and current time.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.broker.stats().await;
    Json(serde_json::json!({
        "status": "ok",
        "users": stats.users,
        "rooms": stats.rooms,
        "time": ids::now_ms(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Listing of online users.
async fn users_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.broker.online_users().await)
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = gateway::generate_connection_id();
    debug!(connection = %connection_id, "WebSocket connected");

    // Attach the outbound queue before anything can address this connection.
    let mut outbound = state.gateway.register_connection(&connection_id);

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Handshake, then the presence snapshot every new connection gets.
    let connected = ServerEvent::Connected {
        connection_id: connection_id.clone(),
        version: PROTOCOL_VERSION,
        heartbeat: state.config.heartbeat.interval_ms as u32,
    };
    let user_list = ServerEvent::UserList {
        users: state.broker.user_list().await,
    };
    for event in [connected, user_list] {
        if send_event(&mut sender, &event).await.is_err() {
            error!(connection = %connection_id, "Failed to send handshake");
            state.gateway.remove_connection(&connection_id);
            return;
        }
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Drain broker-issued events to the socket
            Some(event) = outbound.recv() => {
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_message_size {
                            warn!(connection = %connection_id, bytes = data.len(), "Oversize message; closing");
                            metrics::record_error("oversize");
                            break;
                        }

                        let start = Instant::now();
                        metrics::record_bytes(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        if !drain_events(&mut read_buffer, &connection_id, &state).await {
                            break;
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());

                        if !drain_events(&mut read_buffer, &connection_id, &state).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: presence, rooms, then the transport tables.
    state.broker.clone().handle_disconnect(&connection_id).await;
    state.gateway.remove_connection(&connection_id);
    metrics::set_broker_gauges(state.broker.stats().await);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Decode and dispatch every complete event in the read buffer.
///
/// Returns `false` when the connection should be closed.
async fn drain_events(
    read_buffer: &mut BytesMut,
    connection_id: &str,
    state: &Arc<AppState>,
) -> bool {
    loop {
        match codec::decode_from::<ClientEvent>(read_buffer) {
            Ok(Some(event)) => dispatch_event(event, connection_id, state).await,
            Ok(None) => return true,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Undecodable event; closing");
                metrics::record_error("decode");
                return false;
            }
        }
    }
}

/// Route one decoded client event into the broker.
async fn dispatch_event(event: ClientEvent, connection_id: &str, state: &Arc<AppState>) {
    match event {
        ClientEvent::Register { user_id, name } => {
            metrics::record_event("register", "inbound");
            state
                .broker
                .handle_register(connection_id, user_id, name)
                .await;
            metrics::set_broker_gauges(state.broker.stats().await);
        }

        ClientEvent::JoinRoom { id, room_id } => {
            metrics::record_event("join-room", "inbound");
            state
                .broker
                .handle_join_room(connection_id, id, &room_id)
                .await;
            metrics::set_broker_gauges(state.broker.stats().await);
        }

        ClientEvent::LeaveRoom { id, room_id } => {
            metrics::record_event("leave-room", "inbound");
            state
                .broker
                .handle_leave_room(connection_id, id, &room_id)
                .await;
            metrics::set_broker_gauges(state.broker.stats().await);
        }

        ClientEvent::Signal { to, body } => {
            metrics::record_event("signal", "inbound");
            state.broker.handle_signal(connection_id, &to, body).await;
        }

        ClientEvent::ChatMessage {
            recipient_id,
            content,
            kind,
        } => {
            metrics::record_event("chat-message", "inbound");
            state
                .broker
                .handle_chat(connection_id, &recipient_id, content, kind)
                .await;
        }

        ClientEvent::Typing {
            recipient_id,
            is_typing,
        } => {
            metrics::record_event("typing", "inbound");
            state
                .broker
                .handle_typing(connection_id, &recipient_id, is_typing)
                .await;
        }

        ClientEvent::Ping { timestamp } => {
            let _ = state
                .gateway
                .send_to(connection_id, ServerEvent::Pong { timestamp })
                .await;
        }
    }
}

/// Encode and send one event on the socket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<()> {
    let data = codec::encode(event)?;
    metrics::record_event(event.name(), "outbound");
    metrics::record_bytes(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}
