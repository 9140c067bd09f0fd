//! The broker: event dispatch over the presence registry and room index.
//!
//! All shared state lives behind one mutex, so each inbound event handler
//! runs as an atomic transaction against the registry and the index (the
//! scheduled grace-delay deletions and the sweeper serialize through the
//! same lock). Outbound delivery goes through the [`EventSink`]
//! collaborator, which enqueues without blocking the handler.

use crate::presence::PresenceRegistry;
use crate::rooms::RoomIndex;
use crate::sink::EventSink;
use beacon_protocol::{ServerEvent, UserSummary};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Ack error code for a failed group join.
const CODE_JOIN_FAILED: u16 = 1002;
/// Ack error code for a failed group leave.
const CODE_LEAVE_FAILED: u16 = 1003;

/// Broker timing configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Period of the stale-presence sweep.
    pub sweep_interval: Duration,
    /// Offline age past which the sweeper deletes an entry.
    pub offline_expiry: Duration,
    /// Delay between disconnect and registry deletion, so a fast reconnect
    /// can reclaim its identity.
    pub disconnect_grace: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            offline_expiry: Duration::from_secs(300),
            disconnect_grace: Duration::from_secs(5),
        }
    }
}

/// Counts for the status surface.
#[derive(Debug, Clone, Copy)]
pub struct BrokerStats {
    /// Tracked users, online or offline.
    pub users: usize,
    /// Users currently online.
    pub online: usize,
    /// Live rooms.
    pub rooms: usize,
}

/// Shared state guarded by the broker's single mutex.
pub(crate) struct BrokerState {
    pub(crate) registry: PresenceRegistry,
    pub(crate) rooms: RoomIndex,
    /// Scheduled grace-delay deletions, keyed by logical user id.
    pending_removals: HashMap<String, JoinHandle<()>>,
}

/// The coordinating component owning presence and room state.
pub struct Broker {
    pub(crate) state: Mutex<BrokerState>,
    sink: Arc<dyn EventSink>,
    config: BrokerConfig,
}

impl Broker {
    /// Create a broker with default timing.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_config(sink, BrokerConfig::default())
    }

    /// Create a broker with custom timing.
    #[must_use]
    pub fn with_config(sink: Arc<dyn EventSink>, config: BrokerConfig) -> Self {
        info!("Creating broker with config: {:?}", config);
        Self {
            state: Mutex::new(BrokerState {
                registry: PresenceRegistry::new(),
                rooms: RoomIndex::new(),
                pending_removals: HashMap::new(),
            }),
            sink,
            config,
        }
    }

    pub(crate) fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }

    /// Register a logical identity for a connection.
    ///
    /// Never fails. Cancels any deletion still pending for the identity,
    /// replies `user-registered`, and broadcasts a fresh `user-list`.
    pub async fn handle_register(
        &self,
        connection_id: &str,
        user_id: Option<String>,
        name: Option<String>,
    ) {
        let mut state = self.state.lock().await;

        if let Some(requested) = user_id.as_deref() {
            // A reconnect supersedes any deletion scheduled for this identity.
            if let Some(handle) = state.pending_removals.remove(requested) {
                handle.abort();
                debug!(user = %requested, "Cancelled pending removal on re-register");
            }
        }

        let user = state
            .registry
            .register(connection_id, user_id.as_deref(), name.as_deref());
        let users = state.registry.snapshot();

        let personal_room = format!("user:{}", user.id);
        if let Err(e) = self.sink.add_to_group(connection_id, &personal_room).await {
            warn!(user = %user.id, error = %e, "Personal group join failed");
        }

        let _ = self
            .sink
            .send_to(
                connection_id,
                ServerEvent::UserRegistered {
                    user_id: user.id.clone(),
                    name: user.name.clone(),
                    personal_room,
                },
            )
            .await;
        self.sink.broadcast(ServerEvent::UserList { users }).await;

        info!(user = %user.id, connection = %connection_id, "User registered");
    }

    /// Join a room, acknowledged with `ack` or `error`.
    ///
    /// Idempotent: a redundant join still acks but emits no membership
    /// notification to the room.
    pub async fn handle_join_room(&self, connection_id: &str, request_id: u64, room_id: &str) {
        let mut state = self.state.lock().await;
        let Some(user) = state.registry.lookup_by_connection(connection_id).cloned() else {
            warn!(connection = %connection_id, room = %room_id, "Join from unregistered connection dropped");
            return;
        };

        match self.sink.add_to_group(connection_id, room_id).await {
            Ok(()) => {
                let newly_joined = state.rooms.join(room_id, connection_id, &user.id);
                if newly_joined {
                    self.sink
                        .broadcast_to_group(
                            room_id,
                            ServerEvent::UserJoinedRoom {
                                user_id: user.id.clone(),
                                user_name: user.name.clone(),
                                room_id: room_id.to_string(),
                            },
                            Some(connection_id),
                        )
                        .await;
                }
                let _ = self
                    .sink
                    .send_to(connection_id, ServerEvent::ack(request_id, room_id))
                    .await;
            }
            Err(e) => {
                warn!(connection = %connection_id, room = %room_id, error = %e, "Group join failed");
                let _ = self
                    .sink
                    .send_to(
                        connection_id,
                        ServerEvent::error(request_id, CODE_JOIN_FAILED, e.to_string()),
                    )
                    .await;
            }
        }
    }

    /// Leave a room, acknowledged with `ack` or `error`. Idempotent.
    pub async fn handle_leave_room(&self, connection_id: &str, request_id: u64, room_id: &str) {
        let mut state = self.state.lock().await;
        let Some(user) = state.registry.lookup_by_connection(connection_id).cloned() else {
            warn!(connection = %connection_id, room = %room_id, "Leave from unregistered connection dropped");
            return;
        };

        match self.sink.remove_from_group(connection_id, room_id).await {
            Ok(()) => {
                let was_member = state.rooms.leave(room_id, connection_id, &user.id);
                if was_member {
                    self.sink
                        .broadcast_to_group(
                            room_id,
                            ServerEvent::UserLeftRoom {
                                user_id: user.id.clone(),
                                user_name: user.name.clone(),
                                room_id: room_id.to_string(),
                            },
                            Some(connection_id),
                        )
                        .await;
                }
                let _ = self
                    .sink
                    .send_to(
                        connection_id,
                        ServerEvent::Ack {
                            id: request_id,
                            room_id: None,
                        },
                    )
                    .await;
            }
            Err(e) => {
                warn!(connection = %connection_id, room = %room_id, error = %e, "Group leave failed");
                let _ = self
                    .sink
                    .send_to(
                        connection_id,
                        ServerEvent::error(request_id, CODE_LEAVE_FAILED, e.to_string()),
                    )
                    .await;
            }
        }
    }

    /// Handle a transport-level disconnect.
    ///
    /// Marks the user offline, vacates their rooms with `user-left-room`
    /// notifications, broadcasts the presence change, and schedules the
    /// grace-delay deletion of the registry entry.
    pub async fn handle_disconnect(self: Arc<Self>, connection_id: &str) {
        let mut state = self.state.lock().await;
        let Some(user) = state.registry.mark_offline(connection_id) else {
            debug!(connection = %connection_id, "Disconnect from unknown connection");
            return;
        };

        let vacated = state.rooms.remove_user(&user.id, connection_id);
        for room in &vacated {
            self.sink
                .broadcast_to_group(
                    room,
                    ServerEvent::UserLeftRoom {
                        user_id: user.id.clone(),
                        user_name: user.name.clone(),
                        room_id: room.clone(),
                    },
                    Some(connection_id),
                )
                .await;
        }

        let users = state.registry.snapshot();
        self.sink.broadcast(ServerEvent::UserList { users }).await;

        let broker = Arc::clone(&self);
        let user_id = user.id.clone();
        let grace = self.config.disconnect_grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            broker.expire_offline_user(&user_id).await;
        });
        if let Some(previous) = state.pending_removals.insert(user.id.clone(), handle) {
            previous.abort();
        }

        info!(user = %user.id, rooms = vacated.len(), "User disconnected");
    }

    /// Delete a registry entry after the grace window, unless the user came
    /// back in the meantime.
    async fn expire_offline_user(&self, user_id: &str) {
        let mut state = self.state.lock().await;
        state.pending_removals.remove(user_id);

        // A reconnect between scheduling and firing keeps the entry.
        let still_offline = state
            .registry
            .lookup_by_user(user_id)
            .is_some_and(|u| !u.online);
        if !still_offline {
            return;
        }

        state.registry.remove(user_id);
        state.rooms.purge_user(user_id);
        let users = state.registry.snapshot();
        self.sink.broadcast(ServerEvent::UserList { users }).await;
        debug!(user = %user_id, "Expired offline user after grace window");
    }

    /// Spawn the periodic presence sweeper.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let broker = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(broker.config.sweep_interval);
            loop {
                ticker.tick().await;
                broker.sweep().await;
            }
        })
    }

    /// One sweep pass: drop offline entries older than the expiry threshold
    /// along with their room reverse-index entries.
    pub async fn sweep(&self) {
        let mut state = self.state.lock().await;
        let removed = state.registry.prune_stale(self.config.offline_expiry);
        if removed.is_empty() {
            return;
        }

        for user_id in &removed {
            state.rooms.purge_user(user_id);
            if let Some(handle) = state.pending_removals.remove(user_id) {
                handle.abort();
            }
        }

        let users = state.registry.snapshot();
        self.sink.broadcast(ServerEvent::UserList { users }).await;
        debug!(count = removed.len(), "Swept expired offline users");
    }

    /// Counts for the status surface.
    pub async fn stats(&self) -> BrokerStats {
        let state = self.state.lock().await;
        BrokerStats {
            users: state.registry.len(),
            online: state.registry.online_count(),
            rooms: state.rooms.room_count(),
        }
    }

    /// Full presence snapshot, as broadcast in `user-list`.
    pub async fn user_list(&self) -> Vec<UserSummary> {
        self.state.lock().await.registry.snapshot()
    }

    /// Online users only, for the users listing.
    pub async fn online_users(&self) -> Vec<UserSummary> {
        let mut users = self.user_list().await;
        users.retain(|u| u.online);
        users
    }
}
