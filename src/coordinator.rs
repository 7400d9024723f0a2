//! Room Coordinator (C4) — the only process-wide mutable state in the
//! application (§5). Tracks live guest presence, fans broadcasts out over
//! the WebSocket fabric, and evaluates the "all guests synced" predicate
//! that drives room finalization.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Invoked when a guest binds a `recordingId` and a display name is known;
/// persists the participant name into the recording's metadata (§4.4).
pub type RecordingLinkedCallback =
    Arc<dyn Fn(String, String, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked the moment the "all guests synced" predicate transitions to
/// true while the room is `finalizing`; drives the room's advance to
/// `finished` (§4.1).
pub type AllSyncedCallback = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Recording,
    Uploading,
    Synced,
    Error,
}

impl SyncState {
    fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Recording => "recording",
            SyncState::Uploading => "uploading",
            SyncState::Synced => "synced",
            SyncState::Error => "error",
        }
    }
}

/// Ephemeral per-guest record; never persisted (§3).
#[derive(Debug, Clone, Serialize)]
pub struct GuestPresence {
    pub guest_id: String,
    pub connection_id: u64,
    pub name: Option<String>,
    pub recording_id: Option<String>,
    pub sync_state: SyncState,
    pub uploaded_chunks: u64,
    pub total_chunks: u64,
    pub last_updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub media_status: Option<Value>,
}

impl GuestPresence {
    fn new(guest_id: String, connection_id: u64, name: Option<String>) -> Self {
        Self {
            guest_id,
            connection_id,
            name,
            recording_id: None,
            sync_state: SyncState::Idle,
            uploaded_chunks: 0,
            total_chunks: 0,
            last_updated_at: Utc::now(),
            error_message: None,
            media_status: None,
        }
    }
}

/// Messages a connected client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: String,
        name: Option<String>,
    },
    LeaveRoom {
        room_id: String,
    },
    SetRecordingId {
        room_id: String,
        recording_id: String,
    },
    GuestSyncUpdate {
        room_id: String,
        recording_id: String,
        sync_state: SyncState,
        uploaded_chunks: u64,
        total_chunks: u64,
    },
    GuestSyncComplete {
        room_id: String,
        recording_id: String,
        total_chunks: u64,
    },
    GuestSyncError {
        room_id: String,
        recording_id: String,
        error_message: String,
        failed_chunks: u64,
    },
    GuestMediaStatusUpdate {
        room_id: String,
        media_status: Value,
    },
    GuestWaveformUpdate {
        room_id: String,
        waveform_data: Vec<f32>,
        is_silent: bool,
    },
    TimeSyncPing {
        room_id: String,
        client_send_time: i64,
    },
}

/// Messages the server emits, either broadcast to a room or unicast to one
/// connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomGuests {
        guests: Vec<GuestPresence>,
        timestamp: DateTime<Utc>,
    },
    GuestJoined {
        guest: GuestPresence,
        timestamp: DateTime<Utc>,
    },
    GuestLeft {
        guest_id: String,
        timestamp: DateTime<Utc>,
    },
    GuestRecordingLinked {
        guest_id: String,
        recording_id: String,
        timestamp: DateTime<Utc>,
    },
    GuestSyncStateChanged {
        guest_id: String,
        sync_state: SyncState,
        uploaded_chunks: u64,
        total_chunks: u64,
        timestamp: DateTime<Utc>,
    },
    GuestSyncComplete {
        guest_id: String,
        total_chunks: u64,
        timestamp: DateTime<Utc>,
    },
    GuestSyncError {
        guest_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
    GuestMediaStatusChanged {
        guest_id: String,
        media_status: Value,
        timestamp: DateTime<Utc>,
    },
    GuestWaveformChanged {
        guest_id: String,
        waveform_data: Vec<f32>,
        is_silent: bool,
        timestamp: DateTime<Utc>,
    },
    TimeSyncPong {
        client_send_time: i64,
        server_receive_time: i64,
        server_send_time: i64,
    },
    RoomStateChanged {
        room_id: String,
        state: String,
        timestamp: DateTime<Utc>,
    },
    ScheduledRecordingStart {
        room_id: String,
        start_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
}

struct RoomEntry {
    guests: HashMap<String, GuestPresence>,
}

impl RoomEntry {
    fn new() -> Self {
        Self {
            guests: HashMap::new(),
        }
    }
}

/// Which participant a connection represents. Directors/observers join
/// without a `name` and are tracked for delivery but never appear as guest
/// presence.
#[derive(Clone)]
enum ConnectionRole {
    Guest(String),
    Observer,
}

struct ConnectionEntry {
    room_id: String,
    role: ConnectionRole,
    sender: mpsc::UnboundedSender<Message>,
}

/// Authoritative in-memory tracker of live-room presence and the WebSocket
/// fabric. The three maps named in §4.4 are: `rooms` (roomId → guestId →
/// presence), `connections` (connectionId → (roomId, guestId-or-observer)),
/// and the guest count derived from `rooms` on demand.
pub struct RoomCoordinator {
    rooms: RwLock<HashMap<String, RoomEntry>>,
    connections: RwLock<HashMap<u64, ConnectionEntry>>,
    next_connection_id: AtomicU64,
    recording_linked: RecordingLinkedCallback,
    all_synced: AllSyncedCallback,
}

impl RoomCoordinator {
    pub fn new(recording_linked: RecordingLinkedCallback, all_synced: AllSyncedCallback) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            recording_linked,
            all_synced,
        }
    }

    /// Registers a new transport connection and returns its id, the sending
    /// half of its outbound message channel (handed back into
    /// [`handle_client_event`] on every call so `join_room`/unicast replies
    /// reach the socket), and the receiving half, which the caller (the WS
    /// handler) forwards to the real socket on a dedicated task.
    pub fn register_connection(&self) -> (u64, mpsc::UnboundedSender<Message>, mpsc::UnboundedReceiver<Message>) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        (id, tx, rx)
    }

    async fn attach(&self, connection_id: u64, room_id: &str, role: ConnectionRole, sender: mpsc::UnboundedSender<Message>) {
        let mut connections = self.connections.write().await;
        connections.insert(
            connection_id,
            ConnectionEntry {
                room_id: room_id.to_string(),
                role,
                sender,
            },
        );
    }

    fn send_to(&self, sender: &mpsc::UnboundedSender<Message>, event: &ServerEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = sender.send(Message::Text(json.into()));
        }
    }

    async fn broadcast(&self, room_id: &str, event: &ServerEvent) {
        let connections = self.connections.read().await;
        for entry in connections.values() {
            if entry.room_id == room_id {
                self.send_to(&entry.sender, event);
            }
        }
    }

    /// Handles one client-originated event on an already-registered
    /// connection. `sender` is the connection's own outbound channel,
    /// used for `join_room`'s room-snapshot reply and for unicast replies.
    pub async fn handle_client_event(
        &self,
        connection_id: u64,
        sender: mpsc::UnboundedSender<Message>,
        event: ClientEvent,
    ) {
        match event {
            ClientEvent::JoinRoom { room_id, name } => {
                self.join_room(connection_id, room_id, name, sender).await;
            }
            ClientEvent::LeaveRoom { room_id: _ } => {
                self.leave_room(connection_id).await;
            }
            ClientEvent::SetRecordingId {
                room_id,
                recording_id,
            } => {
                let _ = room_id;
                self.set_recording_id(connection_id, recording_id).await;
            }
            ClientEvent::GuestSyncUpdate {
                room_id,
                recording_id: _,
                sync_state,
                uploaded_chunks,
                total_chunks,
            } => {
                let _ = room_id;
                self.guest_sync_update(connection_id, sync_state, uploaded_chunks, total_chunks)
                    .await;
            }
            ClientEvent::GuestSyncComplete {
                room_id,
                recording_id: _,
                total_chunks,
            } => {
                let _ = room_id;
                self.guest_sync_complete(connection_id, total_chunks).await;
            }
            ClientEvent::GuestSyncError {
                room_id,
                recording_id: _,
                error_message,
                failed_chunks: _,
            } => {
                let _ = room_id;
                self.guest_sync_error(connection_id, error_message).await;
            }
            ClientEvent::GuestMediaStatusUpdate { room_id, media_status } => {
                let _ = room_id;
                self.guest_media_status_update(connection_id, media_status).await;
            }
            ClientEvent::GuestWaveformUpdate {
                room_id,
                waveform_data,
                is_silent,
            } => {
                let _ = room_id;
                self.guest_waveform_update(connection_id, waveform_data, is_silent)
                    .await;
            }
            ClientEvent::TimeSyncPing {
                room_id: _,
                client_send_time,
            } => {
                let server_receive_time = Utc::now().timestamp_millis();
                let server_send_time = Utc::now().timestamp_millis();
                self.send_to(
                    &sender,
                    &ServerEvent::TimeSyncPong {
                        client_send_time,
                        server_receive_time,
                        server_send_time,
                    },
                );
            }
        }
    }

    async fn join_room(&self, connection_id: u64, room_id: String, name: Option<String>, sender: mpsc::UnboundedSender<Message>) {
        match name {
            None => {
                self.attach(connection_id, &room_id, ConnectionRole::Observer, sender.clone())
                    .await;
                let guests = {
                    let rooms = self.rooms.read().await;
                    rooms
                        .get(&room_id)
                        .map(|r| r.guests.values().cloned().collect())
                        .unwrap_or_default()
                };
                self.send_to(
                    &sender,
                    &ServerEvent::RoomGuests {
                        guests,
                        timestamp: Utc::now(),
                    },
                );
            }
            Some(name) => {
                let guest_id = Uuid::new_v4().to_string();
                let presence = GuestPresence::new(guest_id.clone(), connection_id, Some(name));

                {
                    let mut rooms = self.rooms.write().await;
                    let entry = rooms.entry(room_id.clone()).or_insert_with(RoomEntry::new);
                    entry.guests.insert(guest_id.clone(), presence.clone());
                }

                self.attach(connection_id, &room_id, ConnectionRole::Guest(guest_id), sender)
                    .await;

                self.broadcast(
                    &room_id,
                    &ServerEvent::GuestJoined {
                        guest: presence,
                        timestamp: Utc::now(),
                    },
                )
                .await;
            }
        }
    }

    async fn connection_guest_id(&self, connection_id: u64) -> Option<(String, String)> {
        let connections = self.connections.read().await;
        let entry = connections.get(&connection_id)?;
        match &entry.role {
            ConnectionRole::Guest(guest_id) => Some((entry.room_id.clone(), guest_id.clone())),
            ConnectionRole::Observer => None,
        }
    }

    async fn leave_room(&self, connection_id: u64) {
        let Some((room_id, guest_id)) = self.connection_guest_id(connection_id).await else {
            return;
        };
        self.remove_presence(&room_id, &guest_id).await;
        self.connections.write().await.remove(&connection_id);
    }

    async fn remove_presence(&self, room_id: &str, guest_id: &str) {
        {
            let mut rooms = self.rooms.write().await;
            if let Some(entry) = rooms.get_mut(room_id) {
                entry.guests.remove(guest_id);
            }
        }
        self.broadcast(
            room_id,
            &ServerEvent::GuestLeft {
                guest_id: guest_id.to_string(),
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    /// Called by the WS handler when the transport closes without a prior
    /// `leave_room`, per §4.4's "transport failure" behavior.
    pub async fn handle_disconnect(&self, connection_id: u64) {
        if let Some((room_id, guest_id)) = self.connection_guest_id(connection_id).await {
            self.remove_presence(&room_id, &guest_id).await;
        }
        self.connections.write().await.remove(&connection_id);
    }

    async fn set_recording_id(&self, connection_id: u64, recording_id: String) {
        let Some((room_id, guest_id)) = self.connection_guest_id(connection_id).await else {
            return;
        };
        let name = {
            let mut rooms = self.rooms.write().await;
            let Some(entry) = rooms.get_mut(&room_id) else {
                return;
            };
            let Some(presence) = entry.guests.get_mut(&guest_id) else {
                return;
            };
            presence.recording_id = Some(recording_id.clone());
            presence.last_updated_at = Utc::now();
            presence.name.clone()
        };

        if let Some(name) = name {
            (self.recording_linked)(room_id.clone(), recording_id.clone(), name).await;
        }

        self.broadcast(
            &room_id,
            &ServerEvent::GuestRecordingLinked {
                guest_id,
                recording_id,
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    async fn guest_sync_update(
        &self,
        connection_id: u64,
        sync_state: SyncState,
        uploaded_chunks: u64,
        total_chunks: u64,
    ) {
        let Some((room_id, guest_id)) = self.connection_guest_id(connection_id).await else {
            return;
        };
        {
            let mut rooms = self.rooms.write().await;
            if let Some(entry) = rooms.get_mut(&room_id) {
                if let Some(presence) = entry.guests.get_mut(&guest_id) {
                    presence.sync_state = sync_state;
                    presence.uploaded_chunks = uploaded_chunks;
                    presence.total_chunks = total_chunks;
                    presence.last_updated_at = Utc::now();
                }
            }
        }

        self.broadcast(
            &room_id,
            &ServerEvent::GuestSyncStateChanged {
                guest_id,
                sync_state,
                uploaded_chunks,
                total_chunks,
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    async fn guest_sync_complete(&self, connection_id: u64, total_chunks: u64) {
        let Some((room_id, guest_id)) = self.connection_guest_id(connection_id).await else {
            return;
        };
        {
            let mut rooms = self.rooms.write().await;
            if let Some(entry) = rooms.get_mut(&room_id) {
                if let Some(presence) = entry.guests.get_mut(&guest_id) {
                    presence.sync_state = SyncState::Synced;
                    presence.total_chunks = total_chunks;
                    presence.last_updated_at = Utc::now();
                }
            }
        }

        self.broadcast(
            &room_id,
            &ServerEvent::GuestSyncComplete {
                guest_id,
                total_chunks,
                timestamp: Utc::now(),
            },
        )
        .await;

        if self.all_synced(&room_id).await {
            (self.all_synced_cb())(room_id).await;
        }
    }

    fn all_synced_cb(&self) -> &AllSyncedCallback {
        &self.all_synced
    }

    async fn guest_sync_error(&self, connection_id: u64, error_message: String) {
        let Some((room_id, guest_id)) = self.connection_guest_id(connection_id).await else {
            return;
        };
        {
            let mut rooms = self.rooms.write().await;
            if let Some(entry) = rooms.get_mut(&room_id) {
                if let Some(presence) = entry.guests.get_mut(&guest_id) {
                    presence.sync_state = SyncState::Error;
                    presence.error_message = Some(error_message.clone());
                    presence.last_updated_at = Utc::now();
                }
            }
        }

        self.broadcast(
            &room_id,
            &ServerEvent::GuestSyncError {
                guest_id,
                error_message,
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    async fn guest_media_status_update(&self, connection_id: u64, media_status: Value) {
        let Some((room_id, guest_id)) = self.connection_guest_id(connection_id).await else {
            return;
        };
        {
            let mut rooms = self.rooms.write().await;
            if let Some(entry) = rooms.get_mut(&room_id) {
                if let Some(presence) = entry.guests.get_mut(&guest_id) {
                    presence.media_status = Some(media_status.clone());
                    presence.last_updated_at = Utc::now();
                }
            }
        }

        self.broadcast(
            &room_id,
            &ServerEvent::GuestMediaStatusChanged {
                guest_id,
                media_status,
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    /// Waveform updates are forward-only: no presence mutation, no log
    /// line (§4.4).
    async fn guest_waveform_update(&self, connection_id: u64, waveform_data: Vec<f32>, is_silent: bool) {
        let Some((room_id, guest_id)) = self.connection_guest_id(connection_id).await else {
            return;
        };
        self.broadcast(
            &room_id,
            &ServerEvent::GuestWaveformChanged {
                guest_id,
                waveform_data,
                is_silent,
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    /// The "all guests synced" predicate (§4.4): vacuously true if no
    /// guest in the room has bound a `recordingId` yet.
    pub async fn all_synced(&self, room_id: &str) -> bool {
        let rooms = self.rooms.read().await;
        let Some(entry) = rooms.get(room_id) else {
            return true;
        };
        entry
            .guests
            .values()
            .filter(|p| p.recording_id.is_some())
            .all(|p| p.sync_state == SyncState::Synced)
    }

    pub async fn guest_count(&self, room_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|r| r.guests.len()).unwrap_or(0)
    }

    /// Broadcasts the room's new state; used by the Application Core after
    /// a successful §4.1 transition.
    pub async fn broadcast_room_state_changed(&self, room_id: &str, state: &str) {
        self.broadcast(
            room_id,
            &ServerEvent::RoomStateChanged {
                room_id: room_id.to_string(),
                state: state.to_string(),
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    /// Broadcasts the scheduled-start timestamp emitted on `idle →
    /// recording` (§4.1).
    pub async fn broadcast_scheduled_start(&self, room_id: &str, start_at: DateTime<Utc>) {
        self.broadcast(
            room_id,
            &ServerEvent::ScheduledRecordingStart {
                room_id: room_id.to_string(),
                start_at,
                timestamp: Utc::now(),
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_callbacks() -> (RecordingLinkedCallback, AllSyncedCallback) {
        let linked: RecordingLinkedCallback = Arc::new(|_, _, _| Box::pin(async {}));
        let synced: AllSyncedCallback = Arc::new(|_| Box::pin(async {}));
        (linked, synced)
    }

    #[tokio::test]
    async fn all_synced_is_vacuously_true_for_empty_room() {
        let (linked, synced) = noop_callbacks();
        let coordinator = RoomCoordinator::new(linked, synced);
        assert!(coordinator.all_synced("R1").await);
    }

    #[tokio::test]
    async fn join_and_sync_predicate() {
        let (linked, synced) = noop_callbacks();
        let coordinator = RoomCoordinator::new(linked, synced);

        let (conn_id, tx, _rx) = coordinator.register_connection();
        coordinator
            .handle_client_event(
                conn_id,
                tx.clone(),
                ClientEvent::JoinRoom {
                    room_id: "R1".to_string(),
                    name: Some("Alice".to_string()),
                },
            )
            .await;

        assert_eq!(coordinator.guest_count("R1").await, 1);

        coordinator
            .handle_client_event(
                conn_id,
                tx.clone(),
                ClientEvent::SetRecordingId {
                    room_id: "R1".to_string(),
                    recording_id: "rec-a".to_string(),
                },
            )
            .await;

        // Now that a guest is bound to a recording, the predicate is false
        // until it reports sync completion.
        assert!(!coordinator.all_synced("R1").await);

        coordinator
            .handle_client_event(
                conn_id,
                tx,
                ClientEvent::GuestSyncComplete {
                    room_id: "R1".to_string(),
                    recording_id: "rec-a".to_string(),
                    total_chunks: 3,
                },
            )
            .await;

        assert!(coordinator.all_synced("R1").await);
    }

    #[tokio::test]
    async fn disconnect_purges_presence() {
        let (linked, synced) = noop_callbacks();
        let coordinator = RoomCoordinator::new(linked, synced);

        let (conn_id, tx, _rx) = coordinator.register_connection();
        coordinator
            .handle_client_event(
                conn_id,
                tx,
                ClientEvent::JoinRoom {
                    room_id: "R1".to_string(),
                    name: Some("Alice".to_string()),
                },
            )
            .await;

        assert_eq!(coordinator.guest_count("R1").await, 1);
        coordinator.handle_disconnect(conn_id).await;
        assert_eq!(coordinator.guest_count("R1").await, 0);
    }
}
