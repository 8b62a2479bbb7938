//! In-process peer transport.
//!
//! A [`MemoryHub`] connects any number of [`MemoryTransport`]s through named
//! rooms, delivering frames synchronously between members. It stands in for
//! the real peer wire in tests and single-process embeddings: the room is the
//! discovery scope, joining a room re-announces `Connected` to every member
//! (prompting a fresh handshake, as a peer mesh does per connection), and a
//! member reports `Synced` once a sync step-2 frame reaches it, or
//! immediately on connect when the hub's expected peer count is zero.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use super::protocol::is_sync_step2;
use super::transport::{
    ChannelConfig, ConnectionStatus, MessageCallback, PeerTransport, StatusCallback,
    TransportFactory,
};
use crate::error::{DriveError, Result};

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

struct HubState {
    min_peers: usize,
    rooms: Mutex<HashMap<String, Vec<Arc<MemoryTransport>>>>,
}

/// An in-process hub routing frames between the members of named rooms.
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<HubState>,
}

impl MemoryHub {
    /// A hub whose members sync against at least one peer (a lone member
    /// stays unsynced until somebody joins).
    pub fn new() -> Self {
        Self::with_min_peers(1)
    }

    /// A hub with an explicit expected peer count. `0` makes every member
    /// report `Synced` immediately on connect.
    pub fn with_min_peers(min_peers: usize) -> Self {
        Self {
            state: Arc::new(HubState {
                min_peers,
                rooms: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A fresh, unconnected transport on this hub.
    pub fn transport(&self) -> Arc<MemoryTransport> {
        MemoryTransport::new(self.state.clone())
    }

    /// Number of members currently joined to `room`.
    pub fn peer_count(&self, room: &str) -> usize {
        let rooms = self.state.rooms.lock().unwrap();
        rooms.get(room).map(Vec::len).unwrap_or(0)
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for MemoryHub {
    fn create(&self) -> Arc<dyn PeerTransport> {
        self.transport()
    }
}

/// One member's binding to a [`MemoryHub`] room.
pub struct MemoryTransport {
    id: u64,
    state: Arc<HubState>,
    weak_self: Weak<MemoryTransport>,
    room: RwLock<Option<String>>,
    on_message: RwLock<Option<MessageCallback>>,
    on_status: RwLock<Option<StatusCallback>>,
    status: RwLock<ConnectionStatus>,
    connected: AtomicBool,
    synced: AtomicBool,
}

impl MemoryTransport {
    fn new(state: Arc<HubState>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::SeqCst),
            state,
            weak_self: weak_self.clone(),
            room: RwLock::new(None),
            on_message: RwLock::new(None),
            on_status: RwLock::new(None),
            status: RwLock::new(ConnectionStatus::Disconnected),
            connected: AtomicBool::new(false),
            synced: AtomicBool::new(false),
        })
    }

    fn set_status(&self, status: ConnectionStatus) {
        {
            let mut slot = self.status.write().unwrap();
            *slot = status.clone();
        }
        let callback = {
            let slot = self.on_status.read().unwrap();
            slot.clone()
        };
        if let Some(callback) = callback {
            callback(status);
        }
    }

    fn mark_synced(&self) {
        if !self.synced.swap(true, Ordering::SeqCst) {
            self.set_status(ConnectionStatus::Synced);
        }
    }

    /// Deliver a frame to this member, returning its response, if any.
    fn receive(&self, frame: &[u8]) -> Option<Vec<u8>> {
        if !self.connected.load(Ordering::SeqCst) {
            return None;
        }
        if is_sync_step2(frame) {
            self.mark_synced();
        }
        let callback = {
            let slot = self.on_message.read().unwrap();
            slot.clone()
        };
        callback.and_then(|callback| callback(frame))
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn connect(&self, config: &ChannelConfig) -> Result<()> {
        let this = self
            .weak_self
            .upgrade()
            .ok_or_else(|| DriveError::Transport("transport already dropped".to_string()))?;
        self.set_status(ConnectionStatus::Connecting);
        {
            let mut room = self.room.write().unwrap();
            *room = Some(config.room.clone());
        }
        let existing = {
            let mut rooms = self.state.rooms.lock().unwrap();
            let members = rooms.entry(config.room.clone()).or_default();
            let existing = members.clone();
            members.push(this);
            existing
        };
        self.connected.store(true, Ordering::SeqCst);

        // The peer set grew: every prior member re-handshakes, then we do.
        for peer in &existing {
            peer.set_status(ConnectionStatus::Connected);
        }
        self.set_status(ConnectionStatus::Connected);

        if self.state.min_peers == 0 {
            self.mark_synced();
        }
        Ok(())
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriveError::Transport("not connected".to_string()));
        }
        let this = self
            .weak_self
            .upgrade()
            .ok_or_else(|| DriveError::Transport("transport already dropped".to_string()))?;
        let room = {
            let room = self.room.read().unwrap();
            room.clone()
                .ok_or_else(|| DriveError::Transport("no room joined".to_string()))?
        };
        let peers: Vec<Arc<MemoryTransport>> = {
            let rooms = self.state.rooms.lock().unwrap();
            rooms
                .get(&room)
                .map(|members| {
                    members
                        .iter()
                        .filter(|member| member.id != self.id)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        for peer in peers {
            // Responses bounce between the pair until one side goes quiet.
            let mut sender = this.clone();
            let mut receiver = peer;
            let mut payload = frame.to_vec();
            loop {
                let Some(response) = receiver.receive(&payload) else {
                    break;
                };
                payload = response;
                std::mem::swap(&mut sender, &mut receiver);
            }
        }
        Ok(())
    }

    fn set_on_message(&self, callback: MessageCallback) {
        let mut slot = self.on_message.write().unwrap();
        *slot = Some(callback);
    }

    fn set_on_status(&self, callback: StatusCallback) {
        let mut slot = self.on_status.write().unwrap();
        *slot = Some(callback);
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let room = {
            let mut room = self.room.write().unwrap();
            room.take()
        };
        if let Some(room) = room {
            let mut rooms = self.state.rooms.lock().unwrap();
            if let Some(members) = rooms.get_mut(&room) {
                members.retain(|member| member.id != self.id);
                if members.is_empty() {
                    rooms.remove(&room);
                }
            }
        }
        // Drop subscriptions before the final status flip so a disposed
        // listener never observes it.
        {
            let mut slot = self.on_message.write().unwrap();
            *slot = None;
        }
        {
            let mut slot = self.on_status.write().unwrap();
            *slot = None;
        }
        {
            let mut slot = self.status.write().unwrap();
            *slot = ConnectionStatus::Disconnected;
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn status(&self) -> ConnectionStatus {
        self.status.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn connect(transport: &Arc<MemoryTransport>, room: &str) {
        use futures_util::FutureExt;

        let config = ChannelConfig::new(room, vec![]);
        transport
            .connect(&config)
            .now_or_never()
            .expect("memory connect is immediate")
            .unwrap();
    }

    #[test]
    fn test_frames_reach_other_members_only() {
        let hub = MemoryHub::new();
        let a = hub.transport();
        let b = hub.transport();
        let c = hub.transport();

        let received_b = Arc::new(StdMutex::new(Vec::<Vec<u8>>::new()));
        let received_b_clone = received_b.clone();
        b.set_on_message(Arc::new(move |frame| {
            received_b_clone.lock().unwrap().push(frame.to_vec());
            None
        }));
        let received_c = Arc::new(StdMutex::new(Vec::<Vec<u8>>::new()));
        let received_c_clone = received_c.clone();
        c.set_on_message(Arc::new(move |frame| {
            received_c_clone.lock().unwrap().push(frame.to_vec());
            None
        }));

        connect(&a, "room");
        connect(&b, "room");
        connect(&c, "elsewhere");

        a.send(&[1, 2, 3]).unwrap();
        assert_eq!(received_b.lock().unwrap().as_slice(), &[vec![1, 2, 3]]);
        assert!(received_c.lock().unwrap().is_empty());
    }

    #[test]
    fn test_responses_bounce_back_to_sender() {
        let hub = MemoryHub::new();
        let a = hub.transport();
        let b = hub.transport();

        b.set_on_message(Arc::new(|frame| {
            (frame == [10]).then(|| vec![20])
        }));
        let got_reply = Arc::new(StdMutex::new(Vec::<Vec<u8>>::new()));
        let got_reply_clone = got_reply.clone();
        a.set_on_message(Arc::new(move |frame| {
            got_reply_clone.lock().unwrap().push(frame.to_vec());
            None
        }));

        connect(&a, "room");
        connect(&b, "room");

        a.send(&[10]).unwrap();
        assert_eq!(got_reply.lock().unwrap().as_slice(), &[vec![20]]);
    }

    #[test]
    fn test_joining_reannounces_connected() {
        let hub = MemoryHub::new();
        let a = hub.transport();
        let b = hub.transport();

        let statuses = Arc::new(StdMutex::new(Vec::<ConnectionStatus>::new()));
        let statuses_clone = statuses.clone();
        a.set_on_status(Arc::new(move |status| {
            statuses_clone.lock().unwrap().push(status);
        }));

        connect(&a, "room");
        connect(&b, "room");

        let seen = statuses.lock().unwrap();
        let connected = seen
            .iter()
            .filter(|status| **status == ConnectionStatus::Connected)
            .count();
        assert_eq!(connected, 2, "one per join: own connect, then b's join");
    }

    #[test]
    fn test_synced_on_step2_frame() {
        let hub = MemoryHub::new();
        let a = hub.transport();
        let b = hub.transport();
        connect(&a, "room");
        connect(&b, "room");

        assert_ne!(b.status(), ConnectionStatus::Synced);
        a.send(&super::super::protocol::SyncMessage::SyncStep2(vec![]).encode())
            .unwrap();
        assert_eq!(b.status(), ConnectionStatus::Synced);
        assert_ne!(a.status(), ConnectionStatus::Synced);
    }

    #[test]
    fn test_min_peers_zero_syncs_immediately() {
        let hub = MemoryHub::with_min_peers(0);
        let a = hub.transport();
        connect(&a, "room");
        assert_eq!(a.status(), ConnectionStatus::Synced);
    }

    #[test]
    fn test_disconnect_is_idempotent_and_silences_member() {
        let hub = MemoryHub::new();
        let a = hub.transport();
        let b = hub.transport();

        let received = Arc::new(StdMutex::new(0usize));
        let received_clone = received.clone();
        b.set_on_message(Arc::new(move |_frame| {
            *received_clone.lock().unwrap() += 1;
            None
        }));

        connect(&a, "room");
        connect(&b, "room");
        assert_eq!(hub.peer_count("room"), 2);

        b.disconnect();
        b.disconnect();
        assert!(!b.is_connected());
        assert_eq!(hub.peer_count("room"), 1);

        a.send(&[1]).unwrap();
        assert_eq!(*received.lock().unwrap(), 0);
        assert!(b.send(&[2]).is_err());
    }
}
