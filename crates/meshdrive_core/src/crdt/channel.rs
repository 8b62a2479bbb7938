//! The per-document synchronization channel.
//!
//! A [`SyncChannel`] binds one CRDT document and its presence state to a
//! peer transport for the document's room. It drives the sync handshake
//! (step 1 on every `Connected` report, step-2 replies for remote step 1s),
//! pumps local document updates onto the wire, applies remote ones with an
//! echo guard, broadcasts presence changes, and writes the local user's
//! identity into presence once it resolves, an arrival that races
//! independently of sync completion.
//!
//! Lifecycle: *connecting* → *synced* (the `ready` future resolves exactly
//! once) → *disposed* (terminal, idempotent). A channel disposed before its
//! first sync leaves `ready` pending forever; callers race `ready` against
//! disposal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, Transact};

use super::document::apply_raw_update;
use super::presence::{LocalUser, PresenceState, PresenceUpdate};
use super::protocol::SyncMessage;
use super::transport::{ChannelConfig, ConnectionStatus, PeerTransport};
use crate::error::{DriveError, Result};

/// Options for opening a [`SyncChannel`].
pub struct ChannelOptions {
    /// Room name scoping the document's frames.
    pub room: String,
    /// The document to bind. Cloning shares the underlying store.
    pub doc: Doc,
    /// The document's presence state.
    pub presence: Arc<PresenceState>,
    /// The transport to bind. Exclusively owned by this channel.
    pub transport: Arc<dyn PeerTransport>,
    /// Resolved peer-discovery endpoints.
    pub endpoints: Vec<String>,
    /// The local identity source.
    pub user: Arc<LocalUser>,
}

/// A live binding between one shared document and the peer wire.
pub struct SyncChannel {
    room: String,
    doc: Doc,
    presence: Arc<PresenceState>,
    transport: Arc<dyn PeerTransport>,
    ready: watch::Sender<bool>,
    disposed: AtomicBool,
    applying_remote: Arc<AtomicBool>,
    _doc_subscription: Mutex<Option<yrs::Subscription>>,
}

impl SyncChannel {
    /// Open a channel: wire up all callbacks, then start connecting.
    ///
    /// A connect failure is logged and otherwise observable only through
    /// `ready` never resolving; retry policy belongs to the transport layer.
    pub async fn open(options: ChannelOptions) -> Arc<Self> {
        let ChannelOptions {
            room,
            doc,
            presence,
            transport,
            endpoints,
            user,
        } = options;

        let (ready, _) = watch::channel(false);
        let channel = Arc::new(Self {
            room: room.clone(),
            doc,
            presence: presence.clone(),
            transport: transport.clone(),
            ready,
            disposed: AtomicBool::new(false),
            applying_remote: Arc::new(AtomicBool::new(false)),
            _doc_subscription: Mutex::new(None),
        });

        // Status: handshake on every Connected report, resolve ready on the
        // first Synced one. A disposed channel ignores both.
        let weak = Arc::downgrade(&channel);
        transport.set_on_status(Arc::new(move |status| {
            let Some(channel) = weak.upgrade() else {
                return;
            };
            channel.on_status(status);
        }));

        // Incoming frames.
        let weak = Arc::downgrade(&channel);
        transport.set_on_message(Arc::new(move |frame| {
            let channel = weak.upgrade()?;
            channel.handle_frame(frame)
        }));

        // Local document updates go onto the wire, except the ones this
        // channel itself is applying.
        let applying_remote = channel.applying_remote.clone();
        let update_transport = transport.clone();
        let update_room = room.clone();
        let subscription = channel
            .doc
            .observe_update_v1(move |_, event| {
                if applying_remote.load(Ordering::SeqCst) {
                    return;
                }
                let frame = SyncMessage::Update(event.update.clone()).encode();
                if let Err(e) = update_transport.send(&frame) {
                    log::warn!("failed to broadcast update for \"{update_room}\": {e}");
                }
            })
            .expect("Failed to observe document updates");
        {
            let mut slot = channel._doc_subscription.lock().unwrap();
            *slot = Some(subscription);
        }

        // Local presence changes.
        let presence_transport = transport.clone();
        let presence_room = room.clone();
        presence.set_on_update(Arc::new(move |update| {
            let frame = SyncMessage::Awareness(update.encode()).encode();
            if let Err(e) = presence_transport.send(&frame) {
                log::debug!("failed to broadcast presence for \"{presence_room}\": {e}");
            }
        }));

        // One-shot: stamp the local identity into presence once it arrives,
        // regardless of sync state.
        let identity_presence = presence.clone();
        user.on_ready(Box::new(move |identity| {
            let value = serde_json::to_value(identity)
                .expect("identity serialization cannot fail");
            identity_presence.set_local_field("user", value);
        }));

        let config = ChannelConfig::new(room.clone(), endpoints);
        if let Err(e) = transport.connect(&config).await {
            log::warn!("connect failed for \"{room}\": {e}");
        }

        channel
    }

    /// The channel's room name.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Resolves the first time the transport reports fully synced. Never
    /// resolves on a channel disposed before that point.
    pub async fn ready(&self) {
        let mut rx = self.ready.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // The channel is gone without ever syncing; stay pending.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Whether the initial sync has completed.
    pub fn is_synced(&self) -> bool {
        *self.ready.borrow()
    }

    /// Whether the channel has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Tear down the transport binding and all subscriptions. Idempotent and
    /// safe against in-flight connects; a late `Synced` report is ignored.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.presence.clear_on_update();
        {
            let mut slot = self._doc_subscription.lock().unwrap();
            *slot = None;
        }
        self.transport.disconnect();
        log::debug!("disposed channel for \"{}\"", self.room);
    }

    fn on_status(&self, status: ConnectionStatus) {
        if self.is_disposed() {
            return;
        }
        match status {
            ConnectionStatus::Connected => {
                if let Err(e) = self.send_sync_step1() {
                    log::warn!("failed to start handshake for \"{}\": {e}", self.room);
                }
            }
            ConnectionStatus::Synced => {
                let _ = self.ready.send(true);
            }
            _ => {}
        }
    }

    fn send_sync_step1(&self) -> Result<()> {
        let sv = {
            let txn = self.doc.transact();
            txn.state_vector().encode_v1()
        };
        self.transport.send(&SyncMessage::SyncStep1(sv).encode())
    }

    /// Handle one incoming frame, optionally producing a response frame.
    fn handle_frame(&self, frame: &[u8]) -> Option<Vec<u8>> {
        if self.is_disposed() {
            return None;
        }
        match SyncMessage::decode(frame) {
            Ok(Some(SyncMessage::SyncStep1(remote_sv))) => match self.encode_diff(&remote_sv) {
                Ok(diff) => Some(SyncMessage::SyncStep2(diff).encode()),
                Err(e) => {
                    log::warn!("bad step-1 frame for \"{}\": {e}", self.room);
                    None
                }
            },
            Ok(Some(SyncMessage::SyncStep2(update))) | Ok(Some(SyncMessage::Update(update))) => {
                if !update.is_empty() {
                    if let Err(e) = self.apply_remote(&update) {
                        log::warn!("failed to apply remote update for \"{}\": {e}", self.room);
                    }
                }
                None
            }
            Ok(Some(SyncMessage::Awareness(payload))) => {
                match PresenceUpdate::decode(&payload) {
                    Some(update) => self.presence.apply_remote(update),
                    None => log::debug!("undecodable presence frame for \"{}\"", self.room),
                }
                None
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("undecodable frame for \"{}\": {e}", self.room);
                None
            }
        }
    }

    fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        use yrs::updates::decoder::Decode;

        let sv = yrs::StateVector::decode_v1(remote_state_vector)
            .map_err(|e| DriveError::Crdt(format!("failed to decode state vector: {e}")))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    fn apply_remote(&self, update: &[u8]) -> Result<()> {
        self.applying_remote.store(true, Ordering::SeqCst);
        let result = apply_raw_update(&self.doc, update);
        self.applying_remote.store(false, Ordering::SeqCst);
        result
    }
}

impl std::fmt::Debug for SyncChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncChannel")
            .field("room", &self.room)
            .field("synced", &self.is_synced())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
