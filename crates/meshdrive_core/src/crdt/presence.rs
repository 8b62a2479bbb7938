//! Presence (awareness) state shared alongside a document.
//!
//! Presence is ephemeral per-peer metadata (identity, cursor positions)
//! that travels with a document but is not part of its persisted content.
//! Each peer owns a local keyed state object; remote states are applied from
//! awareness frames and read by UI layers for cursor rendering.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Identity of the local user, written into presence under the `"user"` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable username.
    pub username: String,
    /// Short name.
    pub name: String,
    /// Name to display in UI layers.
    pub display_name: String,
    /// Initials for compact cursors, when known.
    pub initials: Option<String>,
    /// Cursor color, when assigned.
    pub color: Option<String>,
}

impl UserIdentity {
    /// An identity where all name fields share one value.
    pub fn named(name: &str) -> Self {
        Self {
            username: name.to_string(),
            name: name.to_string(),
            display_name: name.to_string(),
            initials: None,
            color: None,
        }
    }
}

/// One peer's full presence state, as carried by awareness frames.
///
/// A `null` state announces that the peer left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// The originating peer's client id.
    pub client: u64,
    /// The peer's full keyed state, or `null` on departure.
    pub state: serde_json::Value,
}

impl PresenceUpdate {
    /// Encode for an awareness frame payload.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("presence update serialization cannot fail")
    }

    /// Decode an awareness frame payload.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

/// Callback invoked when the local presence state changes.
pub type PresenceCallback = Arc<dyn Fn(&PresenceUpdate) + Send + Sync>;

/// Keyed per-peer presence state for one document.
pub struct PresenceState {
    client: u64,
    local: RwLock<serde_json::Map<String, serde_json::Value>>,
    peers: RwLock<HashMap<u64, serde_json::Value>>,
    /// Local-change callback. Only one is active at a time; setting a new one
    /// replaces the previous.
    on_update: RwLock<Option<PresenceCallback>>,
}

impl PresenceState {
    /// Create presence state for the document with the given client id.
    pub fn new(client: u64) -> Arc<Self> {
        Arc::new(Self {
            client,
            local: RwLock::new(serde_json::Map::new()),
            peers: RwLock::new(HashMap::new()),
            on_update: RwLock::new(None),
        })
    }

    /// The local peer's client id.
    pub fn client(&self) -> u64 {
        self.client
    }

    /// Set one field of the local state and announce the change.
    pub fn set_local_field(&self, key: &str, value: serde_json::Value) {
        let update = {
            let mut local = self.local.write().unwrap();
            local.insert(key.to_string(), value);
            PresenceUpdate {
                client: self.client,
                state: serde_json::Value::Object(local.clone()),
            }
        };
        self.emit(&update);
    }

    /// The local peer's full keyed state.
    pub fn local_state(&self) -> serde_json::Value {
        let local = self.local.read().unwrap();
        serde_json::Value::Object(local.clone())
    }

    /// Apply a remote peer's presence update. The local peer's own echoes are
    /// ignored; a `null` state removes the peer.
    pub fn apply_remote(&self, update: PresenceUpdate) {
        if update.client == self.client {
            return;
        }
        let mut peers = self.peers.write().unwrap();
        if update.state.is_null() {
            peers.remove(&update.client);
        } else {
            peers.insert(update.client, update.state);
        }
    }

    /// Snapshot of all known remote peer states.
    pub fn peer_states(&self) -> HashMap<u64, serde_json::Value> {
        self.peers.read().unwrap().clone()
    }

    /// Set the local-change callback, replacing any previous one.
    pub fn set_on_update(&self, callback: PresenceCallback) {
        let mut slot = self.on_update.write().unwrap();
        *slot = Some(callback);
    }

    /// Clear the local-change callback.
    pub fn clear_on_update(&self) {
        let mut slot = self.on_update.write().unwrap();
        *slot = None;
    }

    fn emit(&self, update: &PresenceUpdate) {
        let callback = {
            let slot = self.on_update.read().unwrap();
            slot.clone()
        };
        if let Some(callback) = callback {
            callback(update);
        }
    }
}

impl std::fmt::Debug for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceState")
            .field("client", &self.client)
            .field("peers", &self.peers.read().unwrap().len())
            .finish_non_exhaustive()
    }
}

type IdentityWaiter = Box<dyn FnOnce(&UserIdentity) + Send>;

struct LocalUserInner {
    identity: Option<UserIdentity>,
    waiters: Vec<IdentityWaiter>,
}

/// The local peer's identity source.
///
/// Identity arrival is asynchronous and races independently of document
/// sync: channels register a one-shot callback via
/// [`LocalUser::on_ready`] and the owner resolves the identity whenever it
/// becomes available.
pub struct LocalUser {
    inner: Mutex<LocalUserInner>,
}

impl LocalUser {
    /// An identity source that has not resolved yet.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(LocalUserInner {
                identity: None,
                waiters: Vec::new(),
            }),
        })
    }

    /// An identity source resolved up front.
    pub fn with_identity(identity: UserIdentity) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(LocalUserInner {
                identity: Some(identity),
                waiters: Vec::new(),
            }),
        })
    }

    /// The resolved identity, if any.
    pub fn identity(&self) -> Option<UserIdentity> {
        self.inner.lock().unwrap().identity.clone()
    }

    /// Register a one-shot callback fired once the identity resolves. Fires
    /// immediately when it already has.
    pub fn on_ready(&self, callback: IdentityWaiter) {
        let resolved = {
            let mut inner = self.inner.lock().unwrap();
            match &inner.identity {
                Some(identity) => Some(identity.clone()),
                None => {
                    inner.waiters.push(callback);
                    return;
                }
            }
        };
        if let Some(identity) = resolved {
            callback(&identity);
        }
    }

    /// Resolve the identity, firing pending callbacks. Later calls update the
    /// stored identity but the one-shot callbacks have already fired.
    pub fn resolve(&self, identity: UserIdentity) {
        let waiters = {
            let mut inner = self.inner.lock().unwrap();
            inner.identity = Some(identity.clone());
            std::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            waiter(&identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_set_local_field_announces_full_state() {
        let presence = PresenceState::new(7);
        let seen = Arc::new(Mutex::new(Vec::<PresenceUpdate>::new()));
        let seen_clone = seen.clone();
        presence.set_on_update(Arc::new(move |update| {
            seen_clone.lock().unwrap().push(update.clone());
        }));

        presence.set_local_field("user", json!({"name": "ada"}));
        presence.set_local_field("cursor", json!({"line": 3}));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].client, 7);
        assert_eq!(seen[1].state["user"]["name"], "ada");
        assert_eq!(seen[1].state["cursor"]["line"], 3);
    }

    #[test]
    fn test_apply_remote_ignores_own_echo() {
        let presence = PresenceState::new(7);
        presence.apply_remote(PresenceUpdate {
            client: 7,
            state: json!({"user": {"name": "me"}}),
        });
        assert!(presence.peer_states().is_empty());
    }

    #[test]
    fn test_apply_remote_and_departure() {
        let presence = PresenceState::new(1);
        presence.apply_remote(PresenceUpdate {
            client: 2,
            state: json!({"user": {"name": "grace"}}),
        });
        assert_eq!(presence.peer_states().len(), 1);

        presence.apply_remote(PresenceUpdate {
            client: 2,
            state: serde_json::Value::Null,
        });
        assert!(presence.peer_states().is_empty());
    }

    #[test]
    fn test_presence_update_round_trip() {
        let update = PresenceUpdate {
            client: 42,
            state: json!({"user": {"name": "lin"}}),
        };
        let decoded = PresenceUpdate::decode(&update.encode()).unwrap();
        assert_eq!(decoded, update);
        assert!(PresenceUpdate::decode(b"not json").is_none());
    }

    #[test]
    fn test_local_user_resolves_pending_waiters() {
        let user = LocalUser::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        user.on_ready(Box::new(move |identity| {
            assert_eq!(identity.name, "ada");
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        user.resolve(UserIdentity::named("ada"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_local_user_already_resolved_fires_immediately() {
        let user = LocalUser::with_identity(UserIdentity::named("grace"));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        user.on_ready(Box::new(move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
