//! Transport abstraction for peer sync connections.
//!
//! A [`PeerTransport`] carries opaque frames between the peers of one room.
//! Implementations own the wire: connection management, fan-out and the
//! definition of "synced" all live below this trait. The crate ships two:
//!
//! - [`MemoryTransport`]: in-process room fan-out, for tests and single
//!   process embedding
//! - [`WsTransport`]: a WebSocket relay client
//!
//! Every sync channel creates its own transport through a
//! [`TransportFactory`]; no two channels share one connection.
//!
//! [`MemoryTransport`]: super::memory_transport::MemoryTransport
//! [`WsTransport`]: super::ws_transport::WsTransport

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;

/// Configuration for one channel's transport connection.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Room name scoping the exchanged frames (one room per document).
    pub room: String,
    /// Resolved peer-discovery endpoints, passed verbatim from the drive.
    pub endpoints: Vec<String>,
}

impl ChannelConfig {
    /// Configuration for `room` using `endpoints`.
    pub fn new(room: impl Into<String>, endpoints: Vec<String>) -> Self {
        Self {
            room: room.into(),
            endpoints,
        }
    }
}

/// Status of a transport connection.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not connected.
    Disconnected,
    /// Connection being established.
    Connecting,
    /// Connected to at least one peer; also re-reported whenever the peer
    /// set grows, prompting a fresh handshake.
    Connected,
    /// Fully synced with at least the expected peer count.
    Synced,
    /// The connection failed.
    Error {
        /// What went wrong.
        message: String,
    },
}

/// Callback for incoming frames. The returned payload, if any, is sent back
/// over the same connection.
pub type MessageCallback = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Callback for connection status changes.
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// A live binding to the peer-to-peer wire.
///
/// Register the callbacks before calling [`PeerTransport::connect`];
/// only one callback of each kind is active at a time. `disconnect` clears
/// both and must be idempotent; a disconnected transport drops frames
/// silently and never reports `Synced` afterwards.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Establish the connection for a room.
    async fn connect(&self, config: &ChannelConfig) -> Result<()>;

    /// Queue a frame for delivery to the room's peers. Non-blocking.
    fn send(&self, frame: &[u8]) -> Result<()>;

    /// Set the incoming-frame callback, replacing any previous one.
    fn set_on_message(&self, callback: MessageCallback);

    /// Set the status callback, replacing any previous one.
    fn set_on_status(&self, callback: StatusCallback);

    /// Tear the connection down. Idempotent and non-blocking.
    fn disconnect(&self);

    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;

    /// The current connection status.
    fn status(&self) -> ConnectionStatus;
}

/// Creates one fresh transport per sync channel.
pub trait TransportFactory: Send + Sync {
    /// Create an unconnected transport.
    fn create(&self) -> Arc<dyn PeerTransport>;
}

/// Resolve raw endpoint strings against a base transport URL.
///
/// Absolute endpoints (`ws://`, `wss://`, `http://`, `https://`) are kept
/// verbatim; anything else is joined against `base`, which is the local
/// server's transport base URL. Resolution happens once, at drive
/// construction.
pub fn resolve_endpoints(raw: &[String], base: &str) -> Vec<String> {
    raw.iter()
        .map(|endpoint| {
            let absolute = ["ws://", "wss://", "http://", "https://"]
                .iter()
                .any(|scheme| endpoint.starts_with(scheme));
            if absolute {
                endpoint.clone()
            } else {
                join_url(base, endpoint)
            }
        })
        .collect()
}

/// Join a base URL and a relative path with exactly one separating slash.
fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_endpoints_kept_verbatim() {
        let raw = vec![
            "wss://signal.example.org/rooms".to_string(),
            "ws://localhost:8000".to_string(),
        ];
        let resolved = resolve_endpoints(&raw, "ws://server.local/api");
        assert_eq!(resolved, raw);
    }

    #[test]
    fn test_relative_endpoints_joined_against_base() {
        let raw = vec!["signaling".to_string(), "/alt/signaling/".to_string()];
        let resolved = resolve_endpoints(&raw, "ws://server.local/api/");
        assert_eq!(
            resolved,
            vec![
                "ws://server.local/api/signaling".to_string(),
                "ws://server.local/api/alt/signaling/".to_string(),
            ]
        );
    }

    #[test]
    fn test_status_serializes_tagged() {
        let status = ConnectionStatus::Error {
            message: "refused".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "refused");
    }
}
