//! WebSocket relay transport.
//!
//! Connects to a relay/signaling endpoint with tokio-tungstenite and carries
//! sync frames as binary WebSocket messages. Endpoints are tried in order
//! until one accepts; the room travels as a query parameter. Incoming
//! step-2 frames mark the connection `Synced`. Reconnection policy is left
//! to the embedder; a lost connection simply reports `Disconnected`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::is_sync_step2;
use super::transport::{
    ChannelConfig, ConnectionStatus, MessageCallback, PeerTransport, StatusCallback,
    TransportFactory,
};
use crate::error::{DriveError, Result};

type StatusSlot = Arc<RwLock<Option<StatusCallback>>>;

/// A WebSocket-backed [`PeerTransport`].
pub struct WsTransport {
    outgoing: RwLock<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    on_message: Arc<RwLock<Option<MessageCallback>>>,
    on_status: StatusSlot,
    status: Arc<RwLock<ConnectionStatus>>,
    connected: Arc<AtomicBool>,
    synced: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl WsTransport {
    /// An unconnected WebSocket transport.
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            outgoing: RwLock::new(None),
            on_message: Arc::new(RwLock::new(None)),
            on_status: Arc::new(RwLock::new(None)),
            status: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            synced: Arc::new(AtomicBool::new(false)),
            shutdown,
        }
    }

    /// Append the room as a query parameter.
    fn room_url(endpoint: &str, room: &str) -> String {
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        format!("{endpoint}{separator}room={room}")
    }

    fn emit_status(
        status: &Arc<RwLock<ConnectionStatus>>,
        on_status: &StatusSlot,
        value: ConnectionStatus,
    ) {
        {
            let mut slot = status.write().unwrap();
            *slot = value.clone();
        }
        let callback = {
            let slot = on_status.read().unwrap();
            slot.clone()
        };
        if let Some(callback) = callback {
            callback(value);
        }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for WsTransport {
    async fn connect(&self, config: &ChannelConfig) -> Result<()> {
        Self::emit_status(&self.status, &self.on_status, ConnectionStatus::Connecting);

        let mut stream = None;
        let mut last_error = String::from("no endpoints configured");
        for endpoint in &config.endpoints {
            let url = Self::room_url(endpoint, &config.room);
            match connect_async(url.as_str()).await {
                Ok((ws, _response)) => {
                    log::debug!("connected to \"{url}\"");
                    stream = Some(ws);
                    break;
                }
                Err(e) => {
                    log::warn!("failed to connect to \"{url}\": {e}");
                    last_error = e.to_string();
                }
            }
        }
        let Some(ws) = stream else {
            Self::emit_status(
                &self.status,
                &self.on_status,
                ConnectionStatus::Error {
                    message: last_error.clone(),
                },
            );
            return Err(DriveError::Transport(last_error));
        };

        let (mut write, mut read) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        {
            let mut outgoing = self.outgoing.write().unwrap();
            *outgoing = Some(out_tx.clone());
        }
        self.connected.store(true, Ordering::SeqCst);
        Self::emit_status(&self.status, &self.on_status, ConnectionStatus::Connected);

        // Writer: drain the outgoing queue into the socket.
        let mut writer_shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = writer_shutdown.changed() => {
                        if changed.is_err() || *writer_shutdown.borrow() {
                            let _ = write.close().await;
                            break;
                        }
                    }
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else { break };
                        if write.send(Message::Binary(frame.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Reader: dispatch incoming frames, route responses back out.
        let on_message = self.on_message.clone();
        let on_status = self.on_status.clone();
        let status = self.status.clone();
        let connected = self.connected.clone();
        let synced = self.synced.clone();
        let mut reader_shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = reader_shutdown.changed() => {
                        if changed.is_err() || *reader_shutdown.borrow() {
                            break;
                        }
                    }
                    incoming = read.next() => {
                        match incoming {
                            Some(Ok(Message::Binary(data))) => {
                                let frame: Vec<u8> = data.to_vec();
                                if is_sync_step2(&frame) && !synced.swap(true, Ordering::SeqCst) {
                                    Self::emit_status(&status, &on_status, ConnectionStatus::Synced);
                                }
                                let callback = {
                                    let slot = on_message.read().unwrap();
                                    slot.clone()
                                };
                                if let Some(callback) = callback {
                                    if let Some(response) = callback(&frame) {
                                        let _ = out_tx.send(response);
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                                connected.store(false, Ordering::SeqCst);
                                Self::emit_status(
                                    &status,
                                    &on_status,
                                    ConnectionStatus::Disconnected,
                                );
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
        });

        Ok(())
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        let outgoing = self.outgoing.read().unwrap();
        let sender = outgoing
            .as_ref()
            .ok_or_else(|| DriveError::Transport("not connected".to_string()))?;
        sender
            .send(frame.to_vec())
            .map_err(|_| DriveError::Transport("connection closed".to_string()))
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
        {
            let mut slot = self.on_message.write().unwrap();
            *slot = None;
        }
        {
            let mut slot = self.on_status.write().unwrap();
            *slot = None;
        }
        {
            let mut outgoing = self.outgoing.write().unwrap();
            *outgoing = None;
        }
        let _ = self.shutdown.send(true);
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

/// [`TransportFactory`] producing [`WsTransport`]s.
#[derive(Default, Clone, Copy)]
pub struct WsTransportFactory;

impl TransportFactory for WsTransportFactory {
    fn create(&self) -> Arc<dyn PeerTransport> {
        Arc::new(WsTransport::new())
    }
}
