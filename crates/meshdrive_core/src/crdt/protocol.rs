//! Sync message framing.
//!
//! Frames exchanged over a peer transport carry a message-type byte:
//!
//! - `0`: sync message (followed by a sync-type byte: 0 = step 1, 1 = step 2,
//!   2 = incremental update)
//! - `1`: awareness message (presence payload)
//!
//! The two-phase handshake mirrors the usual y-sync shape: a peer announces
//! its state vector (step 1) and receives the updates it is missing
//! (step 2); afterwards incremental updates flow in both directions.
//! Transports treat frames as opaque except for the tag bytes, which they may
//! inspect to detect sync completion.

use crate::error::{DriveError, Result};

/// Message type bytes.
mod msg_type {
    /// Sync message (step 1, step 2, update).
    pub const SYNC: u8 = 0;
    /// Awareness message.
    pub const AWARENESS: u8 = 1;
}

/// Sync sub-message types.
mod sync_type {
    /// Step 1: state-vector announcement.
    pub const STEP1: u8 = 0;
    /// Step 2: missing-updates response.
    pub const STEP2: u8 = 1;
    /// Incremental update.
    pub const UPDATE: u8 = 2;
}

/// A decoded sync frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Step 1: carries a state vector.
    SyncStep1(Vec<u8>),
    /// Step 2: carries the updates the remote peer is missing.
    SyncStep2(Vec<u8>),
    /// An incremental update.
    Update(Vec<u8>),
    /// A presence payload.
    Awareness(Vec<u8>),
}

impl SyncMessage {
    /// Encode the message to frame bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            SyncMessage::SyncStep1(sv) => frame(msg_type::SYNC, Some(sync_type::STEP1), sv),
            SyncMessage::SyncStep2(update) => frame(msg_type::SYNC, Some(sync_type::STEP2), update),
            SyncMessage::Update(update) => frame(msg_type::SYNC, Some(sync_type::UPDATE), update),
            SyncMessage::Awareness(payload) => frame(msg_type::AWARENESS, None, payload),
        }
    }

    /// Decode a frame.
    ///
    /// Returns `Ok(None)` for frames too short to carry a message or with an
    /// unknown message type (forward compatibility); unknown sync subtypes
    /// are an error.
    pub fn decode(data: &[u8]) -> Result<Option<Self>> {
        if data.is_empty() {
            return Ok(None);
        }
        match data[0] {
            msg_type::AWARENESS => Ok(Some(SyncMessage::Awareness(data[1..].to_vec()))),
            msg_type::SYNC => {
                if data.len() < 2 {
                    return Ok(None);
                }
                let payload = data[2..].to_vec();
                match data[1] {
                    sync_type::STEP1 => Ok(Some(SyncMessage::SyncStep1(payload))),
                    sync_type::STEP2 => Ok(Some(SyncMessage::SyncStep2(payload))),
                    sync_type::UPDATE => Ok(Some(SyncMessage::Update(payload))),
                    other => Err(DriveError::Crdt(format!("unknown sync type: {other}"))),
                }
            }
            _ => Ok(None),
        }
    }
}

fn frame(msg: u8, sub: Option<u8>, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + payload.len());
    buf.push(msg);
    if let Some(sub) = sub {
        buf.push(sub);
    }
    buf.extend_from_slice(payload);
    buf
}

/// Whether a raw frame is a sync step-2 message. Transports use this to mark
/// the initial sync as complete without decoding the payload.
pub fn is_sync_step2(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == msg_type::SYNC && data[1] == sync_type::STEP2
}
