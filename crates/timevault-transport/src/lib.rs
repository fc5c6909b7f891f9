//! # timevault-transport
//!
//! Message transport for a TimeVault cohort.
//!
//! This crate defines what the protocol engine needs from a network and ships
//! one in-process implementation:
//!
//! - **Protocol messages** `SecInit`, `SecConf`, `RevInit`, `RevShare` via [`messages`]
//! - **Frame codec** (length, tag, CBOR body) via [`wire`]
//! - **CBOR serialization** helpers via [`cbor`]
//! - **In-process cohort** of connected endpoints via [`local`]
//!
//! ## Architecture
//!
//! ```text
//! Engine
//!     |  Transport::broadcast / send_to
//!     v
//! Message (messages.rs)
//!     |
//!     v
//! frame (wire.rs)            -- BE32 len || tag || CBOR body
//!     |
//!     v
//! FrameSender -> Inbound     -- bounded per-node channel, FIFO per sender
//!     |
//!     v
//! Engine inbox
//! ```

use std::future::Future;

pub mod cbor;
pub mod local;
pub mod messages;
pub mod wire;

pub use local::{FrameSender, Inbound, LocalEndpoint, LocalNetwork};
pub use messages::Message;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// CBOR serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CBOR deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Protocol violation (unknown tag, oversized or inconsistent frame).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The destination index is not part of the cohort.
    #[error("unknown peer {0}")]
    UnknownPeer(u32),

    /// The destination's inbound channel is closed.
    #[error("channel to peer {0} closed")]
    Closed(u32),

    /// No peer could be reached by a broadcast.
    #[error("broadcast reached no peer")]
    Unreachable,
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// A member of the cohort, as listed by [`Transport::peers`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    /// Position in the roster, `0..N`.
    pub index: u32,
    /// Compressed long-term public key.
    pub public_key: [u8; 32],
}

/// What the protocol engine needs from the network.
///
/// Delivery is reliable and FIFO per sender. Inbound traffic is not part of
/// the trait; it arrives on the [`Inbound`] half handed to the engine at start.
pub trait Transport: Send + Sync + 'static {
    /// Send `msg` to every other member of the cohort.
    ///
    /// Delivery is best effort per peer; an error is returned only when no
    /// peer was reached.
    fn broadcast(&self, msg: &Message) -> impl Future<Output = Result<()>> + Send;

    /// Send `msg` to the member at `index`.
    fn send_to(&self, index: u32, msg: &Message) -> impl Future<Output = Result<()>> + Send;

    /// The full roster, including this node, ordered by index.
    fn peers(&self) -> Vec<Entity>;

    /// This node's roster index.
    fn self_index(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::Serialization("test".to_string());
        assert_eq!(err.to_string(), "serialization error: test");
        assert_eq!(TransportError::UnknownPeer(7).to_string(), "unknown peer 7");
        assert_eq!(
            TransportError::Closed(2).to_string(),
            "channel to peer 2 closed"
        );
    }
}
