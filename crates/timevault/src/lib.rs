//! # timevault
//!
//! Distributed timed-release encryption.
//!
//! A cohort of N nodes runs one DKG per sealed message. The originator
//! encrypts the message under the joint public point with ElGamal; once the
//! caller-chosen duration has elapsed at every node, any node can collect T
//! shares of the joint secret, reconstruct it and decrypt.
//!
//! ## Modules
//!
//! - [`config`] - Threshold parameters and engine tuning
//! - [`registry`] - SecretId to lifecycle state, one entry per DKG instance
//! - [`pool`] - Per-secret deal buffer with the DKG completion predicate
//! - [`timer`] - One-shot expiry and reveal deadlines posted to the engine inbox
//! - [`engine`] - The single-owner protocol task (SecInit/SecConf/RevInit/RevShare)
//! - [`outbox`] - Outbound queue drained by one delivery task per node
//! - [`vault`] - The public handle: `start`, `seal`, `open`, `shutdown`
//!
//! ## Lifecycle of a secret
//!
//! ```text
//! Dealing --(quorum of verified deals)--> Ready --(timer)--> Expired
//! Expired --(open)--> Revealing --(T shares)--> Reconstructed
//!                         |
//!                         +--(reveal deadline)--> Expired
//! Dealing --(joint secret cannot be formed)--> Failed
//! ```

use timevault_crypto::CryptoError;
use timevault_transport::TransportError;

pub mod config;
pub mod engine;
pub mod outbox;
pub mod pool;
pub mod registry;
pub mod timer;
pub mod vault;

pub use config::{min_inbox_capacity, ThresholdConfig, Thresholds, VaultConfig};
pub use registry::{SecretId, SecretState, SecretStatus};
pub use vault::{Sealed, TimeVault};

/// Error types for vault operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No DKG instance with this SecretId is known locally.
    #[error("unknown secret: {0}")]
    UnknownSecret(String),

    /// The secret's duration has not yet elapsed at this node.
    #[error("secret {0} has not expired yet")]
    NotYetExpired(String),

    /// A cryptographic step failed.
    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    /// Fewer than T valid shares arrived before the reveal deadline.
    #[error("reconstruction of {sid} failed: {have} of {need} shares")]
    ReconstructionFailed {
        /// SecretId being opened.
        sid: String,
        /// Valid shares collected.
        have: usize,
        /// Shares required.
        need: usize,
    },

    /// The transport could not deliver a message.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The engine shut down before the operation completed.
    #[error("cancelled")]
    Cancelled,
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        VaultError::CryptoFailure(err.to_string())
    }
}

impl From<TransportError> for VaultError {
    fn from(err: TransportError) -> Self {
        VaultError::TransportFailure(err.to_string())
    }
}

/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
