//! # timevault-crypto
//!
//! Cryptographic primitives for the TimeVault timed-release service.
//!
//! The suite is fixed: the prime-order subgroup of Ed25519 (via
//! `curve25519-dalek`), BLAKE3 for hashing and key derivation, and
//! ChaCha20-Poly1305 for share encryption inside deals.
//!
//! ## Modules
//!
//! - [`blake3`] - Domain-separated BLAKE3 hashing and challenge derivation
//! - [`chacha20`] - ChaCha20-Poly1305 AEAD encryption (RFC 8439)
//! - [`group`] - Point/scalar encoding, key pairs, message embedding
//! - [`schnorr`] - Schnorr signatures binding a deal to its dealer
//! - [`poly`] - Secret and public (Feldman) polynomials, Lagrange interpolation
//! - [`deal`] - Verifiable deals, the deal receiver and the joint shared secret
//! - [`elgamal`] - ElGamal sealing/opening against a joint public point

pub mod blake3;
pub mod chacha20;
pub mod deal;
pub mod elgamal;
pub mod group;
pub mod poly;
pub mod schnorr;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD decryption failed")]
    AeadDecryption,

    /// A point encoding did not decode to a prime-order group element.
    #[error("invalid point encoding")]
    InvalidPoint,

    /// A scalar encoding was not canonical.
    #[error("invalid scalar encoding")]
    InvalidScalar,

    /// Signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// The message does not fit into a single group element.
    #[error("message too long: {len} bytes, capacity {capacity}")]
    MessageTooLong {
        /// Length of the offered message.
        len: usize,
        /// Embedding capacity of one point.
        capacity: usize,
    },

    /// A point does not carry embedded data.
    #[error("point carries no embedded data")]
    NoEmbeddedData,

    /// A deal failed structural or cryptographic verification.
    #[error("invalid deal: {0}")]
    InvalidDeal(String),

    /// A share failed verification against the public polynomial.
    #[error("invalid share for index {0}")]
    InvalidShare(u32),

    /// Not enough shares to interpolate.
    #[error("insufficient shares: have {available}, need {required}")]
    InsufficientShares {
        /// Number of shares available.
        available: usize,
        /// Number of shares required.
        required: usize,
    },

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
