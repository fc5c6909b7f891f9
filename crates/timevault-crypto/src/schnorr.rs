//! Schnorr signatures over the Ed25519 prime-order subgroup.
//!
//! Deals are signed with the dealer's long-term key so that a receiver can
//! attribute every deal to exactly one roster entry.
//!
//! ```text
//! sign(sk, m):   k <- random, R = k*G, c = H(R || pk || m), s = k + c*sk
//! verify(pk, m): s*G == R + c*pk
//! ```

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};

use crate::blake3::{self, contexts};
use crate::group::{self, KeyPair, POINT_SIZE};
use crate::{CryptoError, Result};

/// Size of an encoded signature.
pub const SIGNATURE_SIZE: usize = 64;

/// A Schnorr signature `(R, s)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    /// Nonce commitment `R = k*G`.
    pub commitment: EdwardsPoint,
    /// Response `s = k + c*sk`.
    pub response: Scalar,
}

impl Signature {
    /// Serialize to `R || s`.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        let mut out = [0u8; SIGNATURE_SIZE];
        out[..POINT_SIZE].copy_from_slice(&group::point_to_bytes(&self.commitment));
        out[POINT_SIZE..].copy_from_slice(&group::scalar_to_bytes(&self.response));
        out
    }

    /// Deserialize from `R || s`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidInput(format!(
                "signature must be {SIGNATURE_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            commitment: group::point_from_bytes(&bytes[..POINT_SIZE])?,
            response: group::scalar_from_bytes(&bytes[POINT_SIZE..])?,
        })
    }
}

/// Sign `message` with `keys`.
pub fn sign<R: RngCore + CryptoRng>(keys: &KeyPair, message: &[u8], rng: &mut R) -> Signature {
    let nonce = Scalar::random(rng);
    let commitment = EdwardsPoint::mul_base(&nonce);
    let c = challenge(&commitment, keys.public(), message);
    Signature {
        commitment,
        response: nonce + c * keys.secret(),
    }
}

/// Verify `signature` on `message` under `public`.
///
/// # Errors
///
/// Returns [`CryptoError::SignatureVerification`] on mismatch.
pub fn verify(public: &EdwardsPoint, message: &[u8], signature: &Signature) -> Result<()> {
    let c = challenge(&signature.commitment, public, message);
    if EdwardsPoint::mul_base(&signature.response) == signature.commitment + c * public {
        Ok(())
    } else {
        Err(CryptoError::SignatureVerification)
    }
}

fn challenge(commitment: &EdwardsPoint, public: &EdwardsPoint, message: &[u8]) -> Scalar {
    let r = group::point_to_bytes(commitment);
    let pk = group::point_to_bytes(public);
    let input = blake3::encode_multi_field(&[&r, &pk, message]);
    blake3::derive_scalar(contexts::SCHNORR_CHALLENGE, &input)
}
