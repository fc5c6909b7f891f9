//! Group operations over the prime-order subgroup of Ed25519.
//!
//! Points travel as their 32-byte compressed Edwards-y encoding and scalars
//! as their canonical little-endian encoding. Every decoded point must be
//! canonical and torsion-free, so the cofactor never leaks into the protocol.
//!
//! ## Message embedding
//!
//! A short message is embedded directly into a group element:
//!
//! ```text
//! candidate[0]          = len(data)           (<= 29)
//! candidate[1..1+len]   = data
//! candidate[1+len..32]  = random
//! ```
//!
//! The candidate is retried with fresh randomness until it decompresses to a
//! canonical, torsion-free point. On average 16 attempts are needed (half of
//! all y-coordinates are on the curve, one in eight of those is in the
//! prime-order subgroup).

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// Size of an encoded point.
pub const POINT_SIZE: usize = 32;

/// Size of an encoded scalar.
pub const SCALAR_SIZE: usize = 32;

/// Maximum number of message bytes one point can carry: `(255 - 8 - 8) / 8`.
pub const EMBED_CAPACITY: usize = 29;

/// Upper bound on embedding attempts before giving up.
const MAX_EMBED_ATTEMPTS: usize = 1024;

/// Encode a point to its canonical compressed form.
pub fn point_to_bytes(point: &EdwardsPoint) -> [u8; POINT_SIZE] {
    point.compress().to_bytes()
}

/// Decode a point, requiring a canonical, torsion-free encoding.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPoint`] for wrong lengths, off-curve
/// encodings, non-canonical encodings and points outside the prime-order
/// subgroup.
pub fn point_from_bytes(bytes: &[u8]) -> Result<EdwardsPoint> {
    let arr: [u8; POINT_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidPoint)?;
    let point = CompressedEdwardsY(arr)
        .decompress()
        .ok_or(CryptoError::InvalidPoint)?;
    if !point.is_torsion_free() || point.compress().to_bytes() != arr {
        return Err(CryptoError::InvalidPoint);
    }
    Ok(point)
}

/// Encode a scalar to its canonical form.
pub fn scalar_to_bytes(scalar: &Scalar) -> [u8; SCALAR_SIZE] {
    scalar.to_bytes()
}

/// Decode a scalar, requiring a canonical encoding.
pub fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
    let arr: [u8; SCALAR_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidScalar)?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(arr)).ok_or(CryptoError::InvalidScalar)
}

/// The evaluation point of participant `index` (participants are 0-based,
/// polynomials are evaluated at `index + 1` so that 0 stays the secret).
pub fn index_scalar(index: u32) -> Scalar {
    Scalar::from(u64::from(index) + 1)
}

/// Embed up to [`EMBED_CAPACITY`] bytes of `data` into a group element.
///
/// # Errors
///
/// Returns [`CryptoError::MessageTooLong`] if `data` exceeds the capacity.
pub fn embed<R: RngCore + CryptoRng>(data: &[u8], rng: &mut R) -> Result<EdwardsPoint> {
    if data.len() > EMBED_CAPACITY {
        return Err(CryptoError::MessageTooLong {
            len: data.len(),
            capacity: EMBED_CAPACITY,
        });
    }

    for _ in 0..MAX_EMBED_ATTEMPTS {
        let mut candidate = [0u8; POINT_SIZE];
        rng.fill_bytes(&mut candidate);
        candidate[0] = data.len() as u8;
        candidate[1..1 + data.len()].copy_from_slice(data);

        if let Some(point) = CompressedEdwardsY(candidate).decompress() {
            if point.is_torsion_free() && point.compress().to_bytes() == candidate {
                return Ok(point);
            }
        }
    }

    Err(CryptoError::InvalidInput(
        "no embeddable point found".to_string(),
    ))
}

/// Extract the bytes embedded by [`embed`].
///
/// # Errors
///
/// Returns [`CryptoError::NoEmbeddedData`] if the length byte is out of range,
/// which is what a wrongly decrypted point almost always looks like.
pub fn extract(point: &EdwardsPoint) -> Result<Vec<u8>> {
    let bytes = point.compress().to_bytes();
    let len = bytes[0] as usize;
    if len > EMBED_CAPACITY {
        return Err(CryptoError::NoEmbeddedData);
    }
    Ok(bytes[1..1 + len].to_vec())
}

/// A long-term or ephemeral key pair: `public = secret * G`.
#[derive(Clone)]
pub struct KeyPair {
    secret: Scalar,
    public: EdwardsPoint,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_secret(Scalar::random(rng))
    }

    /// Build a key pair from an existing secret scalar.
    pub fn from_secret(secret: Scalar) -> Self {
        let public = EdwardsPoint::mul_base(&secret);
        Self { secret, public }
    }

    /// The secret scalar.
    pub fn secret(&self) -> &Scalar {
        &self.secret
    }

    /// The public point.
    pub fn public(&self) -> &EdwardsPoint {
        &self.public
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(point_to_bytes(&self.public)))
            .finish_non_exhaustive()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}
