//! ElGamal encryption of an embedded message under a joint public point.
//!
//! ```text
//! seal(X, m):  M = embed(m), r <- random, R = r*G, C = M + r*X
//! open(x, ct): M = C - x*R, m = extract(M)
//! ```

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};

use crate::group::{self, POINT_SIZE};
use crate::{CryptoError, Result};

/// Size of an encoded ciphertext.
pub const CIPHERTEXT_SIZE: usize = 2 * POINT_SIZE;

/// An ElGamal ciphertext `(R, C)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ciphertext {
    /// `R = r*G`.
    pub ephemeral: EdwardsPoint,
    /// `C = M + r*X`.
    pub body: EdwardsPoint,
}

impl Ciphertext {
    /// Serialize to `R || C`.
    pub fn to_bytes(&self) -> [u8; CIPHERTEXT_SIZE] {
        let mut out = [0u8; CIPHERTEXT_SIZE];
        out[..POINT_SIZE].copy_from_slice(&group::point_to_bytes(&self.ephemeral));
        out[POINT_SIZE..].copy_from_slice(&group::point_to_bytes(&self.body));
        out
    }

    /// Deserialize from `R || C`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CIPHERTEXT_SIZE {
            return Err(CryptoError::InvalidInput(format!(
                "ciphertext must be {CIPHERTEXT_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            ephemeral: group::point_from_bytes(&bytes[..POINT_SIZE])?,
            body: group::point_from_bytes(&bytes[POINT_SIZE..])?,
        })
    }
}

/// Encrypt `message` (at most [`group::EMBED_CAPACITY`] bytes) to `public`.
pub fn seal<R: RngCore + CryptoRng>(
    public: &EdwardsPoint,
    message: &[u8],
    rng: &mut R,
) -> Result<Ciphertext> {
    let point = group::embed(message, rng)?;
    let r = Scalar::random(rng);
    Ok(Ciphertext {
        ephemeral: EdwardsPoint::mul_base(&r),
        body: point + r * public,
    })
}

/// Decrypt `ciphertext` with the joint secret scalar.
///
/// A wrong key yields a random point, which almost always fails to
/// extract with [`CryptoError::NoEmbeddedData`]. Callers must not rely on
/// that to detect a wrong key.
pub fn open(secret: &Scalar, ciphertext: &Ciphertext) -> Result<Vec<u8>> {
    let point = ciphertext.body - secret * ciphertext.ephemeral;
    group::extract(&point)
}
