//! Domain-separated BLAKE3 hashing for TimeVault.
//!
//! BLAKE3 serves three purposes here: deriving the symmetric key that
//! protects each encrypted share inside a deal, deriving Schnorr challenges,
//! and hashing deal transcripts. Cross-domain collisions are prevented by
//! BLAKE3's derive-key mode with one registered context string per purpose.

use curve25519_dalek::scalar::Scalar;

/// Registered BLAKE3 context strings.
pub mod contexts {
    pub const DEAL_SHARE_KEY: &str = "TimeVault v1 deal-share-key";
    pub const DEAL_TRANSCRIPT: &str = "TimeVault v1 deal-transcript";
    pub const SCHNORR_CHALLENGE: &str = "TimeVault v1 schnorr-challenge";
}

/// Derive a key using BLAKE3's built-in key derivation mode.
///
/// # Arguments
///
/// * `context` - A registered context string (must start with "TimeVault v1 ")
/// * `key_material` - The input key material
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    out.copy_from_slice(hasher.finalize().as_bytes());
    out
}

/// Derive a scalar uniformly from `key_material` under `context`.
///
/// Reads 64 bytes of XOF output and reduces them modulo the group order,
/// so the result has negligible bias.
pub fn derive_scalar(context: &str, key_material: &[u8]) -> Scalar {
    let mut wide = [0u8; 64];
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    hasher.finalize_xof().fill(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Encode multiple dynamic fields using length-prefixed encoding.
///
/// `LE32(len(field1)) || field1 || LE32(len(field2)) || field2 || ...`
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    let total_len: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut output = Vec::with_capacity(total_len);
    for field in fields {
        output.extend_from_slice(&(field.len() as u32).to_le_bytes());
        output.extend_from_slice(field);
    }
    output
}
