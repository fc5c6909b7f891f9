//! ChaCha20-Poly1305 AEAD encryption (RFC 8439).
//!
//! Protects the per-recipient share inside a deal. Each share key is derived
//! from a fresh dealer ephemeral, so a fixed nonce is never reused under the
//! same key.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::{CryptoError, Result};

/// Nonce size for ChaCha20-Poly1305 (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// Encrypt data with ChaCha20-Poly1305.
///
/// Returns the ciphertext with the 16-byte authentication tag appended.
pub fn encrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AeadDecryption)
}

/// Decrypt data with ChaCha20-Poly1305.
///
/// Fails with [`CryptoError::AeadDecryption`] if the tag does not verify
/// under `key`, `nonce` and `aad`.
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AeadDecryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [0x42u8; KEY_SIZE];
        let nonce = [0x01u8; NONCE_SIZE];
        let plaintext = b"a 32 byte scalar share goes here";

        let ciphertext = encrypt(&key, &nonce, plaintext, b"TVSS_0_0").expect("encrypt");
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_SIZE);
        let decrypted = decrypt(&key, &nonce, &ciphertext, b"TVSS_0_0").expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let nonce = [0x01u8; NONCE_SIZE];
        let ciphertext = encrypt(&[0x01u8; KEY_SIZE], &nonce, b"test", b"").expect("encrypt");
        assert!(decrypt(&[0x02u8; KEY_SIZE], &nonce, &ciphertext, b"").is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = [0x01u8; KEY_SIZE];
        let nonce = [0x01u8; NONCE_SIZE];
        let ciphertext = encrypt(&key, &nonce, b"test", b"TVSS_0_0").expect("encrypt");
        assert!(decrypt(&key, &nonce, &ciphertext, b"TVSS_1_0").is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [0x01u8; KEY_SIZE];
        let nonce = [0x01u8; NONCE_SIZE];
        let mut ciphertext = encrypt(&key, &nonce, b"test", b"").expect("encrypt");
        if let Some(byte) = ciphertext.first_mut() {
            *byte ^= 0xFF;
        }
        assert!(decrypt(&key, &nonce, &ciphertext, b"").is_err());
    }
}
