//! AES-GCM datagram frame encryption.
//!
//! Wire format: `iv(12) || ciphertext || gcm_tag(16)`. A fresh random IV
//! is generated per frame; IVs are never reused with the same key.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::kdf::KEY_LEN;
use crate::{CryptoError, Result};

/// IV (nonce) size for AES-GCM (96 bits).
pub const IV_SIZE: usize = 12;

/// Authentication tag size (128 bits).
pub const TAG_SIZE: usize = 16;

/// Encrypt a plaintext event batch into a wire frame.
///
/// Generates a random 12-byte IV and prepends it to the ciphertext, so
/// the returned frame is self-contained: `iv || ciphertext || tag`.
pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::BadFrame("encryption failed"))?;

    let mut frame = Vec::with_capacity(IV_SIZE + ciphertext.len());
    frame.extend_from_slice(&iv);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Decrypt a wire frame back into the plaintext event batch.
///
/// Fails cleanly with [`CryptoError::BadFrame`] if the frame is too
/// short to contain an IV and tag, or if the GCM tag does not verify
/// (wrong key, corrupted frame, or truncated ciphertext). Callers must
/// treat this as a droppable frame, not a fatal error.
pub fn decrypt(key: &[u8; KEY_LEN], frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < IV_SIZE + TAG_SIZE {
        return Err(CryptoError::BadFrame("frame shorter than iv+tag"));
    }

    let (iv, ciphertext) = frame.split_at(IV_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::BadFrame("tag verification failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::derive_key;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = derive_key("0123456789abcdef").expect("derive");
        let plaintext = b"a batch of prepared events";

        let frame = encrypt(&key, plaintext).expect("encrypt");
        let decrypted = decrypt(&key, &frame).expect("decrypt");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_frame_layout() {
        let key = derive_key("0123456789abcdef").expect("derive");
        let plaintext = b"hello";

        let frame = encrypt(&key, plaintext).expect("encrypt");
        assert_eq!(frame.len(), IV_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = derive_key("0123456789abcdef").expect("derive");
        let key2 = derive_key("fedcba9876543210").expect("derive");

        let frame = encrypt(&key1, b"secret").expect("encrypt");
        assert!(decrypt(&key2, &frame).is_err());
    }

    #[test]
    fn test_tampered_frame_fails() {
        let key = derive_key("0123456789abcdef").expect("derive");
        let mut frame = encrypt(&key, b"secret").expect("encrypt");
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        assert!(decrypt(&key, &frame).is_err());
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let key = derive_key("0123456789abcdef").expect("derive");
        assert!(decrypt(&key, &[0u8; 4]).is_err());
    }

    #[test]
    fn test_ivs_are_random() {
        let key = derive_key("0123456789abcdef").expect("derive");
        let frame1 = encrypt(&key, b"same plaintext").expect("encrypt");
        let frame2 = encrypt(&key, b"same plaintext").expect("encrypt");
        assert_ne!(&frame1[..IV_SIZE], &frame2[..IV_SIZE]);
    }
}
