//! PBKDF2-HMAC-SHA256 key derivation.
//!
//! The cluster password derives a single 256-bit AES-GCM key. The salt
//! and iteration count are fixed by the protocol, not configurable: every
//! node in a cluster must derive the same key from the same password, and
//! there is no mechanism to exchange a salt out of band.

use sha2::Sha256;

use crate::{CryptoError, Result};

/// Minimum accepted cluster password length, in bytes.
pub const MIN_PASSWORD_LEN: usize = 16;

/// Fixed salt for cluster key derivation. Not a secret; fixed so that
/// every node derives the same key from the same password without an
/// out-of-band salt exchange.
const SALT: &[u8] = b"org.rssys.password.salt.string!!";

/// PBKDF2 iteration count.
const ITERATIONS: u32 = 10_000;

/// Derived key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Derive the cluster's 256-bit secret key from its password.
///
/// # Errors
///
/// Returns [`CryptoError::PasswordTooShort`] if `password` is shorter
/// than [`MIN_PASSWORD_LEN`] bytes.
pub fn derive_key(password: &str) -> Result<[u8; KEY_LEN]> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(CryptoError::PasswordTooShort {
            len: password.len(),
        });
    }

    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), SALT, ITERATIONS, &mut key);
    Ok(key)
}
