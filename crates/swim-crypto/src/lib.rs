//! # swim-crypto
//!
//! Cryptographic primitives for the SWIM membership protocol's wire
//! transport: password-based key derivation and authenticated frame
//! encryption. No algorithm negotiation is permitted — the cluster
//! password derives one fixed 256-bit key, and every frame is encrypted
//! with AES-GCM using that key.
//!
//! ## Modules
//!
//! - [`kdf`] — PBKDF2-HMAC-SHA256 key derivation from a cluster password
//! - [`aesgcm`] — AES-GCM frame encryption/decryption

pub mod aesgcm;
pub mod kdf;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// A datagram frame failed to decrypt: GCM tag mismatch, a frame
    /// shorter than the minimum IV+tag length, or any other
    /// non-diagnosable AEAD failure. Callers must treat this as a
    /// recoverable, droppable frame rather than a fatal error.
    #[error("bad frame: {0}")]
    BadFrame(&'static str),

    /// The supplied password does not satisfy the minimum length
    /// required by the protocol (16 characters).
    #[error("password too short: {len} characters, minimum 16")]
    PasswordTooShort { len: usize },
}

/// Convenience result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
