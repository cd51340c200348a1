//! Content and blob protection.
//!
//! File content runs through compress-then-encrypt before upload:
//! gzip, then XChaCha20-Poly1305 under the file's own symmetric key.
//! Lock and manifest blobs skip compression (they are small MessagePack
//! maps) and are sealed under the provider's [`SealKey`]. Every
//! encryption uses a fresh random 192-bit nonce prepended to the
//! ciphertext, so stored blobs are self-describing.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use mirror_types::FileKey;
use std::fmt;
use std::io::{Read, Write};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::StoreError;

/// Size of XChaCha20-Poly1305 nonce in bytes (192 bits).
pub const NONCE_SIZE: usize = 24;

/// Key sealing a provider's lock and manifest objects.
///
/// Provisioned by the device key-pair layer outside this workspace;
/// injected wherever a provider is activated. Zeroed from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealKey([u8; 32]);

impl SealKey {
    /// Create a seal key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Mint a fresh random key (tests and first-run provisioning).
    pub fn mint() -> Self {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SealKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealKey([REDACTED])")
    }
}

/// BLAKE3 hash of plaintext content, the `content_hash` of a file record.
pub fn content_hash(plaintext: &[u8]) -> [u8; 32] {
    *blake3::hash(plaintext).as_bytes()
}

/// Compress and encrypt file content for upload.
pub fn seal_content(key: &FileKey, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
    let compressed = compress(plaintext)?;
    encrypt(key.as_bytes(), &compressed)
}

/// Decrypt and decompress downloaded file content.
pub fn open_content(key: &FileKey, blob: &[u8]) -> Result<Vec<u8>, StoreError> {
    let compressed = decrypt(key.as_bytes(), blob)?;
    decompress(&compressed)
}

/// Seal a lock or manifest blob under the provider's seal key.
pub fn seal_blob(key: &SealKey, blob: &[u8]) -> Result<Vec<u8>, StoreError> {
    encrypt(key.as_bytes(), blob)
}

/// Open a sealed lock or manifest blob.
pub fn open_blob(key: &SealKey, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
    decrypt(key.as_bytes(), sealed)
}

fn compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce).map_err(|e| StoreError::Crypto(e.to_string()))?;

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| StoreError::Crypto(e.to_string()))?;
    let xnonce = XNonce::from_slice(&nonce);
    let ciphertext = cipher
        .encrypt(xnonce, plaintext)
        .map_err(|e| StoreError::Crypto(e.to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

fn decrypt(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>, StoreError> {
    if blob.len() < NONCE_SIZE {
        return Err(StoreError::Crypto(format!(
            "blob too short for nonce: {} bytes",
            blob.len()
        )));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| StoreError::Crypto(e.to_string()))?;
    let xnonce = XNonce::from_slice(nonce);
    cipher
        .decrypt(xnonce, ciphertext)
        .map_err(|_| StoreError::Crypto("decryption failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_roundtrip() {
        let key = FileKey::mint();
        let plaintext = b"Confidential document contents";

        let sealed = seal_content(&key, plaintext).unwrap();
        let opened = open_content(&key, &sealed).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn sealed_content_is_not_plaintext() {
        let key = FileKey::mint();
        let plaintext = b"something readable something readable";

        let sealed = seal_content(&key, plaintext).unwrap();

        assert!(!sealed
            .windows(plaintext.len())
            .any(|window| window == plaintext));
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = seal_content(&FileKey::mint(), b"secret").unwrap();
        let result = open_content(&FileKey::mint(), &sealed);
        assert!(matches!(result, Err(StoreError::Crypto(_))));
    }

    #[test]
    fn repetitive_content_shrinks() {
        let key = FileKey::mint();
        let plaintext = vec![b'a'; 64 * 1024];

        let sealed = seal_content(&key, &plaintext).unwrap();

        // Gzip collapses the run; the nonce and tag overhead is tiny.
        assert!(sealed.len() < plaintext.len() / 4);
    }

    #[test]
    fn same_plaintext_seals_differently() {
        // Random nonces: no two uploads look alike.
        let key = FileKey::mint();
        let a = seal_content(&key, b"same").unwrap();
        let b = seal_content(&key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn blob_roundtrip() {
        let key = SealKey::mint();
        let blob = b"manifest messagepack bytes";

        let sealed = seal_blob(&key, blob).unwrap();
        let opened = open_blob(&key, &sealed).unwrap();

        assert_eq!(opened, blob);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let key = SealKey::mint();
        let result = open_blob(&key, &[0u8; 10]);
        assert!(matches!(result, Err(StoreError::Crypto(_))));
    }

    #[test]
    fn empty_content_roundtrip() {
        let key = FileKey::mint();
        let sealed = seal_content(&key, b"").unwrap();
        let opened = open_content(&key, &sealed).unwrap();
        assert!(opened.is_empty());
    }

    #[test]
    fn content_hash_is_blake3_of_plaintext() {
        let plaintext = b"hash me";
        assert_eq!(content_hash(plaintext), *blake3::hash(plaintext).as_bytes());
    }

    #[test]
    fn seal_key_debug_is_redacted() {
        assert_eq!(format!("{:?}", SealKey::mint()), "SealKey([REDACTED])");
    }
}
