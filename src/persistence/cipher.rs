//! Symmetric encryption for the append-only log (AES-256-CTR) and snapshot
//! files (AES-256-GCM). Keys are derived from the configured nonce via
//! SHA-256, same as spec.md §4.4 describes, but with a random per-file IV
//! instead of the teacher's all-zero-IV weakness flagged in spec.md §9 —
//! that behavior is explicitly NOT preserved.

use crate::error::PersistError;
use aes::Aes256;
use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const CTR_IV_LEN: usize = 16;
pub const GCM_NONCE_LEN: usize = 12;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

pub fn derive_key(nonce: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    hasher.finalize().into()
}

pub fn random_iv() -> [u8; CTR_IV_LEN] {
    let mut iv = [0u8; CTR_IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

pub fn random_nonce() -> [u8; GCM_NONCE_LEN] {
    let mut n = [0u8; GCM_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut n);
    n
}

/// A resumable AES-CTR stream, used to encrypt/decrypt AOF bytes as they
/// flow through the writer/reader. The caller is responsible for storing
/// the IV once as a file header and reconstructing the same stream state
/// (CTR mode lets us just keep applying the keystream across calls).
pub struct CtrStream {
    cipher: Aes256Ctr,
}

impl CtrStream {
    pub fn new(key: &[u8; 32], iv: &[u8; CTR_IV_LEN]) -> Self {
        CtrStream {
            cipher: Aes256Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
        }
    }

    /// Encrypts/decrypts `buf` in place (CTR mode is symmetric).
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.cipher.apply_keystream(buf);
    }
}

pub fn gcm_seal(key: &[u8; 32], nonce: &[u8; GCM_NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, PersistError> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| PersistError::Crypto(e.to_string()))
}

pub fn gcm_open(key: &[u8; 32], nonce: &[u8; GCM_NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, PersistError> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| PersistError::Crypto(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctr_roundtrip() {
        let key = derive_key("test-nonce");
        let iv = random_iv();
        let mut buf = b"hello world, this is a test frame".to_vec();
        let original = buf.clone();
        CtrStream::new(&key, &iv).apply(&mut buf);
        assert_ne!(buf, original);
        CtrStream::new(&key, &iv).apply(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn gcm_roundtrip_and_tamper_detection() {
        let key = derive_key("test-nonce");
        let nonce = random_nonce();
        let sealed = gcm_seal(&key, &nonce, b"snapshot bytes").unwrap();
        let opened = gcm_open(&key, &nonce, &sealed).unwrap();
        assert_eq!(opened, b"snapshot bytes");

        let mut tampered = sealed.clone();
        tampered[0] ^= 0xff;
        assert!(gcm_open(&key, &nonce, &tampered).is_err());
    }

    #[test]
    fn distinct_files_get_distinct_ivs() {
        let a = random_iv();
        let b = random_iv();
        assert_ne!(a, b, "random IVs should not collide in practice");
    }
}
