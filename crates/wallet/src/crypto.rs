//! Key-at-rest encryption: AES-256-GCM under a SHA-256-derived key.
//!
//! Ciphertext layout is `nonce (12 bytes) || gcm ciphertext+tag`. A wrong
//! secret or a flipped bit fails GCM authentication and never yields
//! plaintext.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use qr_domain::{Error, Result};

const NONCE_LEN: usize = 12;

/// Derive the 32-byte AES key from a caller-supplied secret.
pub fn derive_key(secret: &str) -> [u8; 32] {
    let digest = Sha256::digest(secret.as_bytes());
    digest.into()
}

pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::internal("wallet key encryption failed"))?;
    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

pub fn decrypt(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() <= NONCE_LEN {
        return Err(Error::Unauthorized("wallet key blob is truncated".into()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Unauthorized("wallet key authentication failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = derive_key("keeper secret");
        let plaintext = b"0123456789abcdef0123456789abcdef";
        let blob = encrypt(&key, plaintext).unwrap();
        assert_ne!(&blob[NONCE_LEN..], plaintext.as_slice());
        let back = decrypt(&key, &blob).unwrap();
        assert_eq!(back, plaintext);
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let key = derive_key("s");
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = derive_key("s");
        let mut blob = encrypt(&key, b"payload").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let err = decrypt(&key, &blob).unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::Unauthorized);
    }

    #[test]
    fn wrong_secret_fails_authentication() {
        let blob = encrypt(&derive_key("right"), b"payload").unwrap();
        assert!(decrypt(&derive_key("wrong"), &blob).is_err());
    }

    #[test]
    fn truncated_blob_rejected() {
        let key = derive_key("s");
        assert!(decrypt(&key, &[0u8; 5]).is_err());
        assert!(decrypt(&key, &[]).is_err());
    }

    #[test]
    fn any_32_byte_key_works() {
        let mut key = [0u8; 32];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        let blob = encrypt(&key, b"x").unwrap();
        assert_eq!(decrypt(&key, &blob).unwrap(), b"x");
    }
}
