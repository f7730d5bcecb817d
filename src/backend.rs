//! Backend secrets managers selectable through the provider registry.

pub mod cloud;
pub mod passphrase;
pub mod service;

use crate::errors::{Error, Result};
use aes_gcm::Aes256Gcm;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngCore;

const VALUE_VERSION: &str = "v1";
const NONCE_LEN: usize = 12;

/// Seal a value under `key`, producing `v1:<b64 nonce>:<b64 ciphertext>`.
pub(crate) fn seal_value(key: &[u8; 32], plaintext: &str) -> Result<String> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| Error::Crypto("invalid AES key".into()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = GenericArray::clone_from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| Error::Crypto("failed to encrypt payload".into()))?;
    Ok(format!(
        "{VALUE_VERSION}:{}:{}",
        STANDARD.encode(nonce_bytes),
        STANDARD.encode(ciphertext)
    ))
}

/// Open a `v1:<b64 nonce>:<b64 ciphertext>` value sealed with [`seal_value`].
pub(crate) fn open_value(key: &[u8; 32], sealed: &str) -> Result<String> {
    let mut parts = sealed.splitn(3, ':');
    let (version, nonce, payload) = match (parts.next(), parts.next(), parts.next()) {
        (Some(version), Some(nonce), Some(payload)) => (version, nonce, payload),
        _ => return Err(Error::Crypto("malformed ciphertext".into())),
    };
    if version != VALUE_VERSION {
        return Err(Error::Crypto(format!(
            "unsupported ciphertext version \"{version}\""
        )));
    }
    let nonce_bytes = STANDARD
        .decode(nonce)
        .map_err(|_| Error::Crypto("malformed ciphertext nonce".into()))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(Error::Crypto("malformed ciphertext nonce".into()));
    }
    let ciphertext = STANDARD
        .decode(payload)
        .map_err(|_| Error::Crypto("malformed ciphertext payload".into()))?;

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| Error::Crypto("invalid AES key".into()))?;
    let nonce = GenericArray::clone_from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(&nonce, ciphertext.as_slice())
        .map_err(|_| Error::Crypto("message authentication failed".into()))?;
    String::from_utf8(plaintext).map_err(|_| Error::Crypto("plaintext is not utf-8".into()))
}

/// Seal raw bytes under `key`, producing `nonce || ciphertext`. Used for
/// key wrapping, where no versioned string format is wanted.
pub(crate) fn seal_bytes(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| Error::Crypto("invalid AES key".into()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = GenericArray::clone_from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::Crypto("failed to encrypt payload".into()))?;
    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a `nonce || ciphertext` blob sealed with [`seal_bytes`].
pub(crate) fn open_bytes(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(Error::Crypto("sealed blob too short".into()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| Error::Crypto("invalid AES key".into()))?;
    let nonce = GenericArray::clone_from_slice(nonce_bytes);
    cipher
        .decrypt(&nonce, ciphertext)
        .map_err(|_| Error::Crypto("message authentication failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_round_trip() {
        let key = [7u8; 32];
        let sealed = seal_value(&key, "hello").unwrap();
        assert!(sealed.starts_with("v1:"));
        assert_eq!(open_value(&key, &sealed).unwrap(), "hello");
    }

    #[test]
    fn tampered_value_fails_authentication() {
        let key = [7u8; 32];
        let sealed = seal_value(&key, "hello").unwrap();
        let mut tampered = sealed.into_bytes();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(matches!(
            open_value(&key, &tampered),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = seal_value(&[7u8; 32], "hello").unwrap();
        assert!(matches!(
            open_value(&[8u8; 32], &sealed),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn bytes_round_trip() {
        let key = [3u8; 32];
        let sealed = seal_bytes(&key, b"key material").unwrap();
        assert_eq!(open_bytes(&key, &sealed).unwrap(), b"key material");
    }
}
