//! Cloud key-service secrets manager.
//!
//! Envelope layout: values are encrypted locally under a data-encryption
//! key, and only the DEK is wrapped by the key keeper named in the state's
//! URL. Hosted KMS keepers are integration points behind the [`KeyKeeper`]
//! seam; the built-in `base64key://` scheme carries a literal key in the
//! URL itself.

use crate::backend::{open_bytes, open_value, seal_bytes, seal_value};
use crate::crypter::{Decrypter, Encrypter, SecretsManager};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Type tag persisted for cloud-key-service checkpoints.
pub const TYPE: &str = "cloud";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CloudState {
    url: String,
    #[serde(rename = "encryptedkey")]
    encrypted_key: String,
}

/// Wraps and unwraps data-encryption keys under an external key service.
trait KeyKeeper: Send + Sync {
    fn wrap_key(&self, dek: &[u8]) -> Result<Vec<u8>>;
    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>>;
}

/// Keeper whose 256-bit key is carried in the URL itself. The local
/// equivalent of a hosted keeper, for tests and air-gapped setups.
struct Base64KeyKeeper {
    key: Zeroizing<[u8; 32]>,
}

impl Base64KeyKeeper {
    fn from_encoded(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE
            .decode(encoded)
            .or_else(|_| STANDARD.decode(encoded))
            .map_err(|err| Error::InvalidState(format!("decoding base64key url: {err}")))?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            Error::InvalidState(format!(
                "base64key must decode to 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self {
            key: Zeroizing::new(key),
        })
    }
}

impl KeyKeeper for Base64KeyKeeper {
    fn wrap_key(&self, dek: &[u8]) -> Result<Vec<u8>> {
        seal_bytes(&self.key, dek)
    }

    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>> {
        open_bytes(&self.key, wrapped)
    }
}

fn keeper_for_url(url: &str) -> Result<Box<dyn KeyKeeper>> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| Error::InvalidState(format!("malformed key url: {url}")))?;
    match scheme {
        "base64key" => Ok(Box::new(Base64KeyKeeper::from_encoded(rest)?)),
        other => Err(Error::UnsupportedKeeper(other.to_string())),
    }
}

/// Secrets manager that encrypts values under a keeper-wrapped data key.
pub struct CloudSecretsManager {
    state: CloudState,
    crypter: Arc<CloudCrypter>,
}

impl std::fmt::Debug for CloudSecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSecretsManager")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

struct CloudCrypter {
    dek: Zeroizing<[u8; 32]>,
}

impl CloudSecretsManager {
    /// Create a manager with a fresh data key wrapped by the keeper at
    /// `url`.
    pub fn new(url: &str) -> Result<Self> {
        let keeper = keeper_for_url(url)?;
        let mut dek = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(dek.as_mut());
        let wrapped = keeper.wrap_key(dek.as_ref())?;
        let state = CloudState {
            url: url.to_string(),
            encrypted_key: STANDARD.encode(wrapped),
        };
        Ok(Self {
            state,
            crypter: Arc::new(CloudCrypter { dek }),
        })
    }

    /// Reconstruct a manager from persisted state, unwrapping its data key
    /// through the keeper the state names.
    pub fn from_state(state: serde_json::Value) -> Result<Self> {
        let state: CloudState =
            serde_json::from_value(state).map_err(|err| Error::InvalidState(err.to_string()))?;
        let keeper = keeper_for_url(&state.url)?;
        let wrapped = STANDARD
            .decode(&state.encrypted_key)
            .map_err(|err| Error::InvalidState(format!("decoding encrypted key: {err}")))?;
        let unwrapped = keeper.unwrap_key(&wrapped)?;
        let dek: [u8; 32] = unwrapped.as_slice().try_into().map_err(|_| {
            Error::InvalidState(format!(
                "data key must be 32 bytes, got {}",
                unwrapped.len()
            ))
        })?;
        Ok(Self {
            state,
            crypter: Arc::new(CloudCrypter {
                dek: Zeroizing::new(dek),
            }),
        })
    }
}

impl SecretsManager for CloudSecretsManager {
    fn kind(&self) -> &str {
        TYPE
    }

    fn state(&self) -> serde_json::Value {
        serde_json::json!({
            "url": self.state.url,
            "encryptedkey": self.state.encrypted_key,
        })
    }

    fn encrypter(&self) -> Arc<dyn Encrypter> {
        Arc::clone(&self.crypter) as Arc<dyn Encrypter>
    }

    fn decrypter(&self) -> Arc<dyn Decrypter> {
        Arc::clone(&self.crypter) as Arc<dyn Decrypter>
    }
}

#[async_trait]
impl Encrypter for CloudCrypter {
    async fn encrypt_value(&self, plaintext: &str) -> Result<String> {
        seal_value(&self.dek, plaintext)
    }
}

#[async_trait]
impl Decrypter for CloudCrypter {
    async fn decrypt_value(&self, ciphertext: &str) -> Result<String> {
        open_value(&self.dek, ciphertext)
    }
}
