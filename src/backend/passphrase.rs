//! Passphrase-derived secrets manager.
//!
//! The persisted state carries a salt blob that embeds an encryption of a
//! known verification payload, so an incorrect passphrase is rejected at
//! construction instead of yielding garbage plaintexts later.

use crate::backend::{open_value, seal_value};
use crate::crypter::{Decrypter, Encrypter, SecretsManager};
use crate::errors::{Error, Result};
use argon2::Argon2;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::{env, fs};
use zeroize::Zeroizing;

/// Type tag persisted for passphrase-protected checkpoints.
pub const TYPE: &str = "passphrase";

/// Environment variable supplying the passphrase directly.
pub const PASSPHRASE_ENV: &str = "CHECKPOINT_PASSPHRASE";

/// Environment variable naming a file whose contents are the passphrase.
pub const PASSPHRASE_FILE_ENV: &str = "CHECKPOINT_PASSPHRASE_FILE";

const SALT_LEN: usize = 16;
const VERIFICATION_PLAINTEXT: &str = "checkpoint";

// The Argon2id cost parameters are part of the persisted format; changing
// them invalidates every existing state.
const ARGON2_M_COST: u32 = 65536;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PassphraseState {
    salt: String,
}

/// Secrets manager whose key is derived from a user passphrase with
/// Argon2id, encrypting values with AES-256-GCM.
pub struct PassphraseSecretsManager {
    state: PassphraseState,
    crypter: Arc<PassphraseCrypter>,
}

impl std::fmt::Debug for PassphraseSecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassphraseSecretsManager")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

struct PassphraseCrypter {
    key: Zeroizing<[u8; 32]>,
}

impl PassphraseSecretsManager {
    /// Create a manager with a fresh salt for a new checkpoint.
    pub fn new(passphrase: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        let key = derive_key(passphrase, &salt)?;
        let verification = seal_value(&key, VERIFICATION_PLAINTEXT)?;
        let state = PassphraseState {
            salt: format!("{}:{verification}", STANDARD.encode(salt)),
        };
        Ok(Self {
            state,
            crypter: Arc::new(PassphraseCrypter { key }),
        })
    }

    /// Reconstruct a manager from persisted state, resolving the passphrase
    /// from the environment.
    pub fn from_state(state: serde_json::Value) -> Result<Self> {
        let passphrase = resolve_passphrase(None)?;
        Self::from_state_with_passphrase(state, &passphrase)
    }

    /// Like [`from_state`](Self::from_state), with diagnostics that name the
    /// stack being operated on.
    pub fn from_state_for_stack(state: serde_json::Value, stack_name: &str) -> Result<Self> {
        let passphrase = resolve_passphrase(Some(stack_name))?;
        Self::from_state_with_passphrase(state, &passphrase)
    }

    /// Reconstruct a manager from persisted state and an explicit
    /// passphrase, verifying the passphrase against the state's embedded
    /// verification payload.
    pub fn from_state_with_passphrase(state: serde_json::Value, passphrase: &str) -> Result<Self> {
        let state: PassphraseState =
            serde_json::from_value(state).map_err(|err| Error::InvalidState(err.to_string()))?;
        let (salt, verification) = state
            .salt
            .split_once(':')
            .ok_or_else(|| Error::InvalidState("malformed passphrase salt".into()))?;
        let salt = STANDARD
            .decode(salt)
            .map_err(|err| Error::InvalidState(format!("decoding salt: {err}")))?;
        let key = derive_key(passphrase, &salt)?;
        let recovered =
            open_value(&key, verification).map_err(|_| Error::IncorrectPassphrase)?;
        if recovered != VERIFICATION_PLAINTEXT {
            return Err(Error::IncorrectPassphrase);
        }
        Ok(Self {
            state,
            crypter: Arc::new(PassphraseCrypter { key }),
        })
    }
}

impl SecretsManager for PassphraseSecretsManager {
    fn kind(&self) -> &str {
        TYPE
    }

    fn state(&self) -> serde_json::Value {
        serde_json::json!({ "salt": self.state.salt })
    }

    fn encrypter(&self) -> Arc<dyn Encrypter> {
        Arc::clone(&self.crypter) as Arc<dyn Encrypter>
    }

    fn decrypter(&self) -> Arc<dyn Decrypter> {
        Arc::clone(&self.crypter) as Arc<dyn Decrypter>
    }
}

#[async_trait]
impl Encrypter for PassphraseCrypter {
    async fn encrypt_value(&self, plaintext: &str) -> Result<String> {
        seal_value(&self.key, plaintext)
    }
}

#[async_trait]
impl Decrypter for PassphraseCrypter {
    async fn decrypt_value(&self, ciphertext: &str) -> Result<String> {
        open_value(&self.key, ciphertext)
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = argon2::Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(32))
        .map_err(|err| Error::Crypto(format!("invalid KDF params: {err}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut())
        .map_err(|err| Error::Crypto(format!("deriving key: {err}")))?;
    Ok(key)
}

fn resolve_passphrase(stack_name: Option<&str>) -> Result<String> {
    if let Ok(passphrase) = env::var(PASSPHRASE_ENV) {
        return Ok(passphrase);
    }
    if let Ok(path) = env::var(PASSPHRASE_FILE_ENV) {
        let contents = fs::read_to_string(&path).map_err(Error::PassphraseFile)?;
        return Ok(contents.trim_end_matches(['\r', '\n']).to_string());
    }
    let scope = match stack_name {
        Some(stack) => format!("stack \"{stack}\""),
        None => "the checkpoint".to_string(),
    };
    Err(Error::MissingPassphrase { scope })
}
