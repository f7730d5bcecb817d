use crate::batch::decrypt::{BatchDecrypter, DecryptionBatch, begin_batch_decryption};
use crate::batch::encrypt::{BatchEncrypter, EncryptionBatch, begin_batch_encryption};
use crate::cache::SecretCache;
use crate::crypter::{Decrypter, Encrypter, SecretsManager};
use std::sync::Arc;

/// Decorates a backend secrets manager with batched, cached crypter
/// sessions.
///
/// One instance owns exactly one [`SecretCache`]; every encryption session
/// derived from the same instance shares it, so repeated serializations of
/// an unchanged deployment reuse previous ciphertexts instead of calling the
/// backend.
pub struct BatchingCachingManager {
    manager: Arc<dyn SecretsManager>,
    cache: Arc<SecretCache>,
}

impl std::fmt::Debug for BatchingCachingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingCachingManager")
            .field("manager", &self.manager.kind())
            .finish()
    }
}

impl BatchingCachingManager {
    /// Wrap `manager`, creating the cache shared by all batchers derived
    /// from this instance. The cache honors the process-wide disable toggle.
    pub fn new(manager: Arc<dyn SecretsManager>) -> Self {
        Self {
            manager,
            cache: Arc::new(SecretCache::from_env()),
        }
    }

    /// Begin a batched encryption session sharing this manager's cache.
    pub fn begin_batch_encryption(&self) -> (BatchEncrypter, EncryptionBatch) {
        begin_batch_encryption(self.manager.encrypter(), Arc::clone(&self.cache))
    }

    /// Begin a batched decryption session.
    ///
    /// Decryption deliberately bypasses the shared cache so that every
    /// operation performs at least one real decryption; re-encryption after
    /// edits then always observes fresh ciphertext.
    pub fn begin_batch_decryption(&self) -> (BatchDecrypter, DecryptionBatch) {
        begin_batch_decryption(self.manager.decrypter())
    }
}

impl SecretsManager for BatchingCachingManager {
    fn kind(&self) -> &str {
        self.manager.kind()
    }

    fn state(&self) -> serde_json::Value {
        self.manager.state()
    }

    fn encrypter(&self) -> Arc<dyn Encrypter> {
        self.manager.encrypter()
    }

    fn decrypter(&self) -> Arc<dyn Decrypter> {
        self.manager.decrypter()
    }
}
