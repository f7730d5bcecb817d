//! Batching and caching core between a deployment checkpoint serializer and
//! pluggable secrets backends.
//!
//! Serialization obtains a [`BatchEncrypter`] plus its one-shot completion
//! handle, enqueues every secret it encounters, and completes once traversal
//! finishes; deserialization does the same with a [`BatchDecrypter`].
//! Requests are coalesced into bounded batches against the backend and
//! memoized in a [`SecretCache`], so re-serializing an unchanged deployment
//! can skip the backend entirely.
//!
//! ```no_run
//! use checkpoint_secrets::{DefaultSecretsProvider, Secret, SecretsProvider, SerializedSecret};
//!
//! # async fn serialize(kind: &str, state: serde_json::Value) -> checkpoint_secrets::Result<()> {
//! let manager = DefaultSecretsProvider.of_type(kind, state)?;
//! let (encrypter, batch) = manager.begin_batch_encryption();
//! let target = SerializedSecret::new();
//! encrypter.enqueue(&Secret::new(), "plaintext", &target).await?;
//! batch.complete().await?;
//! assert!(!target.ciphertext().is_empty());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod batch;
pub mod cache;
pub mod crypter;
pub mod errors;
pub mod manager;
pub mod provider;
pub mod types;

pub use backend::cloud::CloudSecretsManager;
pub use backend::passphrase::PassphraseSecretsManager;
pub use backend::service::{ServiceSecretsManager, ServiceState};
pub use batch::decrypt::{
    BatchDecrypter, DEFAULT_MAX_BATCH_DECRYPT_COUNT, DecryptionBatch, DeserializeSecretValue,
    begin_batch_decryption, begin_batch_decryption_with_cache,
};
pub use batch::encrypt::{
    BatchEncrypter, DEFAULT_MAX_BATCH_ENCRYPT_COUNT, EncryptionBatch, begin_batch_encryption,
};
pub use cache::{DISABLE_SECRET_CACHE_ENV, SecretCache};
pub use crypter::{Decrypter, Encrypter, SecretsManager};
pub use errors::{Error, Result};
pub use manager::BatchingCachingManager;
pub use provider::{DefaultSecretsProvider, NamedStackSecretsProvider, SecretsProvider};
pub use types::{PropertyValue, Secret, SecretId, SerializedSecret};
