use crate::errors::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Encrypts plaintext secret values under some backend key.
#[async_trait]
pub trait Encrypter: Send + Sync {
    /// Encrypt a single plaintext value.
    async fn encrypt_value(&self, plaintext: &str) -> Result<String>;

    /// Encrypt a batch of plaintexts, preserving input order in the output.
    ///
    /// Either every value is encrypted or an error is returned with no
    /// partial result. The default implementation loops over
    /// [`encrypt_value`](Encrypter::encrypt_value); backends with a native
    /// batch call override it to amortize round-trips.
    async fn batch_encrypt(&self, plaintexts: &[String]) -> Result<Vec<String>> {
        let mut ciphertexts = Vec::with_capacity(plaintexts.len());
        for plaintext in plaintexts {
            ciphertexts.push(self.encrypt_value(plaintext).await?);
        }
        Ok(ciphertexts)
    }
}

/// Decrypts ciphertexts produced under some backend key.
#[async_trait]
pub trait Decrypter: Send + Sync {
    /// Decrypt a single ciphertext.
    async fn decrypt_value(&self, ciphertext: &str) -> Result<String>;

    /// Decrypt a batch of ciphertexts, preserving input order in the output.
    ///
    /// Either every value is decrypted or an error is returned with no
    /// partial result.
    async fn batch_decrypt(&self, ciphertexts: &[String]) -> Result<Vec<String>> {
        let mut plaintexts = Vec::with_capacity(ciphertexts.len());
        for ciphertext in ciphertexts {
            plaintexts.push(self.decrypt_value(ciphertext).await?);
        }
        Ok(plaintexts)
    }
}

/// A secrets manager pairs a stable type tag and persisted state with the
/// crypters that operate under its key.
///
/// The tag and state are written into each checkpoint by the surrounding
/// serializer; the provider registry reconstructs the manager from that pair
/// when the checkpoint is read back.
pub trait SecretsManager: Send + Sync {
    /// Stable tag identifying the backend kind.
    fn kind(&self) -> &str;

    /// Opaque state persisted alongside a checkpoint, sufficient for the
    /// provider registry to reconstruct this manager.
    fn state(&self) -> serde_json::Value;

    /// The encrypter operating under this manager's key.
    fn encrypter(&self) -> Arc<dyn Encrypter>;

    /// The decrypter operating under this manager's key.
    fn decrypter(&self) -> Arc<dyn Decrypter>;
}

impl<T> SecretsManager for Arc<T>
where
    T: SecretsManager + ?Sized,
{
    fn kind(&self) -> &str {
        (**self).kind()
    }

    fn state(&self) -> serde_json::Value {
        (**self).state()
    }

    fn encrypter(&self) -> Arc<dyn Encrypter> {
        (**self).encrypter()
    }

    fn decrypter(&self) -> Arc<dyn Decrypter> {
        (**self).decrypter()
    }
}

impl<T> SecretsManager for Box<T>
where
    T: SecretsManager + ?Sized,
{
    fn kind(&self) -> &str {
        (**self).kind()
    }

    fn state(&self) -> serde_json::Value {
        (**self).state()
    }

    fn encrypter(&self) -> Arc<dyn Encrypter> {
        (**self).encrypter()
    }

    fn decrypter(&self) -> Arc<dyn Decrypter> {
        (**self).decrypter()
    }
}
