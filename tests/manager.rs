use async_trait::async_trait;
use checkpoint_secrets::{
    BatchingCachingManager, Decrypter, Encrypter, Secret, SecretsManager, SerializedSecret,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Symmetric in-memory backend that counts its batch calls. Ciphertexts are
/// `c:<plaintext>` so assertions can be written against exact values.
#[derive(Clone, Default)]
struct CountingManager {
    encrypt_batches: Arc<AtomicUsize>,
    decrypt_batches: Arc<AtomicUsize>,
}

impl CountingManager {
    fn encrypt_calls(&self) -> usize {
        self.encrypt_batches.load(Ordering::SeqCst)
    }

    fn decrypt_calls(&self) -> usize {
        self.decrypt_batches.load(Ordering::SeqCst)
    }
}

impl SecretsManager for CountingManager {
    fn kind(&self) -> &str {
        "counting"
    }

    fn state(&self) -> serde_json::Value {
        json!({})
    }

    fn encrypter(&self) -> Arc<dyn Encrypter> {
        Arc::new(self.clone())
    }

    fn decrypter(&self) -> Arc<dyn Decrypter> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Encrypter for CountingManager {
    async fn encrypt_value(&self, plaintext: &str) -> checkpoint_secrets::Result<String> {
        Ok(format!("c:{plaintext}"))
    }

    async fn batch_encrypt(
        &self,
        plaintexts: &[String],
    ) -> checkpoint_secrets::Result<Vec<String>> {
        self.encrypt_batches.fetch_add(1, Ordering::SeqCst);
        Ok(plaintexts.iter().map(|p| format!("c:{p}")).collect())
    }
}

#[async_trait]
impl Decrypter for CountingManager {
    async fn decrypt_value(&self, ciphertext: &str) -> checkpoint_secrets::Result<String> {
        ciphertext
            .strip_prefix("c:")
            .map(str::to_string)
            .ok_or_else(|| checkpoint_secrets::Error::Backend("unknown ciphertext".into()))
    }

    async fn batch_decrypt(
        &self,
        ciphertexts: &[String],
    ) -> checkpoint_secrets::Result<Vec<String>> {
        self.decrypt_batches.fetch_add(1, Ordering::SeqCst);
        let mut plaintexts = Vec::with_capacity(ciphertexts.len());
        for ciphertext in ciphertexts {
            plaintexts.push(self.decrypt_value(ciphertext).await?);
        }
        Ok(plaintexts)
    }
}

#[tokio::test]
async fn repeated_serializations_share_one_cache() {
    let backend = CountingManager::default();
    let manager = BatchingCachingManager::new(Arc::new(backend.clone()));
    let (s1, s2) = (Secret::new(), Secret::new());

    // Cold serialization: one backend batch.
    let (encrypter, batch) = manager.begin_batch_encryption();
    let (t1, t2) = (SerializedSecret::new(), SerializedSecret::new());
    encrypter.enqueue(&s1, r#"{"x":1}"#, &t1).await.unwrap();
    encrypter.enqueue(&s2, r#"{"y":2}"#, &t2).await.unwrap();
    batch.complete().await.unwrap();
    assert_eq!(t1.ciphertext(), r#"c:{"x":1}"#);
    assert_eq!(t2.ciphertext(), r#"c:{"y":2}"#);
    assert_eq!(backend.encrypt_calls(), 1);

    // Warm serialization from the same manager: served from its cache.
    let (encrypter, batch) = manager.begin_batch_encryption();
    let (t1, t2) = (SerializedSecret::new(), SerializedSecret::new());
    encrypter.enqueue(&s1, r#"{"x":1}"#, &t1).await.unwrap();
    encrypter.enqueue(&s2, r#"{"y":2}"#, &t2).await.unwrap();
    batch.complete().await.unwrap();
    assert_eq!(t1.ciphertext(), r#"c:{"x":1}"#);
    assert_eq!(backend.encrypt_calls(), 1);

    // A fresh manager over the same backend has its own, cold cache.
    let other = BatchingCachingManager::new(Arc::new(backend.clone()));
    let (encrypter, batch) = other.begin_batch_encryption();
    let t1 = SerializedSecret::new();
    encrypter.enqueue(&s1, r#"{"x":1}"#, &t1).await.unwrap();
    batch.complete().await.unwrap();
    assert_eq!(backend.encrypt_calls(), 2);
}

#[tokio::test]
async fn decryption_sessions_never_share_the_cache() {
    let backend = CountingManager::default();
    let manager = BatchingCachingManager::new(Arc::new(backend.clone()));

    for _ in 0..2 {
        let (decrypter, batch) = manager.begin_batch_decryption();
        let target = Secret::new();
        decrypter.enqueue(r#"c:{"x":1}"#, &target).await.unwrap();
        batch.complete().await.unwrap();
        assert_eq!(target.element(), Some(json!({"x": 1})));
    }

    // Each session performed a real decryption.
    assert_eq!(backend.decrypt_calls(), 2);
}

#[tokio::test]
async fn serialize_then_deserialize_round_trips_elements() {
    let backend = CountingManager::default();
    let manager = BatchingCachingManager::new(Arc::new(backend));

    let source = Secret::with_element(json!({"password": "hunter2"}));
    let shell = SerializedSecret::new();
    let (encrypter, batch) = manager.begin_batch_encryption();
    encrypter
        .enqueue(&source, source.element().unwrap().to_string(), &shell)
        .await
        .unwrap();
    batch.complete().await.unwrap();

    let restored = Secret::new();
    let (decrypter, batch) = manager.begin_batch_decryption();
    decrypter.enqueue(shell.ciphertext(), &restored).await.unwrap();
    batch.complete().await.unwrap();

    assert_eq!(restored.element(), source.element());
}

#[tokio::test]
async fn facade_passes_identity_and_crypters_through() {
    let backend = CountingManager::default();
    let manager = BatchingCachingManager::new(Arc::new(backend.clone()));

    assert_eq!(manager.kind(), "counting");
    assert_eq!(manager.state(), json!({}));
    assert_eq!(
        manager.encrypter().encrypt_value("direct").await.unwrap(),
        "c:direct"
    );
    assert_eq!(
        manager.decrypter().decrypt_value("c:direct").await.unwrap(),
        "direct"
    );
    // Direct crypters do not batch.
    assert_eq!(backend.encrypt_calls(), 0);
}
