use crate::cache::SecretCache;
use crate::crypter::Decrypter;
use crate::errors::{Error, Result};
use crate::types::{PropertyValue, Secret};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default maximum number of decryptions drained in one backend batch. Also
/// the capacity of the enqueue queue.
pub const DEFAULT_MAX_BATCH_DECRYPT_COUNT: usize = 1000;

/// Parses a decrypted plaintext (typically a JSON-encoded property value)
/// into the value stored on the target secret.
pub type DeserializeSecretValue = Arc<dyn Fn(&str) -> Result<PropertyValue> + Send + Sync>;

fn deserialize_json_value(plaintext: &str) -> Result<PropertyValue> {
    serde_json::from_str(plaintext).map_err(Error::Deserialize)
}

struct QueuedDecryption {
    target: Secret,
    ciphertext: String,
}

/// Accumulates decryption requests and flushes them to the backend in
/// bounded batches, deserializing each plaintext onto its target secret.
///
/// Obtained from [`begin_batch_decryption`]; clones share one queue. The
/// batcher is one-shot: after its [`DecryptionBatch`] completes, further
/// enqueues panic.
#[derive(Clone)]
pub struct BatchDecrypter {
    inner: Arc<DecrypterInner>,
}

struct DecrypterInner {
    decrypter: Arc<dyn Decrypter>,
    cache: Arc<SecretCache>,
    deserialize: DeserializeSecretValue,
    queue: mpsc::Sender<QueuedDecryption>,
    // Owning the receiver is owning the sole right to pop the queue and call
    // the backend; at most one batch is in flight per batcher.
    drain: Mutex<mpsc::Receiver<QueuedDecryption>>,
    closed: AtomicBool,
    max_batch_size: usize,
}

/// One-shot completion handle for a [`BatchDecrypter`] session.
pub struct DecryptionBatch {
    batcher: BatchDecrypter,
}

/// Begin a batched decryption session against `decrypter`.
///
/// Uses the null cache: every operation performs at least one real
/// decryption, which guards against silent divergence between cache and
/// backend, and re-encryption after edits always observes fresh ciphertext.
/// Callers that want memoized decryption opt in through
/// [`begin_batch_decryption_with_cache`].
pub fn begin_batch_decryption(decrypter: Arc<dyn Decrypter>) -> (BatchDecrypter, DecryptionBatch) {
    begin_batch_decryption_with_cache(decrypter, Arc::new(SecretCache::null()))
}

/// Begin a batched decryption session that probes and populates `cache`.
pub fn begin_batch_decryption_with_cache(
    decrypter: Arc<dyn Decrypter>,
    cache: Arc<SecretCache>,
) -> (BatchDecrypter, DecryptionBatch) {
    begin_with_limit(
        decrypter,
        cache,
        Arc::new(deserialize_json_value),
        DEFAULT_MAX_BATCH_DECRYPT_COUNT,
    )
}

fn begin_with_limit(
    decrypter: Arc<dyn Decrypter>,
    cache: Arc<SecretCache>,
    deserialize: DeserializeSecretValue,
    max_batch_size: usize,
) -> (BatchDecrypter, DecryptionBatch) {
    assert!(max_batch_size > 0, "max batch size must be greater than zero");
    let (queue, receiver) = mpsc::channel(max_batch_size);
    let batcher = BatchDecrypter {
        inner: Arc::new(DecrypterInner {
            decrypter,
            cache,
            deserialize,
            queue,
            drain: Mutex::new(receiver),
            closed: AtomicBool::new(false),
            max_batch_size,
        }),
    };
    let complete = DecryptionBatch {
        batcher: batcher.clone(),
    };
    (batcher, complete)
}

impl BatchDecrypter {
    /// Enqueue `ciphertext` for decryption onto `target`.
    ///
    /// The decrypted, deserialized property value is assigned to `target`'s
    /// element no later than the return of [`DecryptionBatch::complete`]. A
    /// full queue never blocks this call: the calling task drives a drain
    /// itself and then retries. An error from such a drain aborts the whole
    /// session; items already popped for the failed drain are not
    /// re-enqueued.
    ///
    /// # Panics
    ///
    /// Panics when called after the session has completed.
    pub async fn enqueue(&self, ciphertext: impl Into<String>, target: &Secret) -> Result<()> {
        assert!(
            !self.inner.closed.load(Ordering::SeqCst),
            "batch decrypter must not be used after completion"
        );
        let mut item = QueuedDecryption {
            target: target.clone(),
            ciphertext: ciphertext.into(),
        };
        loop {
            match self.inner.queue.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(rejected)) => {
                    self.send_next_batch().await?;
                    item = rejected;
                }
                Err(TrySendError::Closed(_)) => {
                    unreachable!("queue receiver lives as long as the batcher")
                }
            }
        }
    }

    /// Drain up to `max_batch_size` pending decryptions through the backend
    /// (or the cache, when every popped ciphertext hits) and assign the
    /// deserialized values.
    async fn send_next_batch(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.queue.capacity() == inner.queue.max_capacity() {
            return Ok(());
        }
        let mut receiver = inner.drain.lock().await;

        let mut dequeued = Vec::new();
        let mut ciphertexts = Vec::new();
        while dequeued.len() < inner.max_batch_size {
            let Ok(item) = receiver.try_recv() else { break };
            ciphertexts.push(item.ciphertext.clone());
            dequeued.push(item);
        }
        if dequeued.is_empty() {
            return Ok(());
        }

        // Ciphertexts are globally unique under a backend key, so identity
        // is not part of the lookup here.
        let mut plaintexts = Vec::with_capacity(dequeued.len());
        for item in &dequeued {
            match inner.cache.lookup_plaintext(&item.ciphertext) {
                Some(plaintext) => plaintexts.push(plaintext),
                None => {
                    plaintexts.clear();
                    break;
                }
            }
        }
        if plaintexts.len() == dequeued.len() {
            tracing::debug!(
                batch = dequeued.len(),
                "decryption batch served entirely from cache"
            );
        } else {
            plaintexts = inner.decrypter.batch_decrypt(&ciphertexts).await?;
            // Assigning from a short result would leave the remaining
            // targets silently unassigned forever.
            if plaintexts.len() != dequeued.len() {
                return Err(Error::Backend(format!(
                    "decrypter returned {} plaintexts for {} ciphertexts",
                    plaintexts.len(),
                    dequeued.len()
                )));
            }
        }
        for (item, plaintext) in dequeued.iter().zip(&plaintexts) {
            let value = (inner.deserialize)(plaintext)?;
            item.target.set_element(value);
            inner.cache.write(plaintext, &item.ciphertext, &item.target);
        }
        Ok(())
    }
}

#[async_trait]
impl Decrypter for BatchDecrypter {
    /// Direct passthrough to the backend, bypassing the queue and the cache.
    async fn decrypt_value(&self, ciphertext: &str) -> Result<String> {
        self.inner.decrypter.decrypt_value(ciphertext).await
    }

    /// Direct passthrough to the backend, bypassing the queue and the cache.
    async fn batch_decrypt(&self, ciphertexts: &[String]) -> Result<Vec<String>> {
        self.inner.decrypter.batch_decrypt(ciphertexts).await
    }
}

impl DecryptionBatch {
    /// Flush every enqueued decryption and close the session.
    ///
    /// Consuming `self` makes completion one-shot. On error the session is
    /// aborted: items popped for the failing drain are lost and the whole
    /// deserialization must be treated as failed.
    pub async fn complete(self) -> Result<()> {
        let inner = &self.batcher.inner;
        let was_closed = inner.closed.swap(true, Ordering::SeqCst);
        assert!(!was_closed, "batch decrypter already completed");
        while inner.queue.capacity() != inner.queue.max_capacity() {
            self.batcher.send_next_batch().await?;
        }
        Ok(())
    }
}
