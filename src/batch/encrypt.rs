use crate::cache::SecretCache;
use crate::crypter::Encrypter;
use crate::errors::{Error, Result};
use crate::types::{Secret, SerializedSecret};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default maximum number of encryptions drained in one backend batch. Also
/// the capacity of the enqueue queue.
pub const DEFAULT_MAX_BATCH_ENCRYPT_COUNT: usize = 1000;

struct QueuedEncryption {
    source: Secret,
    target: SerializedSecret,
    plaintext: String,
}

/// Accumulates encryption requests and flushes them to the backend in
/// bounded batches, memoizing results in a [`SecretCache`].
///
/// Obtained from [`begin_batch_encryption`]; clones share one queue and may
/// enqueue from any number of tasks. The batcher is one-shot: after its
/// [`EncryptionBatch`] completes, further enqueues panic.
#[derive(Clone)]
pub struct BatchEncrypter {
    inner: Arc<EncrypterInner>,
}

struct EncrypterInner {
    encrypter: Arc<dyn Encrypter>,
    cache: Arc<SecretCache>,
    queue: mpsc::Sender<QueuedEncryption>,
    // Owning the receiver is owning the sole right to pop the queue and call
    // the backend; at most one batch is in flight per batcher.
    drain: Mutex<mpsc::Receiver<QueuedEncryption>>,
    closed: AtomicBool,
    max_batch_size: usize,
}

/// One-shot completion handle for a [`BatchEncrypter`] session.
pub struct EncryptionBatch {
    batcher: BatchEncrypter,
}

/// Begin a batched encryption session against `encrypter`, memoizing results
/// in `cache`.
///
/// Returns the batcher and its completion handle. Drains run on whichever
/// producer observes a full queue, or on [`EncryptionBatch::complete`]; once
/// `complete` returns, every enqueued target has been assigned.
pub fn begin_batch_encryption(
    encrypter: Arc<dyn Encrypter>,
    cache: Arc<SecretCache>,
) -> (BatchEncrypter, EncryptionBatch) {
    begin_with_limit(encrypter, cache, DEFAULT_MAX_BATCH_ENCRYPT_COUNT)
}

fn begin_with_limit(
    encrypter: Arc<dyn Encrypter>,
    cache: Arc<SecretCache>,
    max_batch_size: usize,
) -> (BatchEncrypter, EncryptionBatch) {
    assert!(max_batch_size > 0, "max batch size must be greater than zero");
    let (queue, receiver) = mpsc::channel(max_batch_size);
    let batcher = BatchEncrypter {
        inner: Arc::new(EncrypterInner {
            encrypter,
            cache,
            queue,
            drain: Mutex::new(receiver),
            closed: AtomicBool::new(false),
            max_batch_size,
        }),
    };
    let complete = EncryptionBatch {
        batcher: batcher.clone(),
    };
    (batcher, complete)
}

impl BatchEncrypter {
    /// Enqueue `plaintext` for encryption under `source`'s identity.
    ///
    /// The resulting ciphertext is assigned to `target` no later than the
    /// return of [`EncryptionBatch::complete`]. A full queue never blocks
    /// this call: the calling task drives a drain itself (possibly
    /// performing the backend call on behalf of other producers) and then
    /// retries. An error from such a drain aborts the whole session; items
    /// already popped for the failed drain are not re-enqueued.
    ///
    /// # Panics
    ///
    /// Panics when called after the session has completed.
    pub async fn enqueue(
        &self,
        source: &Secret,
        plaintext: impl Into<String>,
        target: &SerializedSecret,
    ) -> Result<()> {
        assert!(
            !self.inner.closed.load(Ordering::SeqCst),
            "batch encrypter must not be used after completion"
        );
        let mut item = QueuedEncryption {
            source: source.clone(),
            target: target.clone(),
            plaintext: plaintext.into(),
        };
        loop {
            match self.inner.queue.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(rejected)) => {
                    // Make room ourselves; each drain frees at least one slot.
                    self.send_next_batch().await?;
                    item = rejected;
                }
                Err(TrySendError::Closed(_)) => {
                    unreachable!("queue receiver lives as long as the batcher")
                }
            }
        }
    }

    /// Drain up to `max_batch_size` pending encryptions through the backend
    /// (or the cache, when every popped item hits) and assign the results.
    async fn send_next_batch(&self) -> Result<()> {
        let inner = &self.inner;
        // Cheap empty check before contending on the drain lock.
        if inner.queue.capacity() == inner.queue.max_capacity() {
            return Ok(());
        }
        let mut receiver = inner.drain.lock().await;

        let mut dequeued = Vec::new();
        let mut plaintexts = Vec::new();
        while dequeued.len() < inner.max_batch_size {
            let Ok(item) = receiver.try_recv() else { break };
            plaintexts.push(item.plaintext.clone());
            dequeued.push(item);
        }
        // A racing drain may have emptied the queue before we got the lock.
        if dequeued.is_empty() {
            return Ok(());
        }

        let mut ciphertexts = Vec::with_capacity(dequeued.len());
        for item in &dequeued {
            match inner.cache.lookup_ciphertext(&item.source, &item.plaintext) {
                Some(ciphertext) => ciphertexts.push(ciphertext),
                None => {
                    ciphertexts.clear();
                    break;
                }
            }
        }
        if ciphertexts.len() == dequeued.len() {
            tracing::debug!(
                batch = dequeued.len(),
                "encryption batch served entirely from cache"
            );
        } else {
            // Any miss re-encrypts the whole batch rather than splitting it;
            // serialization workloads are entirely warm or entirely cold.
            ciphertexts = inner.encrypter.batch_encrypt(&plaintexts).await?;
            // Assigning from a short result would leave the remaining
            // targets silently unassigned forever.
            if ciphertexts.len() != dequeued.len() {
                return Err(Error::Backend(format!(
                    "encrypter returned {} ciphertexts for {} plaintexts",
                    ciphertexts.len(),
                    dequeued.len()
                )));
            }
        }
        for (item, ciphertext) in dequeued.iter().zip(&ciphertexts) {
            item.target.set_ciphertext(ciphertext.clone());
            inner.cache.write(&item.plaintext, ciphertext, &item.source);
        }
        Ok(())
    }
}

#[async_trait]
impl Encrypter for BatchEncrypter {
    /// Direct passthrough to the backend, bypassing the queue and the cache.
    async fn encrypt_value(&self, plaintext: &str) -> Result<String> {
        self.inner.encrypter.encrypt_value(plaintext).await
    }

    /// Direct passthrough to the backend, bypassing the queue and the cache.
    async fn batch_encrypt(&self, plaintexts: &[String]) -> Result<Vec<String>> {
        self.inner.encrypter.batch_encrypt(plaintexts).await
    }
}

impl EncryptionBatch {
    /// Flush every enqueued encryption and close the session.
    ///
    /// Consuming `self` makes completion one-shot. On error the session is
    /// aborted: items popped for the failing drain are lost and the whole
    /// serialization must be treated as failed.
    pub async fn complete(self) -> Result<()> {
        let inner = &self.batcher.inner;
        let was_closed = inner.closed.swap(true, Ordering::SeqCst);
        assert!(!was_closed, "batch encrypter already completed");
        // A producer racing the close may slip one more item in after a
        // drain; keep draining until the queue stays empty.
        while inner.queue.capacity() != inner.queue.max_capacity() {
            self.batcher.send_next_batch().await?;
        }
        Ok(())
    }
}
