use std::sync::{Arc, RwLock};

/// Decrypted form of a secret property value.
pub type PropertyValue = serde_json::Value;

/// Stable in-memory handle carrying one decrypted secret property value.
///
/// Identity is by handle, not by value: two distinct `Secret`s holding the
/// same plaintext are distinct cache keys. Clones share one identity, so a
/// handle can be passed between the serializer and the batchers cheaply.
#[derive(Clone, Debug, Default)]
pub struct Secret {
    inner: Arc<SecretInner>,
}

#[derive(Debug, Default)]
struct SecretInner {
    element: RwLock<Option<PropertyValue>>,
}

impl Secret {
    /// Create an unresolved secret handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle that already carries a decrypted value.
    pub fn with_element(element: PropertyValue) -> Self {
        let secret = Self::new();
        secret.set_element(element);
        secret
    }

    /// The decrypted property value, if this secret has been resolved.
    pub fn element(&self) -> Option<PropertyValue> {
        self.inner
            .element
            .read()
            .expect("secret element lock poisoned")
            .clone()
    }

    /// Store the decrypted property value on this handle.
    pub fn set_element(&self, element: PropertyValue) {
        *self
            .inner
            .element
            .write()
            .expect("secret element lock poisoned") = Some(element);
    }

    /// True when `other` is a clone of the same handle.
    pub fn same_identity(&self, other: &Secret) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn id(&self) -> SecretId {
        SecretId(Arc::as_ptr(&self.inner) as usize)
    }
}

/// Address-based identity of a [`Secret`] handle.
///
/// Only meaningful while some clone of the handle is alive; the cache retains
/// a clone in each entry so an id cannot be reused under it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SecretId(usize);

/// Wire shell for a secret inside a serialized deployment checkpoint.
///
/// The serializer produces the shell with an empty ciphertext and the batch
/// encrypter fills it in during a drain. Clones share the same underlying
/// field, so the producer's handle observes the assignment.
#[derive(Clone, Debug, Default)]
pub struct SerializedSecret {
    ciphertext: Arc<RwLock<String>>,
}

impl SerializedSecret {
    /// Create an empty shell awaiting encryption.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current ciphertext. Empty until an encryption drain has run.
    pub fn ciphertext(&self) -> String {
        self.ciphertext
            .read()
            .expect("serialized secret lock poisoned")
            .clone()
    }

    /// Assign the ciphertext for this shell.
    pub fn set_ciphertext(&self, ciphertext: String) {
        *self
            .ciphertext
            .write()
            .expect("serialized secret lock poisoned") = ciphertext;
    }
}
