use crate::types::{Secret, SecretId};
use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

/// Environment toggle that disables secret caching process-wide.
///
/// Setting it to `"true"` selects the null cache at construction time; any
/// other value (or absence) selects the memoizing cache.
pub const DISABLE_SECRET_CACHE_ENV: &str = "DISABLE_SECRET_CACHE";

#[derive(Clone, Debug)]
struct CacheEntry {
    plaintext: String,
    ciphertext: String,
    // Pins the handle's allocation so its address cannot be reused for a
    // different secret while this entry is alive.
    #[allow(dead_code)]
    secret: Secret,
}

/// Bidirectional cache between `ciphertext` and `(plaintext, secret identity)`.
///
/// The same plaintext can be associated with multiple secrets, each of which
/// gets its own ciphertext. Entries live for the lifetime of the cache; there
/// is no TTL or eviction. All operations are safe under arbitrary concurrent
/// access.
///
/// ```
/// use checkpoint_secrets::{Secret, SecretCache};
///
/// let cache = SecretCache::memory();
/// let secret = Secret::new();
/// cache.write("plaintext", "ciphertext", &secret);
/// assert_eq!(cache.lookup_plaintext("ciphertext").as_deref(), Some("plaintext"));
/// assert_eq!(cache.lookup_ciphertext(&secret, "plaintext").as_deref(), Some("ciphertext"));
/// ```
#[derive(Debug)]
pub struct SecretCache {
    inner: CacheInner,
}

#[derive(Debug)]
enum CacheInner {
    Memory {
        by_secret: RwLock<HashMap<SecretId, CacheEntry>>,
        by_ciphertext: RwLock<HashMap<String, CacheEntry>>,
    },
    Null,
}

impl SecretCache {
    /// Memoizing cache, unless [`DISABLE_SECRET_CACHE_ENV`] selects the null
    /// cache. The selection happens once, here.
    pub fn from_env() -> Self {
        let disabled = env::var(DISABLE_SECRET_CACHE_ENV)
            .map(|value| value == "true")
            .unwrap_or(false);
        if disabled { Self::null() } else { Self::memory() }
    }

    /// Cache that memoizes every write.
    pub fn memory() -> Self {
        Self {
            inner: CacheInner::Memory {
                by_secret: RwLock::new(HashMap::new()),
                by_ciphertext: RwLock::new(HashMap::new()),
            },
        }
    }

    /// Cache whose writes are dropped and whose lookups always miss.
    pub fn null() -> Self {
        Self {
            inner: CacheInner::Null,
        }
    }

    /// Store the plaintext, ciphertext, and secret, overwriting any previous
    /// entry for the same secret or ciphertext.
    ///
    /// The two indexes are updated under separate locks; a concurrent reader
    /// may briefly observe one updated before the other, which it treats as
    /// an ordinary miss.
    pub fn write(&self, plaintext: &str, ciphertext: &str, secret: &Secret) {
        let CacheInner::Memory {
            by_secret,
            by_ciphertext,
        } = &self.inner
        else {
            return;
        };
        let entry = CacheEntry {
            plaintext: plaintext.to_string(),
            ciphertext: ciphertext.to_string(),
            secret: secret.clone(),
        };
        by_secret
            .write()
            .expect("secret cache lock poisoned")
            .insert(secret.id(), entry.clone());
        by_ciphertext
            .write()
            .expect("secret cache lock poisoned")
            .insert(ciphertext.to_string(), entry);
    }

    /// The cached ciphertext for `secret`, but only when the entry's stored
    /// plaintext still equals `plaintext`.
    ///
    /// The plaintext comparison is what makes writes safe under rotation: an
    /// edited secret simply misses instead of serving its stale ciphertext.
    pub fn lookup_ciphertext(&self, secret: &Secret, plaintext: &str) -> Option<String> {
        let CacheInner::Memory { by_secret, .. } = &self.inner else {
            return None;
        };
        let map = by_secret.read().expect("secret cache lock poisoned");
        let entry = map.get(&secret.id())?;
        if entry.plaintext != plaintext {
            return None;
        }
        Some(entry.ciphertext.clone())
    }

    /// The cached plaintext for `ciphertext`, if any.
    pub fn lookup_plaintext(&self, ciphertext: &str) -> Option<String> {
        let CacheInner::Memory { by_ciphertext, .. } = &self.inner else {
            return None;
        };
        let map = by_ciphertext.read().expect("secret cache lock poisoned");
        Some(map.get(ciphertext)?.plaintext.clone())
    }
}

impl Default for SecretCache {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_lookup_round_trips() {
        let cache = SecretCache::memory();
        let secret = Secret::new();

        cache.write("plain", "cipher", &secret);
        assert_eq!(
            cache.lookup_ciphertext(&secret, "plain").as_deref(),
            Some("cipher")
        );
        assert_eq!(cache.lookup_plaintext("cipher").as_deref(), Some("plain"));
    }

    #[test]
    fn changed_plaintext_misses() {
        let cache = SecretCache::memory();
        let secret = Secret::new();

        cache.write("plain", "cipher", &secret);
        assert_eq!(cache.lookup_ciphertext(&secret, "edited"), None);
    }

    #[test]
    fn rewrite_shadows_previous_plaintext() {
        let cache = SecretCache::memory();
        let secret = Secret::new();

        cache.write("first", "cipher-1", &secret);
        cache.write("second", "cipher-2", &secret);
        assert_eq!(cache.lookup_ciphertext(&secret, "first"), None);
        assert_eq!(
            cache.lookup_ciphertext(&secret, "second").as_deref(),
            Some("cipher-2")
        );
    }

    #[test]
    fn same_plaintext_distinct_secrets_are_distinct_entries() {
        let cache = SecretCache::memory();
        let first = Secret::new();
        let second = Secret::new();

        cache.write("shared", "cipher-a", &first);
        cache.write("shared", "cipher-b", &second);
        assert_eq!(
            cache.lookup_ciphertext(&first, "shared").as_deref(),
            Some("cipher-a")
        );
        assert_eq!(
            cache.lookup_ciphertext(&second, "shared").as_deref(),
            Some("cipher-b")
        );
    }

    #[test]
    fn null_cache_always_misses() {
        let cache = SecretCache::null();
        let secret = Secret::new();

        cache.write("plain", "cipher", &secret);
        assert_eq!(cache.lookup_ciphertext(&secret, "plain"), None);
        assert_eq!(cache.lookup_plaintext("cipher"), None);
    }

    #[test]
    fn disable_toggle_selects_null_cache() {
        let previous = env::var(DISABLE_SECRET_CACHE_ENV).ok();
        unsafe {
            env::set_var(DISABLE_SECRET_CACHE_ENV, "true");
        }
        let cache = SecretCache::from_env();
        match previous {
            Some(value) => unsafe { env::set_var(DISABLE_SECRET_CACHE_ENV, value) },
            None => unsafe { env::remove_var(DISABLE_SECRET_CACHE_ENV) },
        }

        let secret = Secret::new();
        cache.write("plain", "cipher", &secret);
        assert_eq!(cache.lookup_plaintext("cipher"), None);
    }
}
