use crate::backend::{cloud, passphrase, service};
use crate::crypter::SecretsManager;
use crate::errors::{Error, Result};
use crate::manager::BatchingCachingManager;
use std::sync::Arc;

/// Constructs a secrets manager from a persisted `(type, state)` descriptor.
///
/// The descriptor is written into each checkpoint by the serializer; a
/// provider turns it back into a live manager when the checkpoint is read.
pub trait SecretsProvider {
    /// Resolve `kind` to a backend manager built from `state`, wrapped with
    /// the batching-caching layer.
    fn of_type(&self, kind: &str, state: serde_json::Value) -> Result<BatchingCachingManager>;
}

/// Registry over the closed set of known backend types.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSecretsProvider;

impl SecretsProvider for DefaultSecretsProvider {
    fn of_type(&self, kind: &str, state: serde_json::Value) -> Result<BatchingCachingManager> {
        let manager: Arc<dyn SecretsManager> = match kind {
            passphrase::TYPE => Arc::new(
                passphrase::PassphraseSecretsManager::from_state(state)
                    .map_err(construction(kind))?,
            ),
            service::TYPE => Arc::new(
                service::ServiceSecretsManager::from_state(state).map_err(construction(kind))?,
            ),
            cloud::TYPE => Arc::new(
                cloud::CloudSecretsManager::from_state(state).map_err(construction(kind))?,
            ),
            other => return Err(Error::UnknownProvider(other.to_string())),
        };
        tracing::debug!(kind, "resolved secrets manager");
        Ok(BatchingCachingManager::new(manager))
    }
}

/// Registry that knows the stack it serves.
///
/// Identical to [`DefaultSecretsProvider`] except that the passphrase
/// backend is constructed through its stack-aware path, so passphrase
/// diagnostics name the stack being operated on.
#[derive(Clone, Debug)]
pub struct NamedStackSecretsProvider {
    pub stack_name: String,
}

impl SecretsProvider for NamedStackSecretsProvider {
    fn of_type(&self, kind: &str, state: serde_json::Value) -> Result<BatchingCachingManager> {
        let manager: Arc<dyn SecretsManager> = match kind {
            passphrase::TYPE => Arc::new(
                passphrase::PassphraseSecretsManager::from_state_for_stack(
                    state,
                    &self.stack_name,
                )
                .map_err(construction(kind))?,
            ),
            service::TYPE => Arc::new(
                service::ServiceSecretsManager::from_state(state).map_err(construction(kind))?,
            ),
            cloud::TYPE => Arc::new(
                cloud::CloudSecretsManager::from_state(state).map_err(construction(kind))?,
            ),
            other => return Err(Error::UnknownProvider(other.to_string())),
        };
        tracing::debug!(kind, stack = %self.stack_name, "resolved secrets manager");
        Ok(BatchingCachingManager::new(manager))
    }
}

fn construction(kind: &str) -> impl FnOnce(Error) -> Error + '_ {
    move |source| Error::Construction {
        kind: kind.to_string(),
        source: Box::new(source),
    }
}
