//! Hosted service secrets manager.
//!
//! The encryption key never leaves the service; every crypter call is an
//! HTTP round-trip against the stack's encrypt/decrypt endpoints, which is
//! exactly the per-call overhead the batchers exist to amortize.

use crate::crypter::{Decrypter, Encrypter, SecretsManager};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Type tag persisted for service-managed checkpoints.
pub const TYPE: &str = "service";

/// Environment variable supplying the bearer token sent with each request.
pub const ACCESS_TOKEN_ENV: &str = "CHECKPOINT_ACCESS_TOKEN";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Persisted descriptor of the service endpoint that owns a stack's key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceState {
    pub url: String,
    pub owner: String,
    pub project: String,
    pub stack: String,
}

/// Secrets manager that delegates all cryptography to the hosted service
/// owning the stack's key.
pub struct ServiceSecretsManager {
    state: ServiceState,
    client: Arc<ServiceClient>,
}

impl std::fmt::Debug for ServiceSecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSecretsManager")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ServiceSecretsManager {
    /// Build a manager for the given service descriptor. The bearer token,
    /// if any, is read from [`ACCESS_TOKEN_ENV`] once, here.
    pub fn new(state: ServiceState) -> Result<Self> {
        let client = Arc::new(ServiceClient::new(&state)?);
        Ok(Self { state, client })
    }

    /// Reconstruct a manager from persisted state.
    pub fn from_state(state: serde_json::Value) -> Result<Self> {
        let state: ServiceState =
            serde_json::from_value(state).map_err(|err| Error::InvalidState(err.to_string()))?;
        Self::new(state)
    }
}

impl SecretsManager for ServiceSecretsManager {
    fn kind(&self) -> &str {
        TYPE
    }

    fn state(&self) -> serde_json::Value {
        serde_json::json!({
            "url": self.state.url,
            "owner": self.state.owner,
            "project": self.state.project,
            "stack": self.state.stack,
        })
    }

    fn encrypter(&self) -> Arc<dyn Encrypter> {
        Arc::clone(&self.client) as Arc<dyn Encrypter>
    }

    fn decrypter(&self) -> Arc<dyn Decrypter> {
        Arc::clone(&self.client) as Arc<dyn Decrypter>
    }
}

struct ServiceClient {
    base_url: Url,
    client: reqwest::Client,
    token: Option<String>,
    owner: String,
    project: String,
    stack: String,
}

impl ServiceClient {
    fn new(state: &ServiceState) -> Result<Self> {
        let base_url = Url::parse(&state.url)
            .map_err(|err| Error::InvalidState(format!("service url: {err}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("checkpoint-secrets/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let token = env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|token| !token.trim().is_empty());
        Ok(Self {
            base_url,
            client,
            token,
            owner: state.owner.clone(),
            project: state.project.clone(),
            stack: state.stack.clone(),
        })
    }

    async fn post<B, R>(&self, action: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let path = format!(
            "/api/stacks/{}/{}/{}/{action}",
            self.owner, self.project, self.stack
        );
        let url = self
            .base_url
            .join(&path)
            .map_err(|err| Error::InvalidState(format!("service url: {err}")))?;
        let mut builder = self.client.post(url).timeout(REQUEST_TIMEOUT).json(body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?.error_for_status()?;
        Ok(response.json::<R>().await?)
    }
}

#[derive(Serialize)]
struct EncryptRequest {
    plaintext: String,
}

#[derive(Deserialize)]
struct EncryptResponse {
    ciphertext: String,
}

#[derive(Serialize)]
struct BatchEncryptRequest {
    plaintexts: Vec<String>,
}

#[derive(Deserialize)]
struct BatchEncryptResponse {
    ciphertexts: Vec<String>,
}

#[derive(Serialize)]
struct DecryptRequest {
    ciphertext: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

#[derive(Serialize)]
struct BatchDecryptRequest {
    ciphertexts: Vec<String>,
}

#[derive(Deserialize)]
struct BatchDecryptResponse {
    plaintexts: Vec<String>,
}

#[async_trait]
impl Encrypter for ServiceClient {
    async fn encrypt_value(&self, plaintext: &str) -> Result<String> {
        let request = EncryptRequest {
            plaintext: STANDARD.encode(plaintext),
        };
        let response: EncryptResponse = self.post("encrypt", &request).await?;
        Ok(response.ciphertext)
    }

    async fn batch_encrypt(&self, plaintexts: &[String]) -> Result<Vec<String>> {
        let request = BatchEncryptRequest {
            plaintexts: plaintexts.iter().map(|p| STANDARD.encode(p)).collect(),
        };
        let response: BatchEncryptResponse = self.post("batch-encrypt", &request).await?;
        if response.ciphertexts.len() != plaintexts.len() {
            return Err(Error::Backend(format!(
                "service returned {} ciphertexts for {} plaintexts",
                response.ciphertexts.len(),
                plaintexts.len()
            )));
        }
        Ok(response.ciphertexts)
    }
}

#[async_trait]
impl Decrypter for ServiceClient {
    async fn decrypt_value(&self, ciphertext: &str) -> Result<String> {
        let request = DecryptRequest {
            ciphertext: ciphertext.to_string(),
        };
        let response: DecryptResponse = self.post("decrypt", &request).await?;
        decode_plaintext(&response.plaintext)
    }

    async fn batch_decrypt(&self, ciphertexts: &[String]) -> Result<Vec<String>> {
        let request = BatchDecryptRequest {
            ciphertexts: ciphertexts.to_vec(),
        };
        let response: BatchDecryptResponse = self.post("batch-decrypt", &request).await?;
        if response.plaintexts.len() != ciphertexts.len() {
            return Err(Error::Backend(format!(
                "service returned {} plaintexts for {} ciphertexts",
                response.plaintexts.len(),
                ciphertexts.len()
            )));
        }
        response
            .plaintexts
            .iter()
            .map(|plaintext| decode_plaintext(plaintext))
            .collect()
    }
}

fn decode_plaintext(encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| Error::Backend(format!("service plaintext: {err}")))?;
    String::from_utf8(bytes).map_err(|err| Error::Backend(format!("service plaintext: {err}")))
}
