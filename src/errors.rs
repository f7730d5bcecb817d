use thiserror::Error;

/// Result alias for secrets operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Canonical error surface for the batching and caching core.
///
/// Contract violations (use after completion, double completion) are not
/// represented here: they are programmer errors and panic instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The persisted descriptor names a provider this build does not know.
    #[error("no known secrets provider for type \"{0}\"")]
    UnknownProvider(String),
    /// A known provider failed to construct its manager from persisted state.
    #[error("constructing secrets manager of type \"{kind}\": {source}")]
    Construction {
        kind: String,
        #[source]
        source: Box<Error>,
    },
    /// No passphrase was available through the environment.
    #[error("passphrase for {scope} must be set with {passphrase_env} or {passphrase_file_env}",
        passphrase_env = crate::backend::passphrase::PASSPHRASE_ENV,
        passphrase_file_env = crate::backend::passphrase::PASSPHRASE_FILE_ENV)]
    MissingPassphrase { scope: String },
    /// The supplied passphrase failed state verification.
    #[error("incorrect passphrase")]
    IncorrectPassphrase,
    /// The passphrase file could not be read.
    #[error("reading passphrase file: {0}")]
    PassphraseFile(#[source] std::io::Error),
    /// Persisted manager state did not match the expected shape.
    #[error("invalid secrets state: {0}")]
    InvalidState(String),
    /// A cryptographic primitive failed.
    #[error("crypto error: {0}")]
    Crypto(String),
    /// The cloud state names a key keeper scheme this build does not support.
    #[error("no known key keeper for url scheme \"{0}\"")]
    UnsupportedKeeper(String),
    /// A request to the hosted secrets service failed.
    #[error("secrets service request failed: {0}")]
    Service(#[from] reqwest::Error),
    /// The backend returned a malformed or inconsistent response.
    #[error("backend error: {0}")]
    Backend(String),
    /// A decrypted plaintext could not be parsed into a property value.
    #[error("deserializing secret value: {0}")]
    Deserialize(#[source] serde_json::Error),
}
