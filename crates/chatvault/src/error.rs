use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key derivation failed: {0}")]
    Hash(String),

    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),
}
