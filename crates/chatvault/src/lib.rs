//! Credential vault
//!
//! Encryption of stored credentials, redaction of password fields before
//! they leave the server, and hashing plus storage of API keys.

mod api_key;
mod cipher;
mod config;
mod error;
mod redact;

pub use api_key::{compare_keys, generate_api_key, generate_secret_hash, ApiKeyRecord, ApiKeyStore};
pub use cipher::{generate_encrypt_key, CredentialVault};
pub use config::{VaultConfig, API_KEY_FILE, ENCRYPTION_KEY_FILE};
pub use error::VaultError;
pub use redact::{redact_password_fields, CredentialInput, CredentialSchema, REDACTED_CREDENTIAL_VALUE};

/// Decrypted credential fields, keyed by input name.
pub type CredentialData = std::collections::HashMap<String, serde_json::Value>;
