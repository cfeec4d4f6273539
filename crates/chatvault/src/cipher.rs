use crate::redact::{redact_password_fields, CredentialSchema};
use crate::{CredentialData, VaultConfig, VaultError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::{rng, RngCore};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{info, warn};

const NONCE_LEN: usize = 12;

/// Symmetric encryption of stored credentials.
///
/// The key is loaded once per vault: from `CHATFLOW_SECRETKEY_OVERWRITE` when
/// set, otherwise from the key file, which is created with a fresh random key
/// the first time it is needed.
pub struct CredentialVault {
    config: VaultConfig,
    key: OnceCell<String>,
}

impl CredentialVault {
    pub fn new(config: VaultConfig) -> Self {
        Self {
            config,
            key: OnceCell::new(),
        }
    }

    /// Vault with a fixed key; never touches the filesystem.
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            config: VaultConfig::default(),
            key: OnceCell::from(key.into()),
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub async fn encryption_key(&self) -> Result<&str, VaultError> {
        let key = self.key.get_or_try_init(|| self.load_key()).await?;
        Ok(key.as_str())
    }

    async fn load_key(&self) -> Result<String, VaultError> {
        if let Some(key) = &self.config.secret_key_overwrite {
            return Ok(key.clone());
        }

        let path = self.config.encryption_key_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(key) => Ok(key.trim_end().to_string()),
            Err(e) => {
                info!("No readable encryption key at {} ({}), generating one", path.display(), e);
                let key = generate_encrypt_key();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, &key).await?;
                Ok(key)
            }
        }
    }

    /// Serialize and encrypt credential fields into a storable blob.
    pub async fn encrypt(&self, data: &CredentialData) -> Result<String, VaultError> {
        let key = self.encryption_key().await?;
        let plaintext = serde_json::to_vec(data)?;
        seal(key, &plaintext)
    }

    /// Decrypt a blob back into credential fields.
    ///
    /// Any failure (wrong key, corrupted blob, bad JSON) yields an empty map;
    /// callers must read empty as "unavailable".
    pub async fn decrypt(&self, blob: &str) -> CredentialData {
        let key = match self.encryption_key().await {
            Ok(key) => key,
            Err(e) => {
                warn!("Encryption key unavailable: {}", e);
                return CredentialData::new();
            }
        };

        match open(key, blob)
            .and_then(|bytes| serde_json::from_slice::<CredentialData>(&bytes).map_err(VaultError::from))
        {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to decrypt credential data: {}", e);
                CredentialData::new()
            }
        }
    }

    /// Decrypt and blank out every password-typed field of the schema.
    pub async fn decrypt_redacted(&self, blob: &str, schema: &CredentialSchema) -> CredentialData {
        let data = self.decrypt(blob).await;
        redact_password_fields(schema, &data)
    }
}

/// Random key material for a new key file
pub fn generate_encrypt_key() -> String {
    let mut bytes = [0u8; 24];
    rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

fn cipher_for(key: &str) -> Result<Aes256Gcm, VaultError> {
    let digest: [u8; 32] = Sha256::digest(key.as_bytes()).into();
    Aes256Gcm::new_from_slice(&digest).map_err(|e| VaultError::Encryption(e.to_string()))
}

/// Blob layout: base64(nonce || ciphertext)
fn seal(key: &str, plaintext: &[u8]) -> Result<String, VaultError> {
    let cipher = cipher_for(key)?;
    let mut nonce = [0u8; NONCE_LEN];
    rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let mut blob = nonce.to_vec();
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

fn open(key: &str, blob: &str) -> Result<Vec<u8>, VaultError> {
    let raw = BASE64
        .decode(blob.trim())
        .map_err(|e| VaultError::Encryption(e.to_string()))?;
    if raw.len() <= NONCE_LEN {
        return Err(VaultError::Encryption("blob too short".to_string()));
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
    cipher_for(key)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| VaultError::Encryption(e.to_string()))
}
