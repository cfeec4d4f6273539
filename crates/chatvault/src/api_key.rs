use crate::VaultError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Local;
use rand::{rng, RngCore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::{info, warn};

const DEFAULT_KEY_NAME: &str = "DefaultKey";
const HASH_LEN: usize = 64;
// scrypt N = 2^14, r = 8, p = 1
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// One entry of the API key file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    pub key_name: String,
    pub api_key: String,
    /// `hex(scrypt(api_key, salt)).salt`
    pub api_secret: String,
    pub created_at: String,
    pub id: String,
}

impl ApiKeyRecord {
    fn generate(key_name: impl Into<String>) -> Result<Self, VaultError> {
        let api_key = generate_api_key();
        let api_secret = generate_secret_hash(&api_key)?;
        Ok(Self {
            key_name: key_name.into(),
            api_key,
            api_secret,
            created_at: Local::now().format("%d-%b-%y").to_string(),
            id: hex::encode(random_bytes::<16>()),
        })
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rng().fill_bytes(&mut bytes);
    bytes
}

/// New random API key (32 bytes, base64)
pub fn generate_api_key() -> String {
    BASE64.encode(random_bytes::<32>())
}

/// Salted scrypt hash of a key, stored as `hash.salt`.
pub fn generate_secret_hash(api_key: &str) -> Result<String, VaultError> {
    let salt = hex::encode(random_bytes::<8>());
    let hash = derive(api_key, &salt)?;
    Ok(format!("{}.{}", hex::encode(hash), salt))
}

/// Check a supplied key against a stored `hash.salt` string.
///
/// The digest comparison is constant time.
pub fn compare_keys(stored: &str, supplied: &str) -> bool {
    let Some((hashed, salt)) = stored.split_once('.') else {
        return false;
    };
    let Ok(expected) = hex::decode(hashed) else {
        return false;
    };
    match derive(supplied, salt) {
        Ok(actual) => expected.ct_eq(&actual).into(),
        Err(e) => {
            warn!("Failed to hash supplied key: {}", e);
            false
        }
    }
}

fn derive(key: &str, salt: &str) -> Result<[u8; HASH_LEN], VaultError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, HASH_LEN)
        .map_err(|e| VaultError::Hash(e.to_string()))?;
    let mut out = [0u8; HASH_LEN];
    scrypt::scrypt(key.as_bytes(), salt.as_bytes(), &params, &mut out)
        .map_err(|e| VaultError::Hash(e.to_string()))?;
    Ok(out)
}

/// API key list persisted as a single JSON file.
///
/// The file is read on every access and rewritten wholesale on every change.
/// A missing or unreadable file is replaced by a fresh list holding one
/// default key, so there is always at least one valid key.
pub struct ApiKeyStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ApiKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> Result<Vec<ApiKeyRecord>, VaultError> {
        let _guard = self.lock.lock().await;
        self.read_or_init().await
    }

    pub async fn add(&self, key_name: &str) -> Result<Vec<ApiKeyRecord>, VaultError> {
        let _guard = self.lock.lock().await;
        let mut keys = self.read_or_init().await?;
        keys.push(generate_record(key_name).await?);
        self.write(&keys).await?;
        info!("Added API key {}", key_name);
        Ok(keys)
    }

    pub async fn rename(&self, id: &str, key_name: &str) -> Result<Vec<ApiKeyRecord>, VaultError> {
        let _guard = self.lock.lock().await;
        let mut keys = self.read_or_init().await?;
        let record = keys
            .iter_mut()
            .find(|k| k.id == id)
            .ok_or_else(|| VaultError::ApiKeyNotFound(id.to_string()))?;
        record.key_name = key_name.to_string();
        self.write(&keys).await?;
        Ok(keys)
    }

    pub async fn delete(&self, id: &str) -> Result<Vec<ApiKeyRecord>, VaultError> {
        let _guard = self.lock.lock().await;
        let mut keys = self.read_or_init().await?;
        keys.retain(|k| k.id != id);
        self.write(&keys).await?;
        Ok(keys)
    }

    /// Overwrite the whole list, e.g. when restoring an export.
    pub async fn replace_all(&self, keys: &[ApiKeyRecord]) -> Result<(), VaultError> {
        let _guard = self.lock.lock().await;
        self.write(keys).await
    }

    /// True when `supplied` matches the secret of the key with `id`.
    pub async fn validate(&self, id: &str, supplied: &str) -> Result<bool, VaultError> {
        let keys = self.list().await?;
        let Some(stored) = keys.into_iter().find(|k| k.id == id).map(|k| k.api_secret) else {
            return Ok(false);
        };
        let supplied = supplied.to_string();
        tokio::task::spawn_blocking(move || compare_keys(&stored, &supplied))
            .await
            .map_err(|e| VaultError::Hash(e.to_string()))
    }

    async fn read_or_init(&self) -> Result<Vec<ApiKeyRecord>, VaultError> {
        let existing = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str::<Vec<ApiKeyRecord>>(&content).map_err(VaultError::from),
            Err(e) => Err(VaultError::from(e)),
        };

        match existing {
            Ok(keys) => Ok(keys),
            Err(e) => {
                warn!("API key file {} unusable ({}), writing a default key", self.path.display(), e);
                let keys = vec![generate_record(DEFAULT_KEY_NAME).await?];
                if let Err(e) = self.write(&keys).await {
                    warn!("Failed to persist default API key: {}", e);
                }
                Ok(keys)
            }
        }
    }

    async fn write(&self, keys: &[ApiKeyRecord]) -> Result<(), VaultError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string(keys)?).await?;
        Ok(())
    }
}

async fn generate_record(key_name: &str) -> Result<ApiKeyRecord, VaultError> {
    let key_name = key_name.to_string();
    tokio::task::spawn_blocking(move || ApiKeyRecord::generate(key_name))
        .await
        .map_err(|e| VaultError::Hash(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_only_the_original_key() {
        let key = generate_api_key();
        let stored = generate_secret_hash(&key).unwrap();

        assert!(compare_keys(&stored, &key));
        assert!(!compare_keys(&stored, "some-other-key"));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let key = "same-key";
        let first = generate_secret_hash(key).unwrap();
        let second = generate_secret_hash(key).unwrap();

        assert_ne!(first, second);
        assert!(compare_keys(&first, key));
        assert!(compare_keys(&second, key));
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        assert!(!compare_keys("no-salt-separator", "key"));
        assert!(!compare_keys("zz-not-hex.abcd", "key"));
        assert!(!compare_keys("abcd.salt", "key"));
    }
}
