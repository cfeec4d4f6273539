use std::path::PathBuf;

pub const ENCRYPTION_KEY_FILE: &str = "encryption.key";
pub const API_KEY_FILE: &str = "api.json";

/// Where the vault keeps its files
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Directory holding `encryption.key`
    pub secret_key_dir: PathBuf,
    /// Replaces the key file entirely when set and non-empty
    pub secret_key_overwrite: Option<String>,
    /// Directory holding `api.json`
    pub api_key_dir: PathBuf,
}

impl VaultConfig {
    /// Read `SECRETKEY_PATH`, `CHATFLOW_SECRETKEY_OVERWRITE` and `APIKEY_PATH`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            secret_key_dir: std::env::var("SECRETKEY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.secret_key_dir),
            secret_key_overwrite: std::env::var("CHATFLOW_SECRETKEY_OVERWRITE")
                .ok()
                .filter(|v| !v.is_empty()),
            api_key_dir: std::env::var("APIKEY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.api_key_dir),
        }
    }

    pub fn encryption_key_path(&self) -> PathBuf {
        self.secret_key_dir.join(ENCRYPTION_KEY_FILE)
    }

    pub fn api_key_path(&self) -> PathBuf {
        self.api_key_dir.join(API_KEY_FILE)
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            secret_key_dir: PathBuf::from("."),
            secret_key_overwrite: None,
            api_key_dir: PathBuf::from("."),
        }
    }
}
