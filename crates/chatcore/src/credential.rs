use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decrypted credential fields, keyed by input name.
pub type CredentialData = HashMap<String, serde_json::Value>;

/// Stored credential. `encrypted_data` is opaque to everything but the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub id: String,
    pub name: String,
    /// Registered credential type, e.g. `openAIApi`
    pub credential_name: String,
    pub encrypted_data: String,
    #[serde(default = "Utc::now")]
    pub created_date: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_date: DateTime<Utc>,
}
