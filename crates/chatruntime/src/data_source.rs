use async_trait::async_trait;
use chatcore::{CredentialData, CredentialRecord, DataSource};
use chatvault::{CredentialSchema, CredentialVault, VaultError};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Credential store kept in process memory.
///
/// Records hold encrypted blobs only; plaintext exists just for the duration
/// of a `credential_data` call.
pub struct InMemoryDataSource {
    credentials: DashMap<String, CredentialRecord>,
    vault: Arc<CredentialVault>,
}

impl InMemoryDataSource {
    pub fn new(vault: Arc<CredentialVault>) -> Self {
        Self {
            credentials: DashMap::new(),
            vault,
        }
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    /// Insert already encrypted records, e.g. the ones shipped with a flow file
    pub fn load_records(&self, records: impl IntoIterator<Item = CredentialRecord>) {
        for record in records {
            tracing::debug!("Loaded credential {} ({})", record.id, record.credential_name);
            self.credentials.insert(record.id.clone(), record);
        }
    }

    /// Encrypt and store a new credential, returning its record
    pub async fn create_credential(
        &self,
        name: &str,
        credential_name: &str,
        plain: &CredentialData,
    ) -> Result<CredentialRecord, VaultError> {
        let now = Utc::now();
        let record = CredentialRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            credential_name: credential_name.to_string(),
            encrypted_data: self.vault.encrypt(plain).await?,
            created_date: now,
            updated_date: now,
        };
        self.credentials.insert(record.id.clone(), record.clone());
        tracing::info!("Created credential {} ({})", record.name, record.id);
        Ok(record)
    }

    pub fn delete_credential(&self, id: &str) -> Option<CredentialRecord> {
        self.credentials.remove(id).map(|(_, record)| record)
    }

    pub fn list(&self) -> Vec<CredentialRecord> {
        let mut records: Vec<_> = self.credentials.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.created_date.cmp(&b.created_date).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Decrypted data with password fields replaced by the blank sentinel,
    /// safe to hand to a client.
    pub async fn credential_for_client(
        &self,
        id: &str,
        schema: &CredentialSchema,
    ) -> Option<CredentialData> {
        let record = self.credential(id).await?;
        Some(self.vault.decrypt_redacted(&record.encrypted_data, schema).await)
    }
}

#[async_trait]
impl DataSource for InMemoryDataSource {
    async fn credential(&self, id: &str) -> Option<CredentialRecord> {
        self.credentials.get(id).map(|r| r.value().clone())
    }

    async fn credential_data(&self, id: &str) -> CredentialData {
        match self.credential(id).await {
            Some(record) => self.vault.decrypt(&record.encrypted_data).await,
            None => {
                tracing::warn!("Credential {} not found", id);
                CredentialData::new()
            }
        }
    }
}
