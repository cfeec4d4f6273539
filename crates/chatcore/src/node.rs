use crate::events::EventEmitter;
use crate::{CachePool, ChatMessage, CredentialData, CredentialRecord, NodeData, NodeError, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Core trait that every node type implements.
///
/// `init` runs once per build and produces the node's instance; `run` is only
/// called on the ending node of a flow, with the fully resolved data.
#[async_trait]
pub trait NodeImplementation: Send + Sync {
    /// Static description used for registration and dispatch
    fn descriptor(&self) -> NodeDescriptor;

    async fn init(
        &self,
        data: &NodeData,
        question: &str,
        ctx: &NodeContext,
    ) -> Result<Value, NodeError>;

    async fn run(
        &self,
        data: &NodeData,
        _question: &str,
        _options: &RunOptions,
    ) -> Result<Value, NodeError> {
        Err(NodeError::NotRunnable(data.name.clone()))
    }
}

/// Registration metadata for a node type
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub name: String,
    pub version: u32,
    pub label: String,
    pub category: String,
    pub description: String,
    /// Credential types this node can read
    pub credential_names: Vec<String>,
}

impl NodeDescriptor {
    pub fn new(name: impl Into<String>, version: u32, category: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            version,
            category: category.into(),
            description: String::new(),
            credential_names: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_credential(mut self, credential_name: impl Into<String>) -> Self {
        self.credential_names.push(credential_name.into());
        self
    }
}

/// Persistence collaborator exposed to nodes.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn credential(&self, id: &str) -> Option<CredentialRecord>;

    /// Decrypted fields of a credential. Unavailable credentials come back empty.
    async fn credential_data(&self, id: &str) -> CredentialData;
}

/// Shared collaborators passed to every node instantiation
#[derive(Clone)]
pub struct NodeContext {
    pub chatflow_id: String,
    pub node_id: String,
    pub data_source: Option<Arc<dyn DataSource>>,
    /// Read-only entity name mapping, e.g. `ChatMessage -> chat_message`
    pub database_entities: Arc<HashMap<String, String>>,
    pub cache_pool: CachePool,
    pub events: EventEmitter,
}

impl NodeContext {
    /// Fetch the decrypted credential referenced by a node, failing if the
    /// node names none.
    pub async fn require_credential(&self, data: &NodeData) -> Result<CredentialData, NodeError> {
        let id = data
            .credential
            .as_deref()
            .ok_or_else(|| NodeError::Configuration(format!("{} has no credential", data.id)))?;
        let source = self
            .data_source
            .as_ref()
            .ok_or_else(|| NodeError::Configuration("No data source available".to_string()))?;
        Ok(source.credential_data(id).await)
    }
}

/// Options for the final `run` of an ending node
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub chatflow_id: String,
    pub chat_history: Vec<ChatMessage>,
}

/// Default entity mapping handed to nodes
pub fn default_database_entities() -> HashMap<String, String> {
    HashMap::from([
        ("ChatMessage".to_string(), "chat_message".to_string()),
        ("Credential".to_string(), "credential".to_string()),
    ])
}
