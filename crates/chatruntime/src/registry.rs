use chatcore::{ChatflowError, NodeDescriptor, NodeImplementation};
use chatvault::CredentialSchema;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Categories that are never registered as executable nodes
const SKIP_CATEGORIES: &[&str] = &["Analytic"];

/// Registry of available node types and credential schemas.
///
/// Populated once at startup and shared read-only afterwards. Every version
/// of a node type stays addressable; `latest` picks the highest one.
pub struct PluginRegistry {
    nodes: HashMap<String, BTreeMap<u32, Arc<dyn NodeImplementation>>>,
    credentials: HashMap<String, CredentialSchema>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            credentials: HashMap::new(),
        }
    }

    /// Register a node implementation under its descriptor's name and version
    pub fn register(&mut self, implementation: Arc<dyn NodeImplementation>) {
        let descriptor = implementation.descriptor();
        if SKIP_CATEGORIES.contains(&descriptor.category.as_str()) {
            tracing::debug!("Skipping {} node: {}", descriptor.category, descriptor.name);
            return;
        }

        tracing::info!("Registering node type: {} v{}", descriptor.name, descriptor.version);
        self.nodes
            .entry(descriptor.name)
            .or_default()
            .insert(descriptor.version, implementation);
    }

    pub fn register_credential(&mut self, schema: CredentialSchema) {
        tracing::info!("Registering credential type: {}", schema.name);
        self.credentials.insert(schema.name.clone(), schema);
    }

    /// Look up the implementation for an exact type and version
    pub fn resolve(
        &self,
        name: &str,
        version: u32,
    ) -> Result<Arc<dyn NodeImplementation>, ChatflowError> {
        self.nodes
            .get(name)
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or_else(|| ChatflowError::UnknownNodeType {
                name: name.to_string(),
                version,
            })
    }

    /// Highest registered version of a node type
    pub fn latest(&self, name: &str) -> Option<Arc<dyn NodeImplementation>> {
        self.nodes
            .get(name)
            .and_then(|versions| versions.values().next_back())
            .cloned()
    }

    pub fn versions(&self, name: &str) -> Vec<u32> {
        self.nodes
            .get(name)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptor of the latest version of a node type
    pub fn get_metadata(&self, name: &str) -> Option<NodeDescriptor> {
        self.latest(name).map(|n| n.descriptor())
    }

    pub fn credential_schema(&self, name: &str) -> Option<&CredentialSchema> {
        self.credentials.get(name)
    }

    pub fn list_credentials(&self) -> Vec<&CredentialSchema> {
        let mut schemas: Vec<_> = self.credentials.values().collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
