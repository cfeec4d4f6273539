use crate::Value;
use dashmap::DashMap;
use std::sync::Arc;

/// Key/value store handed to node implementations for their own memoization.
///
/// The engine never reads it. Entries are namespaced by chatflow id; clones
/// share the same underlying map.
#[derive(Clone, Default)]
pub struct CachePool {
    entries: Arc<DashMap<(String, String), Value>>,
}

impl CachePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chatflow_id: &str, key: &str) -> Option<Value> {
        self.entries
            .get(&(chatflow_id.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn insert(&self, chatflow_id: &str, key: impl Into<String>, value: Value) {
        self.entries.insert((chatflow_id.to_string(), key.into()), value);
    }

    pub fn remove(&self, chatflow_id: &str, key: &str) -> Option<Value> {
        self.entries
            .remove(&(chatflow_id.to_string(), key.to_string()))
            .map(|(_, v)| v)
    }

    /// Drop everything cached for one chatflow.
    pub fn clear(&self, chatflow_id: &str) {
        self.entries.retain(|(flow, _), _| flow != chatflow_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_namespaced_per_chatflow() {
        let pool = CachePool::new();
        let shared = pool.clone();

        pool.insert("flow-a", "embeddings", Value::from("a"));
        shared.insert("flow-b", "embeddings", Value::from("b"));

        assert_eq!(pool.get("flow-b", "embeddings"), Some(Value::from("b")));
        pool.clear("flow-a");
        assert!(shared.get("flow-a", "embeddings").is_none());
        assert_eq!(pool.len(), 1);
    }
}
