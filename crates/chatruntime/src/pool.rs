use crate::resolver::is_start_node_depend_on_input;
use chatcore::{FlowNode, NodeData, Value};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Last successful build of a chatflow
#[derive(Debug, Clone)]
pub struct ChatflowPoolEntry {
    pub starting_nodes: Vec<FlowNode>,
    /// Fully resolved ending node data, instance included
    pub ending_node_data: NodeData,
    /// Cleared when the flow definition changes
    pub in_sync: bool,
    pub override_config: Option<HashMap<String, Value>>,
    /// Definition generation the build was started from
    pub generation: u64,
}

/// Process-wide cache of built chatflows, one entry per chatflow id.
///
/// Entries are replaced whole, so a reader sees either the old or the new
/// entry and never a mix. Two concurrent requests for the same flow may both
/// rebuild; the last one to finish wins.
///
/// Each chatflow id also carries a definition generation, bumped whenever
/// the definition is replaced or removed. A build started from an older
/// generation is never served, even if it finishes after the change.
#[derive(Default)]
pub struct ChatflowPool {
    active: DashMap<String, Arc<ChatflowPoolEntry>>,
    generations: DashMap<String, u64>,
}

impl ChatflowPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached entry, if it may be reused for a new question.
    ///
    /// Reuse is refused when the entry is stale, when the request overrides
    /// different inputs than the cached build, or when any starting node
    /// takes input variables, since its build depends on the question.
    pub fn try_reuse(
        &self,
        chatflow_id: &str,
        override_config: Option<&HashMap<String, Value>>,
    ) -> Option<Arc<ChatflowPoolEntry>> {
        let entry = self.get(chatflow_id)?;
        if !entry.in_sync || entry.generation != self.generation(chatflow_id) {
            tracing::debug!("Chatflow {} is out of sync, rebuilding", chatflow_id);
            return None;
        }
        if !same_override_config(entry.override_config.as_ref(), override_config) {
            tracing::debug!("Chatflow {} requested with new override config, rebuilding", chatflow_id);
            return None;
        }
        if is_start_node_depend_on_input(&entry.starting_nodes) {
            tracing::debug!("Chatflow {} starts from question dependent nodes, rebuilding", chatflow_id);
            return None;
        }
        Some(entry)
    }

    /// Current definition generation of a chatflow, 0 until it first changes
    pub fn generation(&self, chatflow_id: &str) -> u64 {
        self.generations.get(chatflow_id).map(|g| *g.value()).unwrap_or(0)
    }

    /// Store the result of a build, replacing any previous entry.
    ///
    /// `generation` is the value of [`Self::generation`] captured when the
    /// build started; a build of a superseded definition is stored stale.
    pub fn record(
        &self,
        chatflow_id: &str,
        ending_node_data: NodeData,
        starting_nodes: Vec<FlowNode>,
        override_config: Option<HashMap<String, Value>>,
        generation: u64,
    ) {
        let in_sync = generation == self.generation(chatflow_id);
        if !in_sync {
            tracing::warn!("Chatflow {} changed during build, storing result as stale", chatflow_id);
        }
        let entry = ChatflowPoolEntry {
            starting_nodes,
            ending_node_data,
            in_sync,
            override_config,
            generation,
        };
        self.active.insert(chatflow_id.to_string(), Arc::new(entry));
        tracing::debug!("Recorded chatflow {} in pool", chatflow_id);
    }

    pub fn get(&self, chatflow_id: &str) -> Option<Arc<ChatflowPoolEntry>> {
        self.active.get(chatflow_id).map(|e| Arc::clone(e.value()))
    }

    /// Flag an entry as stale so the next request rebuilds. Builds already
    /// running for the old definition will be recorded stale as well.
    pub fn mark_out_of_sync(&self, chatflow_id: &str) {
        self.bump_generation(chatflow_id);
        if let Some(mut entry) = self.active.get_mut(chatflow_id) {
            let mut updated = ChatflowPoolEntry::clone(entry.value());
            updated.in_sync = false;
            *entry = Arc::new(updated);
        }
    }

    pub fn remove(&self, chatflow_id: &str) -> Option<Arc<ChatflowPoolEntry>> {
        self.bump_generation(chatflow_id);
        self.active.remove(chatflow_id).map(|(_, e)| e)
    }

    fn bump_generation(&self, chatflow_id: &str) {
        *self.generations.entry(chatflow_id.to_string()).or_insert(0) += 1;
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Empty and absent override maps are equivalent.
fn same_override_config(
    existing: Option<&HashMap<String, Value>>,
    incoming: Option<&HashMap<String, Value>>,
) -> bool {
    let existing = existing.filter(|c| !c.is_empty());
    let incoming = incoming.filter(|c| !c.is_empty());
    existing == incoming
}
