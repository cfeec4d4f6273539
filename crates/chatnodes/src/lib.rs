//! Standard node library
//!
//! A handful of built-in nodes and credential types, enough to assemble and
//! run simple chatflows without external services.

mod chain;
mod credentials;
mod prompt;
mod splitter;

pub use chain::{TextChain, TextChainNode};
pub use credentials::openai_api_credential;
pub use prompt::{PromptTemplate, PromptTemplateNode, PromptTemplateNodeV2};
pub use splitter::{split_text, TextSplitterNode};
use chatruntime::PluginRegistry;

use std::sync::Arc;

/// Register all standard nodes and credential types with a registry
pub fn register_all(registry: &mut PluginRegistry) {
    registry.register(Arc::new(PromptTemplateNode));
    registry.register(Arc::new(PromptTemplateNodeV2));
    registry.register(Arc::new(TextSplitterNode));
    registry.register(Arc::new(TextChainNode));
    registry.register_credential(openai_api_credential());
}
