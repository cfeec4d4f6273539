//! Core abstractions for the chatflow engine
//!
//! Data model for flows and nodes, the value/instance model, the plugin
//! traits nodes implement and the errors shared by every other crate.

mod cache;
mod credential;
mod error;
pub mod events;
mod flow;
mod node;
mod value;

pub use cache::CachePool;
pub use credential::{CredentialData, CredentialRecord};
pub use error::{ChatflowError, FlowError, NodeError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, ExecutionId, NodeEvent};
pub use flow::{
    ChatMessage, ChatflowId, FlowData, FlowEdge, FlowNode, IncomingInput, InputParam, MessageType,
    NodeData, NodeId, Position, Viewport, DEFAULT_VERSION,
};
pub use node::{
    default_database_entities, DataSource, NodeContext, NodeDescriptor, NodeImplementation,
    RunOptions,
};
pub use value::{Opaque, Value};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
