use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Invalid chatflow: {0}")]
    Chatflow(#[from] ChatflowError),

    /// A node implementation failed while being instantiated. The message is
    /// carried verbatim so callers see exactly what the plugin reported.
    #[error("{message}")]
    Instantiation { node_id: String, message: String },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Node initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Node {0} cannot be run as an ending node")]
    NotRunnable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatflowError {
    #[error("Chatflow not found: {0}")]
    NotFound(String),

    #[error("Ending node must be either a Chain or Agent")]
    NoEndingNode,

    #[error("Output of {label} ({node_id}) must be {label}, can't be an Output Prediction")]
    InvalidEndingOutput { label: String, node_id: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unknown node type: {name} (version {version})")]
    UnknownNodeType { name: String, version: u32 },
}

impl FlowError {
    /// True for failures caused by the shape of the flow rather than by a node.
    pub fn is_invalid_flow(&self) -> bool {
        matches!(self, FlowError::Chatflow(_))
    }
}
