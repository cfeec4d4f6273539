//! Chatflow build runtime
//!
//! Turns a stored flow into a set of instantiated nodes: graph analysis,
//! template resolution, level-order instantiation through the plugin
//! registry, and pooling of finished builds for reuse.

mod data_source;
mod executor;
mod graph;
mod pool;
mod registry;
mod resolver;
mod runtime;

pub use data_source::InMemoryDataSource;
pub use executor::{BuildScope, FlowExecutor, DEFAULT_MAX_LOOP};
pub use graph::{
    check_ending_output, construct_graphs, get_ending_node, get_starting_nodes, plan_flow,
    validate_flow, DependencyCounts, DepthQueue, FlowPlan, FlowSummary, NodeGraph,
};
pub use pool::{ChatflowPool, ChatflowPoolEntry};
pub use registry::PluginRegistry;
pub use resolver::{
    apply_overrides, find_available_configs, get_input_variables, get_variable_value,
    is_start_node_depend_on_input, resolve_variables, AvailableConfig, QUESTION_VAR_PREFIX,
};
pub use runtime::{BuildOutput, FlowRuntime, Prediction, RuntimeConfig};
