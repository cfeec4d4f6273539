use crate::executor::{BuildScope, FlowExecutor, DEFAULT_MAX_LOOP};
use crate::graph::plan_flow;
use crate::pool::ChatflowPool;
use crate::registry::PluginRegistry;
use crate::resolver::{apply_overrides, resolve_variables};
use chatcore::{
    CachePool, ChatflowError, ChatflowId, DataSource, EventBus, ExecutionEvent, ExecutionId,
    FlowData, FlowError, FlowNode, IncomingInput, NodeData, RunOptions, Value,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Main runtime for building and running chatflows
pub struct FlowRuntime {
    registry: Arc<PluginRegistry>,
    executor: FlowExecutor,
    event_bus: Arc<EventBus>,
    pool: Arc<ChatflowPool>,
    cache_pool: CachePool,
    chatflows: Arc<RwLock<HashMap<ChatflowId, FlowData>>>,
}

/// Result of preparing a chatflow for a request
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub execution_id: ExecutionId,
    /// Ending node data, fully resolved, instance included
    pub ending_node_data: NodeData,
    pub starting_nodes: Vec<FlowNode>,
    /// True when the pooled build was used and nothing was instantiated
    pub reused: bool,
}

/// Answer produced by the ending node
#[derive(Debug, Clone)]
pub struct Prediction {
    pub execution_id: ExecutionId,
    pub output: Value,
    pub reused: bool,
}

impl FlowRuntime {
    /// Create a new runtime with default settings and an empty registry
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(PluginRegistry::new()), config)
    }

    /// Create a new runtime around a populated registry
    pub fn with_registry(registry: Arc<PluginRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let cache_pool = CachePool::new();
        let executor = FlowExecutor::new(Arc::clone(&registry), Arc::clone(&event_bus))
            .with_cache_pool(cache_pool.clone())
            .with_max_loop(config.max_loop);

        Self {
            registry,
            executor,
            event_bus,
            pool: Arc::new(ChatflowPool::new()),
            cache_pool,
            chatflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Hand nodes a persistence collaborator for credential lookups
    pub fn with_data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
        self.executor = self.executor.with_data_source(data_source);
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<ChatflowPool> {
        &self.pool
    }

    pub fn cache_pool(&self) -> &CachePool {
        &self.cache_pool
    }

    /// Register or replace a chatflow definition. A pooled build of the
    /// previous definition is marked stale.
    pub async fn register_chatflow(&self, chatflow_id: impl Into<ChatflowId>, flow: FlowData) {
        let chatflow_id = chatflow_id.into();
        let mut chatflows = self.chatflows.write().await;
        self.pool.mark_out_of_sync(&chatflow_id);
        tracing::info!("Registered chatflow {} ({} nodes)", chatflow_id, flow.nodes.len());
        chatflows.insert(chatflow_id, flow);
    }

    pub async fn remove_chatflow(&self, chatflow_id: &str) -> Option<FlowData> {
        let mut chatflows = self.chatflows.write().await;
        let removed = chatflows.remove(chatflow_id);
        self.pool.remove(chatflow_id);
        drop(chatflows);
        self.cache_pool.clear(chatflow_id);
        removed
    }

    pub async fn get_chatflow(&self, chatflow_id: &str) -> Option<FlowData> {
        self.chatflows.read().await.get(chatflow_id).cloned()
    }

    pub async fn list_chatflows(&self) -> Vec<ChatflowId> {
        let mut ids: Vec<_> = self.chatflows.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Prepare a registered chatflow for a request, reusing the pooled build
    /// when it is safe to do so.
    pub async fn build_chatflow(
        &self,
        chatflow_id: &str,
        input: &IncomingInput,
    ) -> Result<BuildOutput, FlowError> {
        // Read under the same lock `register_chatflow` writes under, so the
        // generation always belongs to this definition.
        let (flow, generation) = {
            let chatflows = self.chatflows.read().await;
            let flow = chatflows
                .get(chatflow_id)
                .cloned()
                .ok_or_else(|| ChatflowError::NotFound(chatflow_id.to_string()))?;
            (flow, self.pool.generation(chatflow_id))
        };

        if let Some(entry) = self.pool.try_reuse(chatflow_id, input.override_config.as_ref()) {
            let execution_id = ExecutionId::new_v4();
            self.event_bus.emit(ExecutionEvent::BuildReused {
                execution_id,
                chatflow_id: chatflow_id.to_string(),
                timestamp: Utc::now(),
            });
            tracing::info!("Reusing pooled build of chatflow {}", chatflow_id);
            return Ok(BuildOutput {
                execution_id,
                ending_node_data: entry.ending_node_data.clone(),
                starting_nodes: entry.starting_nodes.clone(),
                reused: true,
            });
        }

        let output = self.build_flow(chatflow_id, &flow, input).await?;
        self.pool.record(
            chatflow_id,
            output.ending_node_data.clone(),
            output.starting_nodes.clone(),
            input.override_config.clone(),
            generation,
        );
        Ok(output)
    }

    /// Build a flow from scratch without consulting or updating the pool
    pub async fn build_flow(
        &self,
        chatflow_id: &str,
        flow: &FlowData,
        input: &IncomingInput,
    ) -> Result<BuildOutput, FlowError> {
        let scope = BuildScope::new(chatflow_id);
        let start_time = Instant::now();

        self.event_bus.emit(ExecutionEvent::BuildStarted {
            execution_id: scope.execution_id,
            chatflow_id: chatflow_id.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!("Building chatflow {} ({})", chatflow_id, scope.execution_id);

        let result = self.build_inner(&scope, flow, input).await;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        self.event_bus.emit(ExecutionEvent::BuildCompleted {
            execution_id: scope.execution_id,
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        match &result {
            Ok(_) => tracing::info!("Built chatflow {} in {}ms", chatflow_id, duration_ms),
            Err(e) => tracing::error!("Failed to build chatflow {}: {}", chatflow_id, e),
        }
        result
    }

    async fn build_inner(
        &self,
        scope: &BuildScope,
        flow: &FlowData,
        input: &IncomingInput,
    ) -> Result<BuildOutput, FlowError> {
        let plan = plan_flow(flow)?;
        let overrides = input.override_config.as_ref();

        let built = self
            .executor
            .build(scope, &plan, &flow.nodes, &input.question, overrides)
            .await?;

        let ending = built
            .iter()
            .find(|n| n.id == plan.ending_node_id)
            .ok_or_else(|| ChatflowError::NodeNotFound(plan.ending_node_id.clone()))?;

        let mut ending_data = ending.data.clone();
        if let Some(overrides) = overrides {
            ending_data = apply_overrides(ending_data, overrides);
        }
        let ending_node_data = resolve_variables(&ending_data, &built, &input.question);

        let starting_nodes = flow
            .nodes
            .iter()
            .filter(|n| plan.starting_node_ids.contains(&n.id))
            .cloned()
            .collect();

        Ok(BuildOutput {
            execution_id: scope.execution_id,
            ending_node_data,
            starting_nodes,
            reused: false,
        })
    }

    /// Build (or reuse) a chatflow and run its ending node on the question
    pub async fn predict(
        &self,
        chatflow_id: &str,
        input: &IncomingInput,
    ) -> Result<Prediction, FlowError> {
        let build = self.build_chatflow(chatflow_id, input).await?;
        let data = &build.ending_node_data;
        let implementation = self.registry.resolve(&data.name, data.version_or_default())?;

        let options = RunOptions {
            chatflow_id: chatflow_id.to_string(),
            chat_history: input.history.clone(),
        };
        let output = implementation.run(data, &input.question, &options).await?;

        Ok(Prediction {
            execution_id: build.execution_id,
            output,
            reused: build.reused,
        })
    }

    /// Subscribe to build events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Extra instantiations a node may receive inside a feedback loop
    pub max_loop: usize,
    pub event_buffer_size: usize,
}

impl RuntimeConfig {
    /// Read `CHATFLOW_MAX_LOOP` and `CHATFLOW_EVENT_BUFFER`, falling back to
    /// the defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_loop: env_or("CHATFLOW_MAX_LOOP", defaults.max_loop),
            event_buffer_size: env_or("CHATFLOW_EVENT_BUFFER", defaults.event_buffer_size).max(1),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_loop: DEFAULT_MAX_LOOP,
            event_buffer_size: 1000,
        }
    }
}

fn env_or(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}, using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
