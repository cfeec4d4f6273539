use crate::graph::FlowPlan;
use crate::registry::PluginRegistry;
use crate::resolver::{apply_overrides, resolve_variables};
use chatcore::{
    CachePool, DataSource, EventBus, ExecutionEvent, ExecutionId, FlowError, FlowNode, NodeContext,
    NodeId, Value,
};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Number of extra instantiations a node may receive inside a feedback loop
pub const DEFAULT_MAX_LOOP: usize = 3;

/// Per-build bookkeeping for a node that has been queued at least once
#[derive(Debug, Clone, Copy)]
struct Explored {
    remaining_loop: usize,
    last_seen_depth: usize,
}

/// Identifies one build for logging and events
#[derive(Debug, Clone)]
pub struct BuildScope {
    pub chatflow_id: String,
    pub execution_id: ExecutionId,
}

impl BuildScope {
    pub fn new(chatflow_id: impl Into<String>) -> Self {
        Self {
            chatflow_id: chatflow_id.into(),
            execution_id: ExecutionId::new_v4(),
        }
    }
}

/// Instantiates the nodes of a flow level by level, starting from the
/// starting nodes and walking the directed graph towards the ending node.
pub struct FlowExecutor {
    registry: Arc<PluginRegistry>,
    event_bus: Arc<EventBus>,
    cache_pool: CachePool,
    data_source: Option<Arc<dyn DataSource>>,
    database_entities: Arc<HashMap<String, String>>,
    max_loop: usize,
}

impl FlowExecutor {
    pub fn new(registry: Arc<PluginRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            event_bus,
            cache_pool: CachePool::new(),
            data_source: None,
            database_entities: Arc::new(chatcore::default_database_entities()),
            max_loop: DEFAULT_MAX_LOOP,
        }
    }

    pub fn with_cache_pool(mut self, cache_pool: CachePool) -> Self {
        self.cache_pool = cache_pool;
        self
    }

    pub fn with_data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
        self.data_source = Some(data_source);
        self
    }

    pub fn with_database_entities(mut self, entities: HashMap<String, String>) -> Self {
        self.database_entities = Arc::new(entities);
        self
    }

    pub fn with_max_loop(mut self, max_loop: usize) -> Self {
        self.max_loop = max_loop;
        self
    }

    pub fn max_loop(&self) -> usize {
        self.max_loop
    }

    /// Instantiate every node reachable from the starting nodes.
    ///
    /// Returns a copy of `nodes` where each built node carries its instance.
    /// The input slice is never modified. A node revisited through a
    /// feedback loop is rebuilt at most `max_loop` extra times; once a
    /// node's budget is spent the remaining successors of the node being
    /// processed are not queued.
    pub async fn build(
        &self,
        scope: &BuildScope,
        plan: &FlowPlan,
        nodes: &[FlowNode],
        question: &str,
        override_config: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<FlowNode>, FlowError> {
        let mut flow_nodes = nodes.to_vec();
        let index: HashMap<NodeId, usize> = flow_nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.id.clone(), idx))
            .collect();

        let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
        let mut explored: HashMap<NodeId, Explored> = HashMap::new();

        for id in &plan.starting_node_ids {
            queue.push_back((id.clone(), 0));
            explored.insert(
                id.clone(),
                Explored {
                    remaining_loop: self.max_loop,
                    last_seen_depth: 0,
                },
            );
        }

        while let Some((node_id, depth)) = queue.pop_front() {
            let Some(&idx) = index.get(&node_id) else {
                tracing::warn!("Skipping unknown node {} in chatflow {}", node_id, scope.chatflow_id);
                continue;
            };

            let instance = self
                .instantiate(scope, &flow_nodes, idx, depth, question, override_config)
                .await?;
            flow_nodes[idx].data.instance = Some(instance);

            let next_depth = depth + 1;
            let mut neighbours = plan.graph.get(&node_id).cloned().unwrap_or_default();
            for (id, level) in &plan.depth_queue {
                if *level == next_depth && !neighbours.contains(id) {
                    neighbours.push(id.clone());
                }
            }

            for neighbour in neighbours {
                match explored.get_mut(&neighbour) {
                    Some(seen) => {
                        if seen.last_seen_depth == next_depth {
                            continue;
                        }
                        if seen.remaining_loop == 0 {
                            tracing::debug!("Loop budget spent at {} (depth {})", neighbour, next_depth);
                            break;
                        }
                        seen.remaining_loop -= 1;
                        seen.last_seen_depth = next_depth;
                        queue.push_back((neighbour, next_depth));
                    }
                    None => {
                        explored.insert(
                            neighbour.clone(),
                            Explored {
                                remaining_loop: self.max_loop,
                                last_seen_depth: next_depth,
                            },
                        );
                        queue.push_back((neighbour, next_depth));
                    }
                }
            }
        }

        Ok(flow_nodes)
    }

    async fn instantiate(
        &self,
        scope: &BuildScope,
        flow_nodes: &[FlowNode],
        idx: usize,
        depth: usize,
        question: &str,
        override_config: Option<&HashMap<String, Value>>,
    ) -> Result<Value, FlowError> {
        let node = &flow_nodes[idx];
        let start = Instant::now();

        let result = match self.registry.resolve(&node.data.name, node.data.version_or_default()) {
            Ok(implementation) => {
                let mut data = node.data.clone();
                if let Some(overrides) = override_config {
                    data = apply_overrides(data, overrides);
                }
                let resolved = resolve_variables(&data, flow_nodes, question);

                let ctx = NodeContext {
                    chatflow_id: scope.chatflow_id.clone(),
                    node_id: node.id.clone(),
                    data_source: self.data_source.clone(),
                    database_entities: Arc::clone(&self.database_entities),
                    cache_pool: self.cache_pool.clone(),
                    events: self.event_bus.create_emitter(scope.execution_id, node.id.clone()),
                };

                implementation
                    .init(&resolved, question, &ctx)
                    .await
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(instance) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::debug!("Instantiated {} ({}) at depth {}", node.id, node.data.name, depth);
                self.event_bus.emit(ExecutionEvent::NodeInstantiated {
                    execution_id: scope.execution_id,
                    node_id: node.id.clone(),
                    node_type: node.data.name.clone(),
                    depth,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                Ok(instance)
            }
            Err(message) => {
                tracing::error!("Failed to instantiate node {}: {}", node.id, message);
                self.event_bus.emit(ExecutionEvent::NodeFailed {
                    execution_id: scope.execution_id,
                    node_id: node.id.clone(),
                    error: message.clone(),
                    timestamp: Utc::now(),
                });
                Err(FlowError::Instantiation {
                    node_id: node.id.clone(),
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::plan_flow;
    use async_trait::async_trait;
    use chatcore::{FlowData, NodeData, NodeDescriptor, NodeError, NodeImplementation};
    use std::sync::Mutex;

    /// Records every init call and returns `name#count` as the instance
    #[derive(Default)]
    struct Counting {
        calls: Mutex<Vec<String>>,
    }

    impl Counting {
        fn count(&self, id: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == id).count()
        }

        fn order(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeImplementation for Counting {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("counting", 1, "Chains")
        }

        async fn init(&self, data: &NodeData, _: &str, _: &NodeContext) -> Result<Value, NodeError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(data.id.clone());
            let n = calls.iter().filter(|c| **c == data.id).count();
            Ok(Value::String(format!("{}#{}", data.id, n)))
        }
    }

    struct Failing;

    #[async_trait]
    impl NodeImplementation for Failing {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("failing", 1, "Tools")
        }

        async fn init(&self, _: &NodeData, _: &str, _: &NodeContext) -> Result<Value, NodeError> {
            Err(NodeError::InitializationFailed("missing api key".into()))
        }
    }

    /// Echoes its resolved `text` input back as the instance
    struct Echo;

    #[async_trait]
    impl NodeImplementation for Echo {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("echo", 1, "Utilities")
        }

        async fn init(&self, data: &NodeData, _: &str, _: &NodeContext) -> Result<Value, NodeError> {
            Ok(data.inputs.get("text").cloned().unwrap_or_default())
        }
    }

    fn executor(counting: Arc<Counting>) -> FlowExecutor {
        let mut registry = PluginRegistry::new();
        registry.register(counting);
        registry.register(Arc::new(Failing));
        registry.register(Arc::new(Echo));
        FlowExecutor::new(Arc::new(registry), Arc::new(EventBus::default()))
    }

    fn counting_flow(ids: &[&str], edges: &[(&str, &str)]) -> FlowData {
        let mut flow = FlowData::new();
        for id in ids {
            flow.add_node(FlowNode::new(*id, "counting"));
        }
        for (s, t) in edges {
            flow.connect(*s, *t);
        }
        flow
    }

    #[tokio::test]
    async fn chain_is_built_in_level_order() {
        let counting = Arc::new(Counting::default());
        let executor = executor(counting.clone());
        let flow = counting_flow(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let plan = plan_flow(&flow).unwrap();

        let built = executor
            .build(&BuildScope::new("flow"), &plan, &flow.nodes, "q", None)
            .await
            .unwrap();

        assert_eq!(counting.order(), vec!["a", "b", "c"]);
        assert!(built.iter().all(|n| n.data.instance.is_some()));
        assert!(flow.nodes.iter().all(|n| n.data.instance.is_none()));
    }

    #[tokio::test]
    async fn feedback_loop_is_bounded() {
        let counting = Arc::new(Counting::default());
        let executor = executor(counting.clone());
        let flow = counting_flow(&["a", "b", "c"], &[("a", "b"), ("b", "a"), ("b", "c")]);
        let plan = plan_flow(&flow).unwrap();

        let built = executor
            .build(&BuildScope::new("flow"), &plan, &flow.nodes, "q", None)
            .await
            .unwrap();

        for id in ["a", "b", "c"] {
            let count = counting.count(id);
            assert!(count >= 1 && count <= 1 + DEFAULT_MAX_LOOP, "{} built {} times", id, count);
        }
        assert!(built.iter().all(|n| n.data.instance.is_some()));
    }

    #[tokio::test]
    async fn shortcut_edge_pulls_nodes_into_the_next_level() {
        let counting = Arc::new(Counting::default());
        let executor = executor(counting.clone());
        let flow = counting_flow(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("a", "c")]);
        let plan = plan_flow(&flow).unwrap();

        executor
            .build(&BuildScope::new("flow"), &plan, &flow.nodes, "q", None)
            .await
            .unwrap();

        assert_eq!(counting.order(), vec!["b", "a", "c", "a", "b", "b", "c", "c"]);
        assert_eq!(counting.count("a"), 2);
        assert_eq!(counting.count("b"), 3);
    }

    #[tokio::test]
    async fn zero_loop_budget_builds_each_node_once_in_a_chain() {
        let counting = Arc::new(Counting::default());
        let executor = executor(counting.clone()).with_max_loop(0);
        let flow = counting_flow(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        let plan = plan_flow(&flow).unwrap();

        executor
            .build(&BuildScope::new("flow"), &plan, &flow.nodes, "q", None)
            .await
            .unwrap();

        assert_eq!(counting.order(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn instances_flow_into_later_nodes() {
        let executor = executor(Arc::new(Counting::default()));
        let mut flow = FlowData::new();
        flow.add_node(FlowNode::new("src", "echo").with_input("text", "hello"));
        flow.add_node(FlowNode::new("dst", "echo").with_input("text", "{{src.data.instance}}"));
        flow.connect("src", "dst");
        let plan = plan_flow(&flow).unwrap();

        let built = executor
            .build(&BuildScope::new("flow"), &plan, &flow.nodes, "q", None)
            .await
            .unwrap();

        assert_eq!(built[1].data.instance, Some(Value::from("hello")));
    }

    #[tokio::test]
    async fn overrides_apply_before_resolution() {
        let executor = executor(Arc::new(Counting::default()));
        let mut flow = FlowData::new();
        flow.add_node(FlowNode::new("only", "echo").with_input("text", "default"));
        let plan = plan_flow(&flow).unwrap();
        let overrides = HashMap::from([("text".to_string(), Value::from("override"))]);

        let built = executor
            .build(&BuildScope::new("flow"), &plan, &flow.nodes, "q", Some(&overrides))
            .await
            .unwrap();

        assert_eq!(built[0].data.instance, Some(Value::from("override")));
    }

    #[tokio::test]
    async fn failure_aborts_with_plugin_message() {
        let counting = Arc::new(Counting::default());
        let executor = executor(counting.clone());
        let mut flow = FlowData::new();
        flow.add_node(FlowNode::new("tool", "failing"));
        flow.add_node(FlowNode::new("chain", "counting"));
        flow.connect("tool", "chain");
        let plan = plan_flow(&flow).unwrap();
        let mut events = executor.event_bus.subscribe();

        let err = executor
            .build(&BuildScope::new("flow"), &plan, &flow.nodes, "q", None)
            .await
            .unwrap_err();

        match err {
            FlowError::Instantiation { node_id, message } => {
                assert_eq!(node_id, "tool");
                assert!(message.contains("missing api key"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(counting.count("chain"), 0);
        assert!(matches!(events.try_recv(), Ok(ExecutionEvent::NodeFailed { .. })));
    }

    #[tokio::test]
    async fn unknown_node_type_fails_instantiation() {
        let executor = executor(Arc::new(Counting::default()));
        let mut flow = FlowData::new();
        flow.add_node(FlowNode::new("mystery", "notRegistered").with_version(2));
        let plan = plan_flow(&flow).unwrap();

        let err = executor
            .build(&BuildScope::new("flow"), &plan, &flow.nodes, "q", None)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Unknown node type: notRegistered (version 2)");
    }
}
