#![allow(dead_code)]

use async_trait::async_trait;
use chatcore::{
    FlowData, FlowNode, NodeContext, NodeData, NodeDescriptor, NodeError, NodeImplementation,
    RunOptions, Value,
};
use chatruntime::PluginRegistry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug"))
        )
        .with_test_writer()
        .try_init();
}

/// Instance is the resolved `text` input; `run` echoes it with the question
#[derive(Default)]
pub struct EchoNode {
    builds: AtomicUsize,
}

impl EchoNode {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeImplementation for EchoNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("echo", 1, "Chains")
    }

    async fn init(&self, data: &NodeData, _question: &str, ctx: &NodeContext) -> Result<Value, NodeError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        ctx.events.info(format!("echo {}", data.id));
        Ok(data.inputs.get("text").cloned().unwrap_or_default())
    }

    async fn run(&self, data: &NodeData, question: &str, _options: &RunOptions) -> Result<Value, NodeError> {
        let text = data.instance.as_ref().map(Value::to_template_string).unwrap_or_default();
        Ok(Value::String(format!("{} -> {}", text, question)))
    }
}

/// Builds fine but cannot answer
pub struct ToolNode;

#[async_trait]
impl NodeImplementation for ToolNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("tool", 1, "Tools")
    }

    async fn init(&self, data: &NodeData, _question: &str, _ctx: &NodeContext) -> Result<Value, NodeError> {
        Ok(Value::String(format!("tool:{}", data.id)))
    }
}

/// Like `echo` but takes a while to build
pub struct SlowNode;

#[async_trait]
impl NodeImplementation for SlowNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("slow", 1, "Chains")
    }

    async fn init(&self, data: &NodeData, _question: &str, _ctx: &NodeContext) -> Result<Value, NodeError> {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        Ok(data.inputs.get("text").cloned().unwrap_or_default())
    }

    async fn run(&self, data: &NodeData, _question: &str, _options: &RunOptions) -> Result<Value, NodeError> {
        Ok(data.instance.clone().unwrap_or_default())
    }
}

pub fn registry() -> (Arc<PluginRegistry>, Arc<EchoNode>) {
    let echo = Arc::new(EchoNode::default());
    let mut registry = PluginRegistry::new();
    registry.register(echo.clone());
    registry.register(Arc::new(ToolNode));
    registry.register(Arc::new(SlowNode));
    (Arc::new(registry), echo)
}

/// Flow of `echo` nodes with static text inputs
pub fn echo_flow(ids: &[&str], edges: &[(&str, &str)]) -> FlowData {
    let mut flow = FlowData::new();
    for id in ids {
        flow.add_node(FlowNode::new(*id, "echo").with_input("text", *id));
    }
    for (source, target) in edges {
        flow.connect(*source, *target);
    }
    flow
}
