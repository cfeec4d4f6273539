use crate::{CredentialRecord, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type NodeId = String;
pub type ChatflowId = String;

/// Version assumed for nodes that do not declare one.
pub const DEFAULT_VERSION: u32 = 1;

/// Complete flow definition as saved by the visual editor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowData {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    /// Encrypted credentials shipped alongside the flow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credential_records: Vec<CredentialRecord>,
}

impl FlowData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: FlowNode) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) {
        let source = source.into();
        let target = target.into();
        self.edges.push(FlowEdge {
            id: format!("{}-{}", source, target),
            source_handle: format!("{}-output", source),
            target_handle: format!("{}-input", target),
            source,
            target,
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Node placed in a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: NodeId,
    #[serde(default)]
    pub position: Option<Position>,
    pub data: NodeData,
}

impl FlowNode {
    /// Create a node whose data id matches the node id, as the editor does.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            data: NodeData::new(id.clone(), name),
            id,
            position: None,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.data.version = Some(version);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.data.category = category.into();
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_param(mut self, param: InputParam) -> Self {
        self.data.input_params.push(param);
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.outputs.insert(key.into(), value.into());
        self
    }

    pub fn with_credential(mut self, credential_id: impl Into<String>) -> Self {
        self.data.credential = Some(credential_id.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }
}

/// Everything the engine knows about a node: its type, parameters and,
/// once built, its computed instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    pub id: NodeId,
    #[serde(default)]
    pub label: String,
    /// Registered type name used for plugin dispatch
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub input_params: Vec<InputParam>,
    #[serde(default)]
    pub input_anchors: Vec<InputParam>,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    #[serde(default)]
    pub output_anchors: Vec<InputParam>,
    /// Result of instantiating the node. Written once per build.
    #[serde(skip)]
    pub instance: Option<Value>,
}

impl NodeData {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            label: name.clone(),
            name,
            ..Default::default()
        }
    }

    pub fn version_or_default(&self) -> u32 {
        self.version.unwrap_or(DEFAULT_VERSION)
    }

    pub fn accepts_variable(&self, input: &str) -> bool {
        self.input_params
            .iter()
            .find(|p| p.name == input)
            .map(|p| p.accept_variable)
            .unwrap_or(false)
    }

    pub fn input_str(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).and_then(Value::as_str)
    }
}

/// Metadata describing one input parameter of a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputParam {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub param_type: String,
    #[serde(default)]
    pub accept_variable: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub file_type: Option<String>,
}

impl InputParam {
    pub fn new(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            param_type: param_type.into(),
            ..Default::default()
        }
    }

    pub fn accepting_variables(mut self) -> Self {
        self.accept_variable = true;
        self
    }
}

/// Edge between two nodes; the target depends on the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub source_handle: String,
    #[serde(default)]
    pub target_handle: String,
    #[serde(default)]
    pub id: String,
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub zoom: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "apiMessage")]
    Api,
    #[serde(rename = "userMessage")]
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

/// A prediction request against a chatflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingInput {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub override_config: Option<HashMap<String, Value>>,
}

impl IncomingInput {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_editor_json() {
        let raw = serde_json::json!({
            "nodes": [{
                "id": "promptTemplate_0",
                "position": { "x": 10.0, "y": 20.0 },
                "data": {
                    "id": "promptTemplate_0",
                    "label": "Prompt Template",
                    "name": "promptTemplate",
                    "category": "Prompts",
                    "inputs": { "template": "Answer {question}" },
                    "inputParams": [{ "name": "template", "type": "string", "acceptVariable": true }]
                }
            }],
            "edges": [],
            "viewport": { "x": 0.0, "y": 0.0, "zoom": 1.0 }
        });

        let flow: FlowData = serde_json::from_value(raw).unwrap();
        let data = &flow.nodes[0].data;
        assert_eq!(data.version_or_default(), DEFAULT_VERSION);
        assert!(data.accepts_variable("template"));
        assert!(!data.accepts_variable("missing"));
        assert_eq!(data.input_str("template"), Some("Answer {question}"));
        assert!(data.instance.is_none());
    }
}
