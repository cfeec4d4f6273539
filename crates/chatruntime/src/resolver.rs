//! Template variable resolution for node inputs.
//!
//! `{{nodeId.path}}` pulls in the instance of an already built node and
//! `{{question}}` the live question. A parameter either *is* a reference,
//! and is replaced wholesale by the referenced instance, or accepts
//! variables, in which case every reference inside it is substituted as text.

use chatcore::{FlowNode, NodeData, Value};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Reserved variable bound to the question of the current request
pub const QUESTION_VAR_PREFIX: &str = "question";

/// Resolve the `{{...}}` references of a single parameter string.
///
/// References to nodes that do not exist are left as written; references to
/// nodes that exist but have no instance yet resolve to `Null` (empty text
/// in template mode).
pub fn get_variable_value(
    param_value: &str,
    nodes: &[FlowNode],
    question: &str,
    accept_variable: bool,
) -> Value {
    let bytes = param_value.as_bytes();
    let mut open: Vec<usize> = Vec::new();
    let mut variables: BTreeMap<String, Value> = BTreeMap::new();
    let mut inline = None;

    let mut idx = 0;
    while idx + 1 < bytes.len() {
        match &bytes[idx..idx + 2] {
            b"{{" => open.push(idx + 2),
            b"}}" => {
                if let Some(start) = open.pop() {
                    let path = &param_value[start..idx];
                    let key = format!("{{{{{}}}}}", path);

                    if accept_variable && path == QUESTION_VAR_PREFIX {
                        variables.insert(key.clone(), Value::String(question.to_string()));
                    }

                    let node_id = path.split('.').next().unwrap_or(path);
                    if let Some(node) = nodes.iter().find(|n| n.id == node_id) {
                        let instance = node.data.instance.clone().unwrap_or(Value::Null);
                        if accept_variable {
                            variables.insert(key, instance);
                        } else {
                            inline = Some(instance);
                        }
                    }
                }
            }
            _ => {}
        }
        idx += 1;
    }

    if !accept_variable {
        return inline.unwrap_or_else(|| Value::String(param_value.to_string()));
    }

    // Keys are applied in ascending order so a key never clobbers a longer
    // key sharing its prefix.
    let mut resolved = param_value.to_string();
    for (key, value) in &variables {
        resolved = resolved.replace(key.as_str(), &value.to_template_string());
    }
    Value::String(resolved)
}

/// Resolve every input of a node against the current node set.
///
/// Arrays are resolved element-wise in inline mode. The clone carries any
/// instance along by reference.
pub fn resolve_variables(data: &NodeData, nodes: &[FlowNode], question: &str) -> NodeData {
    let mut resolved = data.clone();

    for (key, value) in resolved.inputs.iter_mut() {
        let next = match &*value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => get_variable_value(s, nodes, question, false),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            Value::String(s) => get_variable_value(s, nodes, question, data.accepts_variable(key)),
            _ => continue,
        };
        *value = next;
    }

    resolved
}

/// Replace inputs with caller supplied values of the same name.
///
/// Applied identically to every node, so one override key reaches every node
/// that has an input with that name. `Null` overrides are ignored.
pub fn apply_overrides(mut data: NodeData, overrides: &HashMap<String, Value>) -> NodeData {
    for (key, value) in data.inputs.iter_mut() {
        if let Some(replacement) = overrides.get(key).filter(|v| !v.is_null()) {
            *value = replacement.clone();
        }
    }
    data
}

/// Names of single-brace prompt variables, e.g. `question` in
/// `"Answer: {question}"`.
pub fn get_input_variables(param_value: &str) -> Vec<String> {
    let mut open: Vec<usize> = Vec::new();
    let mut variables = Vec::new();

    for (idx, byte) in param_value.bytes().enumerate() {
        match byte {
            b'{' => open.push(idx + 1),
            b'}' => {
                if let Some(start) = open.pop() {
                    variables.push(param_value[start..idx].to_string());
                }
            }
            _ => {}
        }
    }
    variables
}

/// True when any starting node carries an input variable, meaning its
/// build depends on the incoming question and cannot be reused.
pub fn is_start_node_depend_on_input(starting_nodes: &[FlowNode]) -> bool {
    starting_nodes.iter().any(|node| {
        node.data.inputs.values().any(|value| match value {
            Value::String(s) => !get_input_variables(s).is_empty(),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .any(|s| !get_input_variables(s).is_empty()),
            _ => false,
        })
    })
}

/// An input a caller may override
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableConfig {
    pub node: String,
    pub label: String,
    pub name: String,
    #[serde(rename = "type")]
    pub config_type: String,
}

/// List the overridable inputs of a flow. Password and option inputs are
/// never offered; file inputs are all exposed under `files`.
pub fn find_available_configs(nodes: &[FlowNode]) -> Vec<AvailableConfig> {
    let mut configs: Vec<AvailableConfig> = Vec::new();

    for node in nodes {
        for param in &node.data.input_params {
            let config = match param.param_type.as_str() {
                "password" | "options" => continue,
                "file" => AvailableConfig {
                    node: node.data.label.clone(),
                    label: param.label.clone(),
                    name: "files".to_string(),
                    config_type: param.file_type.clone().unwrap_or_else(|| param.param_type.clone()),
                },
                _ => AvailableConfig {
                    node: node.data.label.clone(),
                    label: param.label.clone(),
                    name: param.name.clone(),
                    config_type: param.param_type.clone(),
                },
            };
            if !configs.contains(&config) {
                configs.push(config);
            }
        }
    }
    configs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatcore::{InputParam, Opaque};

    fn built(id: &str, instance: Value) -> FlowNode {
        let mut node = FlowNode::new(id, "node");
        node.data.instance = Some(instance);
        node
    }

    #[test]
    fn inline_reference_is_replaced_wholesale() {
        let nodes = vec![built("n1", Value::from("X"))];
        assert_eq!(get_variable_value("{{n1.output}}", &nodes, "q", false), Value::from("X"));
    }

    #[test]
    fn template_reference_is_substituted_in_place() {
        let nodes = vec![built("n1", Value::from("X"))];
        assert_eq!(
            get_variable_value("prefix {{n1.output}} suffix", &nodes, "q", true),
            Value::from("prefix X suffix")
        );
    }

    #[test]
    fn inline_keeps_non_string_instances() {
        let handle = Opaque::new("VectorStore", 42u8);
        let nodes = vec![built("vs", Value::Opaque(handle.clone()))];

        let resolved = get_variable_value("{{vs.data.instance}}", &nodes, "q", false);
        assert!(resolved.as_opaque().unwrap().ptr_eq(&handle));
    }

    #[test]
    fn question_only_binds_in_template_mode() {
        assert_eq!(
            get_variable_value("Q: {{question}}", &[], "why?", true),
            Value::from("Q: why?")
        );
        assert_eq!(
            get_variable_value("Q: {{question}}", &[], "why?", false),
            Value::from("Q: {{question}}")
        );
    }

    #[test]
    fn unknown_and_unbuilt_references() {
        let mut pending = FlowNode::new("later", "node");
        pending.data.instance = None;
        let nodes = vec![pending];

        assert_eq!(
            get_variable_value("{{ghost.output}}", &nodes, "q", false),
            Value::from("{{ghost.output}}")
        );
        assert_eq!(get_variable_value("{{later.output}}", &nodes, "q", false), Value::Null);
        assert_eq!(get_variable_value("a{{later.x}}b", &nodes, "q", true), Value::from("ab"));
    }

    #[test]
    fn repeated_and_multiple_keys() {
        let nodes = vec![built("n1", Value::from("one")), built("n10", Value::from("ten"))];
        assert_eq!(
            get_variable_value("{{n1.o}}+{{n10.o}}={{n1.o}}", &nodes, "q", true),
            Value::from("one+ten=one")
        );
    }

    #[test]
    fn resolves_arrays_inline_and_respects_params() {
        let nodes = vec![built("tool_0", Value::from("calculator")), built("llm_0", Value::from("model"))];
        let data = FlowNode::new("agent_0", "agent")
            .with_input("tools", Value::Array(vec!["{{tool_0.data.instance}}".into(), Value::Number(1.0)]))
            .with_input("systemMessage", "Use {{llm_0.data.instance}} for {{question}}")
            .with_input("model", "{{llm_0.data.instance}}")
            .with_input("temperature", 0.2)
            .with_param(InputParam::new("systemMessage", "string").accepting_variables())
            .data;

        let resolved = resolve_variables(&data, &nodes, "sums");

        assert_eq!(
            resolved.inputs["tools"],
            Value::Array(vec!["calculator".into(), Value::Number(1.0)])
        );
        assert_eq!(resolved.inputs["systemMessage"], Value::from("Use model for sums"));
        assert_eq!(resolved.inputs["model"], Value::from("model"));
        assert_eq!(resolved.inputs["temperature"], Value::Number(0.2));
        // The source data is untouched.
        assert_eq!(data.inputs["model"], Value::from("{{llm_0.data.instance}}"));
    }

    #[test]
    fn resolve_keeps_existing_instance_by_reference() {
        let handle = Opaque::new("Faiss", vec![1.0f32; 8]);
        let mut data = FlowNode::new("faiss_0", "faiss").data;
        data.instance = Some(Value::Opaque(handle.clone()));

        let resolved = resolve_variables(&data, &[], "q");
        let carried = resolved.instance.as_ref().and_then(Value::as_opaque).unwrap();
        assert!(carried.ptr_eq(&handle));
    }

    #[test]
    fn overrides_replace_matching_inputs_only() {
        let data = FlowNode::new("llm_0", "chatModel")
            .with_input("temperature", 0.9)
            .with_input("modelName", "small")
            .data;
        let overrides = HashMap::from([
            ("temperature".to_string(), Value::Number(0.1)),
            ("modelName".to_string(), Value::Null),
            ("unrelated".to_string(), Value::from("x")),
        ]);

        let data = apply_overrides(data, &overrides);
        assert_eq!(data.inputs["temperature"], Value::Number(0.1));
        assert_eq!(data.inputs["modelName"], Value::from("small"));
        assert!(!data.inputs.contains_key("unrelated"));
    }

    #[test]
    fn input_variables_and_question_dependency() {
        assert_eq!(get_input_variables("Answer {question} in {lang}"), vec!["question", "lang"]);
        assert!(get_input_variables("no variables").is_empty());

        let static_prompt = FlowNode::new("p", "promptTemplate").with_input("template", "Be brief.");
        let live_prompt = FlowNode::new("p", "promptTemplate").with_input("template", "Answer {question}");
        assert!(!is_start_node_depend_on_input(&[static_prompt.clone()]));
        assert!(is_start_node_depend_on_input(&[static_prompt, live_prompt]));
    }

    #[test]
    fn available_configs_skip_secrets_and_dedupe() {
        let mut file = InputParam::new("pdfFile", "file");
        file.file_type = Some(".pdf".to_string());
        let node = FlowNode::new("loader_0", "pdfLoader")
            .with_param(InputParam::new("apiKey", "password"))
            .with_param(InputParam::new("mode", "options"))
            .with_param(file.clone())
            .with_param(file)
            .with_param(InputParam::new("chunkSize", "number"));

        let configs = find_available_configs(&[node]);
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].name, "files");
        assert_eq!(configs[0].config_type, ".pdf");
        assert_eq!(configs[1].name, "chunkSize");
    }
}
