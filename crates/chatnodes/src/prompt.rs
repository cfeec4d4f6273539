use async_trait::async_trait;
use chatcore::{NodeContext, NodeData, NodeDescriptor, NodeError, NodeImplementation, Opaque, Value};
use chatruntime::get_input_variables;
use std::collections::HashMap;

const NODE_NAME: &str = "promptTemplate";

/// A prompt with `{variable}` placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    template: String,
    input_variables: Vec<String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let input_variables = get_input_variables(&template);
        Self {
            template,
            input_variables,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn input_variables(&self) -> &[String] {
        &self.input_variables
    }

    /// Fill in the placeholders that have a value; others are left as written.
    pub fn format(&self, values: &HashMap<String, String>) -> String {
        let mut formatted = self.template.clone();
        for variable in &self.input_variables {
            if let Some(value) = values.get(variable) {
                formatted = formatted.replace(&format!("{{{}}}", variable), value);
            }
        }
        formatted
    }
}

fn required_template(data: &NodeData) -> Result<&str, NodeError> {
    data.input_str("template")
        .ok_or_else(|| NodeError::MissingInput("template".to_string()))
}

/// Prompt template whose instance is the raw template text
pub struct PromptTemplateNode;

#[async_trait]
impl NodeImplementation for PromptTemplateNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new(NODE_NAME, 1, "Prompts")
            .with_label("Prompt Template")
            .with_description("Schema to represent a basic prompt for an LLM")
    }

    async fn init(&self, data: &NodeData, _question: &str, _ctx: &NodeContext) -> Result<Value, NodeError> {
        Ok(Value::String(required_template(data)?.to_string()))
    }
}

/// Second revision: the instance is a parsed `PromptTemplate`
pub struct PromptTemplateNodeV2;

#[async_trait]
impl NodeImplementation for PromptTemplateNodeV2 {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new(NODE_NAME, 2, "Prompts")
            .with_label("Prompt Template")
            .with_description("Schema to represent a basic prompt for an LLM, with parsed input variables")
    }

    async fn init(&self, data: &NodeData, _question: &str, ctx: &NodeContext) -> Result<Value, NodeError> {
        let prompt = PromptTemplate::new(required_template(data)?);
        if !prompt.input_variables().is_empty() {
            ctx.events
                .info(format!("Prompt variables: {}", prompt.input_variables().join(", ")));
        }
        Ok(Value::Opaque(Opaque::new("PromptTemplate", prompt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_known_variables_only() {
        let prompt = PromptTemplate::new("Answer {question} using {context}");
        assert_eq!(prompt.input_variables(), ["question", "context"]);

        let values = HashMap::from([("question".to_string(), "why".to_string())]);
        assert_eq!(prompt.format(&values), "Answer why using {context}");
    }
}
