use crate::prompt::PromptTemplate;
use async_trait::async_trait;
use chatcore::{
    ChatMessage, MessageType, NodeContext, NodeData, NodeDescriptor, NodeError, NodeImplementation,
    Opaque, RunOptions, Value,
};
use std::collections::HashMap;

const DEFAULT_PROMPT: &str = "{context}\n\nQuestion: {question}";

/// Chain that answers by filling its prompt with the question, the wired
/// context and the chat history.
pub struct TextChainNode;

/// Built chain: prompt plus the context chunks it was connected to
#[derive(Debug, Clone)]
pub struct TextChain {
    prompt: PromptTemplate,
    context: Vec<String>,
    /// Set when the node was configured with a credential
    api_key: Option<String>,
}

impl TextChain {
    pub fn prompt(&self) -> &PromptTemplate {
        &self.prompt
    }

    pub fn context(&self) -> &[String] {
        &self.context
    }

    pub fn is_authenticated(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn answer(&self, question: &str, history: &[ChatMessage]) -> String {
        let values = HashMap::from([
            ("question".to_string(), question.to_string()),
            ("context".to_string(), self.context.join("\n")),
            ("history".to_string(), format_history(history)),
        ]);

        let answer = self.prompt.format(&values);
        if self.prompt.input_variables().iter().any(|v| v == "question") {
            answer
        } else {
            format!("{}\n{}", answer, question)
        }
    }
}

fn format_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| match m.message_type {
            MessageType::User => format!("Human: {}", m.message),
            MessageType::Api => format!("AI: {}", m.message),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn prompt_input(data: &NodeData) -> Result<PromptTemplate, NodeError> {
    match data.inputs.get("prompt") {
        Some(Value::String(template)) => Ok(PromptTemplate::new(template.as_str())),
        Some(Value::Opaque(handle)) => handle
            .downcast_ref::<PromptTemplate>()
            .cloned()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: "prompt".to_string(),
                expected: "PromptTemplate".to_string(),
                actual: handle.label().to_string(),
            }),
        None | Some(Value::Null) => Ok(PromptTemplate::new(
            data.input_str("systemMessage").unwrap_or(DEFAULT_PROMPT),
        )),
        Some(other) => Err(NodeError::InvalidInputType {
            field: "prompt".to_string(),
            expected: "string or PromptTemplate".to_string(),
            actual: other.to_template_string(),
        }),
    }
}

fn context_input(data: &NodeData) -> Vec<String> {
    match data.inputs.get("context") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[async_trait]
impl NodeImplementation for TextChainNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("textChain", 1, "Chains")
            .with_label("Text Chain")
            .with_description("Answer a question from a prompt and optional context")
            .with_credential("openAIApi")
    }

    async fn init(&self, data: &NodeData, _question: &str, ctx: &NodeContext) -> Result<Value, NodeError> {
        let prompt = prompt_input(data)?;
        let context = context_input(data);

        let api_key = match data.credential {
            Some(_) => {
                let credential = ctx.require_credential(data).await?;
                let key = credential
                    .get("openAIApiKey")
                    .and_then(|v| v.as_str())
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| {
                        NodeError::InitializationFailed(format!(
                            "Credential for {} is missing openAIApiKey",
                            data.id
                        ))
                    })?;
                Some(key.to_string())
            }
            None => None,
        };

        tracing::debug!("Text chain {} built with {} context chunks", data.id, context.len());
        Ok(Value::Opaque(Opaque::new(
            "TextChain",
            TextChain {
                prompt,
                context,
                api_key,
            },
        )))
    }

    async fn run(&self, data: &NodeData, question: &str, options: &RunOptions) -> Result<Value, NodeError> {
        let chain = data
            .instance
            .as_ref()
            .and_then(|instance| instance.downcast_ref::<TextChain>())
            .ok_or_else(|| NodeError::ExecutionFailed(format!("{} has not been built", data.id)))?;

        Ok(Value::String(chain.answer(question, &options.chat_history)))
    }
}
