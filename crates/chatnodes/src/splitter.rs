use async_trait::async_trait;
use chatcore::{NodeContext, NodeData, NodeDescriptor, NodeError, NodeImplementation, Value};

const DEFAULT_CHUNK_SIZE: usize = 1000;
const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Splits a text input into overlapping character windows.
///
/// Chunks are memoized in the cache pool per chatflow, so rebuilding a flow
/// with the same text and settings does not split again.
pub struct TextSplitterNode;

#[async_trait]
impl NodeImplementation for TextSplitterNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("characterTextSplitter", 1, "Text Splitters")
            .with_label("Character Text Splitter")
            .with_description("Split text into chunks of a fixed number of characters")
    }

    async fn init(&self, data: &NodeData, _question: &str, ctx: &NodeContext) -> Result<Value, NodeError> {
        let text = data
            .input_str("text")
            .ok_or_else(|| NodeError::MissingInput("text".to_string()))?;
        let chunk_size = number_input(data, "chunkSize", DEFAULT_CHUNK_SIZE)?;
        let chunk_overlap = number_input(data, "chunkOverlap", DEFAULT_CHUNK_OVERLAP)?;

        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(NodeError::Configuration(format!(
                "chunkOverlap ({}) must be smaller than a non-zero chunkSize ({})",
                chunk_overlap, chunk_size
            )));
        }

        let cache_key = format!("{}:{}:{}:{}", data.id, chunk_size, chunk_overlap, text);
        if let Some(chunks) = ctx.cache_pool.get(&ctx.chatflow_id, &cache_key) {
            ctx.events.info("Using cached chunks");
            return Ok(chunks);
        }

        ctx.events.progress(0.0, Some(format!("Splitting {} characters", text.chars().count())));
        let chunks: Vec<Value> = split_text(text, chunk_size, chunk_overlap)
            .into_iter()
            .map(Value::String)
            .collect();
        if chunks.is_empty() {
            ctx.events.warn("Text is empty, no chunks produced");
        }
        ctx.events.progress(100.0, Some(format!("Split text into {} chunks", chunks.len())));

        let chunks = Value::Array(chunks);
        ctx.cache_pool.insert(&ctx.chatflow_id, cache_key, chunks.clone());
        Ok(chunks)
    }
}

fn number_input(data: &NodeData, name: &str, default: usize) -> Result<usize, NodeError> {
    let invalid = |actual: &str| NodeError::InvalidInputType {
        field: name.to_string(),
        expected: "non-negative integer".to_string(),
        actual: actual.to_string(),
    };

    match data.inputs.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) if *n >= 0.0 => Ok(*n as usize),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(default),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid(s)),
        Some(other) => Err(invalid(&other.to_template_string())),
    }
}

/// Character windows of `chunk_size`, each starting `chunk_size - overlap`
/// after the previous one.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();

    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_overlap() {
        assert_eq!(split_text("abcdefg", 4, 2), vec!["abcd", "cdef", "efg"]);
        assert_eq!(split_text("abc", 10, 2), vec!["abc"]);
        assert!(split_text("", 4, 1).is_empty());
    }

    #[test]
    fn numbers_accept_strings_from_the_editor() {
        let data = chatcore::FlowNode::new("s", "characterTextSplitter")
            .with_input("chunkSize", "500")
            .with_input("chunkOverlap", 50.0)
            .data;
        assert_eq!(number_input(&data, "chunkSize", 1).unwrap(), 500);
        assert_eq!(number_input(&data, "chunkOverlap", 1).unwrap(), 50);
        assert_eq!(number_input(&data, "missing", 7).unwrap(), 7);
    }
}
