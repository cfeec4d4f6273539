// crates/chatnodes/tests/nodes_test.rs

use chatcore::{
    default_database_entities, CachePool, ChatMessage, EventBus, ExecutionEvent, ExecutionId, FlowNode,
    MessageType, NodeContext, NodeError, NodeEvent, NodeImplementation, Opaque, RunOptions, Value,
};
use chatnodes::{PromptTemplate, PromptTemplateNode, PromptTemplateNodeV2, TextChain, TextChainNode, TextSplitterNode};
use std::sync::Arc;

// Helper function to create a test context
fn create_test_context(cache_pool: CachePool) -> NodeContext {
    let event_bus = EventBus::new(100);
    let execution_id = ExecutionId::new_v4();

    NodeContext {
        chatflow_id: "test-flow".to_string(),
        node_id: "node_0".to_string(),
        data_source: None,
        database_entities: Arc::new(default_database_entities()),
        cache_pool,
        events: event_bus.create_emitter(execution_id, "node_0".to_string()),
    }
}

#[tokio::test]
async fn test_prompt_template_v1_returns_text() {
    let ctx = create_test_context(CachePool::new());
    let data = FlowNode::new("prompt_0", "promptTemplate")
        .with_input("template", "Tell me about {topic}")
        .data;

    let instance = PromptTemplateNode.init(&data, "q", &ctx).await.unwrap();
    assert_eq!(instance, Value::from("Tell me about {topic}"));

    let empty = FlowNode::new("prompt_1", "promptTemplate").data;
    let err = PromptTemplateNode.init(&empty, "q", &ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::MissingInput(field) if field == "template"));
}

#[tokio::test]
async fn test_prompt_template_v2_parses_variables() {
    let ctx = create_test_context(CachePool::new());
    let data = FlowNode::new("prompt_0", "promptTemplate")
        .with_version(2)
        .with_input("template", "Use {context} to answer {question}")
        .data;

    let instance = PromptTemplateNodeV2.init(&data, "q", &ctx).await.unwrap();
    let prompt = instance.downcast_ref::<PromptTemplate>().unwrap();

    assert_eq!(prompt.input_variables(), ["context", "question"]);
}

#[tokio::test]
async fn test_splitter_memoizes_in_cache_pool() {
    let cache_pool = CachePool::new();
    let ctx = create_test_context(cache_pool.clone());
    let data = FlowNode::new("splitter_0", "characterTextSplitter")
        .with_input("text", "abcdefghij")
        .with_input("chunkSize", 4.0)
        .with_input("chunkOverlap", 1.0)
        .data;

    let first = TextSplitterNode.init(&data, "q", &ctx).await.unwrap();
    let second = TextSplitterNode.init(&data, "q", &ctx).await.unwrap();

    assert_eq!(
        first,
        Value::Array(vec!["abcd".into(), "defg".into(), "ghij".into()])
    );
    assert_eq!(first, second);
    assert_eq!(cache_pool.len(), 1);

    let wider = FlowNode::new("splitter_0", "characterTextSplitter")
        .with_input("text", "abcdefghij")
        .with_input("chunkSize", 8.0)
        .with_input("chunkOverlap", 1.0)
        .data;
    TextSplitterNode.init(&wider, "q", &ctx).await.unwrap();
    assert_eq!(cache_pool.len(), 2);
}

#[tokio::test]
async fn test_splitter_reports_progress_and_empty_text() {
    let event_bus = EventBus::new(100);
    let mut events = event_bus.subscribe();
    let ctx = NodeContext {
        events: event_bus.create_emitter(ExecutionId::new_v4(), "splitter_0".to_string()),
        ..create_test_context(CachePool::new())
    };
    let data = FlowNode::new("splitter_0", "characterTextSplitter")
        .with_input("text", "")
        .data;

    let chunks = TextSplitterNode.init(&data, "q", &ctx).await.unwrap();
    assert_eq!(chunks, Value::Array(vec![]));

    let mut node_events = Vec::new();
    while let Ok(ExecutionEvent::NodeEvent { event, .. }) = events.try_recv() {
        node_events.push(event);
    }
    assert!(matches!(node_events.first(), Some(NodeEvent::Progress { percent, .. }) if *percent == 0.0));
    assert!(node_events.iter().any(|e| matches!(e, NodeEvent::Warning { .. })));
    assert!(matches!(
        node_events.last(),
        Some(NodeEvent::Progress { percent, message: Some(message) })
            if *percent == 100.0 && message == "Split text into 0 chunks"
    ));
}

#[tokio::test]
async fn test_splitter_rejects_overlap_larger_than_chunk() {
    let ctx = create_test_context(CachePool::new());
    let data = FlowNode::new("splitter_0", "characterTextSplitter")
        .with_input("text", "abc")
        .with_input("chunkSize", 2.0)
        .with_input("chunkOverlap", 2.0)
        .data;

    let err = TextSplitterNode.init(&data, "q", &ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn test_text_chain_answers_with_prompt_and_context() {
    let ctx = create_test_context(CachePool::new());
    let prompt = Opaque::new("PromptTemplate", PromptTemplate::new("Context: {context}\n{history}\nQ: {question}"));
    let mut data = FlowNode::new("chain_0", "textChain")
        .with_input("prompt", Value::Opaque(prompt))
        .with_input("context", Value::Array(vec!["first".into(), "second".into()]))
        .data;

    let instance = TextChainNode.init(&data, "ignored", &ctx).await.unwrap();
    let chain = instance.downcast_ref::<TextChain>().unwrap();
    assert_eq!(chain.context(), ["first", "second"]);
    assert!(!chain.is_authenticated());
    data.instance = Some(instance);

    let options = RunOptions {
        chatflow_id: "test-flow".to_string(),
        chat_history: vec![
            ChatMessage { message: "hi".to_string(), message_type: MessageType::User },
            ChatMessage { message: "hello".to_string(), message_type: MessageType::Api },
        ],
    };
    let answer = TextChainNode.run(&data, "why?", &options).await.unwrap();

    assert_eq!(answer, Value::from("Context: first\nsecond\nHuman: hi\nAI: hello\nQ: why?"));
}

#[tokio::test]
async fn test_text_chain_appends_question_when_prompt_has_no_slot() {
    let ctx = create_test_context(CachePool::new());
    let mut data = FlowNode::new("chain_0", "textChain")
        .with_input("prompt", "Be brief.")
        .data;
    data.instance = Some(TextChainNode.init(&data, "q", &ctx).await.unwrap());

    let answer = TextChainNode.run(&data, "why?", &RunOptions::default()).await.unwrap();
    assert_eq!(answer, Value::from("Be brief.\nwhy?"));
}

#[tokio::test]
async fn test_text_chain_requires_data_source_for_credentials() {
    let ctx = create_test_context(CachePool::new());
    let data = FlowNode::new("chain_0", "textChain").with_credential("cred-1").data;

    let err = TextChainNode.init(&data, "q", &ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn test_text_chain_run_needs_instance() {
    let data = FlowNode::new("chain_0", "textChain").data;
    let err = TextChainNode.run(&data, "q", &RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, NodeError::ExecutionFailed(_)));
}
