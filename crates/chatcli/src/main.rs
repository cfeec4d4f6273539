// crates/chatcli/src/main.rs

use anyhow::{bail, Context, Result};
use chatcore::{CredentialData, ExecutionEvent, FlowData, FlowNode, IncomingInput, NodeEvent, Value};
use chatruntime::{
    find_available_configs, validate_flow, FlowRuntime, InMemoryDataSource, PluginRegistry,
    RuntimeConfig,
};
use chatvault::{ApiKeyStore, CredentialVault, VaultConfig};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatflow")]
#[command(about = "Chatflow Engine CLI", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a chatflow file and ask it a question
    Run {
        /// Path to chatflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Question passed to the ending node
        #[arg(short, long)]
        question: String,

        /// Override configuration as a JSON object
        #[arg(short = 'o', long = "override")]
        override_config: Option<String>,
    },

    /// Validate a chatflow file without building it
    Validate {
        /// Path to chatflow JSON file
        file: PathBuf,
    },

    /// List available node and credential types
    Nodes,

    /// Create a new example chatflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "chatflow.json")]
        output: PathBuf,
    },

    /// Manage API keys
    #[command(subcommand)]
    ApiKey(ApiKeyCommands),

    /// Encrypt or decrypt credential data
    #[command(subcommand)]
    Credential(CredentialCommands),
}

#[derive(Subcommand)]
enum ApiKeyCommands {
    /// List stored keys
    List,
    /// Create a new key
    Add { name: String },
    /// Rename a key
    Rename { id: String, name: String },
    /// Delete a key
    Delete { id: String },
    /// Check a key against its stored hash
    Verify { id: String, key: String },
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Encrypt a JSON object of credential fields
    Encrypt { data: String },
    /// Decrypt a blob, redacting password fields of the given credential type
    Decrypt {
        blob: String,
        #[arg(long)]
        credential_name: Option<String>,
    },
}

fn init_logging(verbose: bool, default_level: &str) {
    let level = if verbose { "debug" } else { default_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn create_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    chatnodes::register_all(&mut registry);
    registry
}

fn load_flow(file: &Path) -> Result<FlowData> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let flow = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a chatflow", file.display()))?;
    Ok(flow)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            question,
            override_config,
        } => {
            init_logging(cli.verbose, "info");
            run_chatflow(file, question, override_config).await?;
        }

        Commands::Validate { file } => {
            init_logging(cli.verbose, "warn");
            validate_chatflow(file)?;
        }

        Commands::Nodes => {
            init_logging(cli.verbose, "warn");
            list_nodes();
        }

        Commands::Init { output } => {
            init_logging(cli.verbose, "warn");
            create_example_chatflow(output)?;
        }

        Commands::ApiKey(command) => {
            init_logging(cli.verbose, "warn");
            manage_api_keys(command).await?;
        }

        Commands::Credential(command) => {
            init_logging(cli.verbose, "warn");
            manage_credentials(command).await?;
        }
    }

    Ok(())
}

fn parse_override(raw: &str) -> Result<HashMap<String, Value>> {
    match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Object(obj) => Ok(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        _ => bail!("Override config must be a JSON object"),
    }
}

async fn run_chatflow(file: PathBuf, question: String, override_config: Option<String>) -> Result<()> {
    println!("🚀 Loading chatflow from: {}", file.display());

    let flow = load_flow(&file)?;
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Edges: {}", flow.edges.len());
    println!();

    let override_config = override_config.as_deref().map(parse_override).transpose()?;

    let vault = Arc::new(CredentialVault::new(VaultConfig::from_env()));
    let data_source = Arc::new(InMemoryDataSource::new(vault));
    data_source.load_records(flow.credential_records.clone());

    let runtime = FlowRuntime::with_registry(Arc::new(create_registry()), RuntimeConfig::from_env())
        .with_data_source(data_source);

    let chatflow_id = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "chatflow".to_string());
    tracing::debug!("Registering {} as chatflow {}", file.display(), chatflow_id);
    runtime.register_chatflow(chatflow_id.clone(), flow).await;

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let input = IncomingInput {
        question,
        history: Vec::new(),
        override_config,
    };
    let result = runtime.predict(&chatflow_id, &input).await;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let prediction = result?;
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", prediction.execution_id);
    println!("   Reused build: {}", prediction.reused);
    println!();
    println!("📤 Answer:");
    println!("{}", prediction.output.to_template_string());

    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::BuildStarted { chatflow_id, .. } => {
            println!("▶️  Building chatflow {}", chatflow_id);
        }
        ExecutionEvent::BuildReused { chatflow_id, .. } => {
            println!("♻️  Reusing pooled build of {}", chatflow_id);
        }
        ExecutionEvent::NodeInstantiated {
            node_id,
            node_type,
            depth,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {} ({}) built at depth {} in {}ms", node_id, node_type, depth, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", node_id, message);
            }
            NodeEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", node_id, message);
            }
            NodeEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {}% - {}", node_id, percent, msg);
                } else {
                    println!("     📊 [{}] {}%", node_id, percent);
                }
            }
        },
        ExecutionEvent::BuildCompleted { success, duration_ms, .. } => {
            if success {
                println!("✨ Build completed in {}ms", duration_ms);
            } else {
                println!("💥 Build failed after {}ms", duration_ms);
            }
        }
    }
}

fn validate_chatflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating chatflow: {}", file.display());

    let flow = load_flow(&file)?;
    let summary = validate_flow(&flow)?;
    let registry = create_registry();

    let unknown: Vec<String> = flow
        .nodes
        .iter()
        .filter(|n| registry.resolve(&n.data.name, n.data.version_or_default()).is_err())
        .map(|n| format!("{} v{}", n.data.name, n.data.version_or_default()))
        .collect();

    println!("✅ Chatflow structure is valid:");
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Edges: {}", flow.edges.len());
    println!("   Ending node: {}", summary.plan.ending_node_id);
    println!("   Starting nodes: {}", summary.plan.starting_node_ids.join(", "));
    for (node_id, depth) in &summary.plan.depth_queue {
        println!("     {} → depth {}", node_id, depth);
    }
    if summary.has_feedback_loop {
        println!("   ⚠️  Contains feedback loops; nodes may be rebuilt");
    }
    if !summary.unreachable.is_empty() {
        println!("   ⚠️  Unreachable nodes: {}", summary.unreachable.join(", "));
    }

    let configs = find_available_configs(&flow.nodes);
    if !configs.is_empty() {
        println!();
        println!("⚙️  Overridable inputs:");
        for config in configs {
            println!("   {} / {} ({}): {}", config.node, config.label, config.config_type, config.name);
        }
    }

    if !unknown.is_empty() {
        bail!("Unknown node types: {}", unknown.join(", "));
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = create_registry();

    for node_type in registry.list_node_types() {
        let versions: Vec<String> = registry
            .versions(&node_type)
            .iter()
            .map(|v| format!("v{}", v))
            .collect();
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} [{}] ({})", node_type, versions.join(", "), metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }

    println!();
    println!("🔑 Credential Types:");
    for schema in registry.list_credentials() {
        let fields: Vec<&str> = schema.inputs.iter().map(|i| i.name.as_str()).collect();
        println!("  • {} ({}): {}", schema.name, schema.label, fields.join(", "));
    }
}

fn create_example_chatflow(output: PathBuf) -> Result<()> {
    let mut flow = FlowData::new();

    flow.add_node(
        FlowNode::new("characterTextSplitter_0", "characterTextSplitter")
            .with_category("Text Splitters")
            .with_input("text", "Ferris is the unofficial mascot of Rust. Ferris is a crab.")
            .with_input("chunkSize", 40.0)
            .with_input("chunkOverlap", 10.0)
            .with_position(100.0, 100.0),
    );
    flow.add_node(
        FlowNode::new("textChain_0", "textChain")
            .with_category("Chains")
            .with_input("systemMessage", "Use this context:\n{context}\n\nQuestion: {question}")
            .with_input("context", "{{characterTextSplitter_0.data.instance}}")
            .with_output("output", "textChain")
            .with_position(400.0, 100.0),
    );
    flow.connect("characterTextSplitter_0", "textChain_0");

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example chatflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  chatflow run --file {} --question 'Who is Ferris?'", output.display());

    Ok(())
}

async fn manage_api_keys(command: ApiKeyCommands) -> Result<()> {
    let store = ApiKeyStore::new(VaultConfig::from_env().api_key_path());

    let keys = match command {
        ApiKeyCommands::List => store.list().await?,
        ApiKeyCommands::Add { name } => store.add(&name).await?,
        ApiKeyCommands::Rename { id, name } => store.rename(&id, &name).await?,
        ApiKeyCommands::Delete { id } => store.delete(&id).await?,
        ApiKeyCommands::Verify { id, key } => {
            if store.validate(&id, &key).await? {
                println!("✅ Key is valid");
                return Ok(());
            }
            bail!("Key does not match {}", id);
        }
    };

    println!("🔑 API keys ({}):", store.path().display());
    for key in keys {
        println!("  • {} [{}] created {}", key.key_name, key.id, key.created_at);
        println!("    {}", key.api_key);
    }
    Ok(())
}

async fn manage_credentials(command: CredentialCommands) -> Result<()> {
    let vault = CredentialVault::new(VaultConfig::from_env());

    match command {
        CredentialCommands::Encrypt { data } => {
            let plain: CredentialData =
                serde_json::from_str(&data).context("Credential data must be a JSON object")?;
            println!("{}", vault.encrypt(&plain).await?);
        }
        CredentialCommands::Decrypt {
            blob,
            credential_name,
        } => {
            let data = match credential_name {
                Some(name) => {
                    let registry = create_registry();
                    let schema = registry
                        .credential_schema(&name)
                        .with_context(|| format!("Unknown credential type: {}", name))?;
                    vault.decrypt_redacted(&blob, schema).await
                }
                None => vault.decrypt(&blob).await,
            };
            if data.is_empty() {
                println!("⚠️  Credential could not be decrypted");
            } else {
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
        }
    }
    Ok(())
}
