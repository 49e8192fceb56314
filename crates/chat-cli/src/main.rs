//! `chat` terminal client
//!
//! Chats with Claude, Groq or Ollama and lets the model call tools served by
//! MCP servers started as child processes: the document server
//! (`python mcp_server.py`, or `uv run mcp_server.py` with `USE_UV=1`), each
//! extra script through `uv run`, and any `--server` command line.
//!
//! ```text
//! chat weather_server.py --server "node tools/index.js"
//! ```

mod repl;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_core::{Orchestrator, ToolRegistry};
use chat_runtime::{build_provider, McpClient, McpServerConfig, RuntimeConfig};

#[derive(Debug, Parser)]
#[command(name = "chat", version, about = "Chat with an LLM that can call MCP tools")]
struct Args {
    /// Extra tool server scripts, each started with `uv run <script>`
    #[arg(value_name = "SCRIPT")]
    scripts: Vec<String>,

    /// Extra tool server command line, e.g. "node tools/index.js" (repeatable)
    #[arg(short, long = "server", value_name = "COMMAND")]
    servers: Vec<String>,

    /// Command line of the document server
    #[arg(long, value_name = "COMMAND", env = "CHAT_DOC_SERVER")]
    doc_server: Option<String>,

    /// Don't start the document server
    #[arg(long)]
    no_doc_server: bool,

    /// Maximum model calls per user turn
    #[arg(long, env = "CHAT_MAX_TURNS")]
    max_turns: Option<usize>,
}

impl Args {
    /// Every tool server command line to start, document server first
    fn server_commands(&self, use_uv: bool) -> Vec<String> {
        let doc_server = if self.no_doc_server {
            None
        } else if let Some(command) = &self.doc_server {
            Some(command.clone())
        } else if use_uv {
            Some("uv run mcp_server.py".to_string())
        } else {
            Some("python mcp_server.py".to_string())
        };

        doc_server
            .into_iter()
            .chain(self.scripts.iter().map(|script| format!("uv run {}", script)))
            .chain(self.servers.iter().cloned())
            .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Logs go to stderr so they don't interleave with answers
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = RuntimeConfig::from_env()?;
    if let Some(max_turns) = args.max_turns {
        config.session.max_turns = max_turns;
    }

    let provider = build_provider(&config.provider)?;
    match provider.health_check().await {
        Ok(true) => tracing::info!(provider = %provider.info().name, "Provider reachable"),
        Ok(false) | Err(_) => {
            tracing::warn!(provider = %provider.info().name, "Provider health check failed; turns may fail");
        }
    }

    // Start tool servers
    let mut tools = ToolRegistry::new();
    let use_uv = std::env::var("USE_UV").is_ok_and(|v| v == "1");
    let commands = args.server_commands(use_uv);
    let mut servers: Vec<Arc<McpClient>> = Vec::with_capacity(commands.len());
    for command_line in &commands {
        let client = McpClient::connect(McpServerConfig::parse(command_line)?).await?;
        client.register_tools(&mut tools).await?;
        servers.push(client);
    }

    tracing::info!("Registered {} tools", tools.len());
    for name in tools.names() {
        tracing::debug!("  • {}", name);
    }

    let chat = Orchestrator::builder()
        .provider(provider)
        .config(config.session)
        .tools(tools)
        .build()?;

    let result = repl::run(chat).await;

    for server in &servers {
        if let Err(e) = server.shutdown().await {
            tracing::warn!(server = %server.name(), error = %e, "Failed to stop tool server");
        }
    }
    result
}
