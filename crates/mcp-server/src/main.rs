//! Recall MCP Server
//!
//! Long-term, file-backed memory for AI agents via the MCP protocol. Every category is a
//! markdown file under the memory directory; the model behind the connected client does
//! the reading and writing through `sampling/createMessage`.
//!
//! ## Tools
//!
//! - `query` - Answer a question from memory
//! - `ingest` - File new findings into memory
//! - `list` - List categories with their descriptions
//! - `get` - Read one category
//!
//! ## Usage
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "recall": {
//!       "command": "recall-mcp",
//!       "args": ["./.memory"]
//!     }
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use recall_store::{MemoryConfig, Tuning};
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::path::PathBuf;
use std::sync::Arc;

mod logging;
mod sampler;
mod service;

use logging::ClientLogSink;
use service::RecallService;

#[derive(Debug, Parser)]
#[command(name = "recall-mcp", version, about = "File-backed memory for AI agents over MCP")]
struct Args {
    /// Directory holding the memory categories (created if missing)
    #[arg(env = "RECALL_MEMORY_DIR")]
    memory_dir: PathBuf,

    /// Extra context for every prompt, relative to the memory directory
    #[arg(long, env = "RECALL_CONTEXT")]
    context: Option<PathBuf>,

    /// TOML file with tuning overrides
    #[arg(long, env = "RECALL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stderr plus client notifications; stdout is for the MCP protocol
    let log_sink = Arc::new(ClientLogSink::new());
    logging::init(log_sink.clone()).context("Failed to install logger")?;

    let args = Args::parse();
    let config = MemoryConfig::new(&args.memory_dir, args.context.as_deref())
        .await
        .context("Invalid memory directory")?;
    let tuning = match &args.config {
        Some(path) => Tuning::load(path).await.context("Invalid tuning file")?,
        None => Tuning::default(),
    };

    log::info!(
        "Starting Recall MCP server for {}",
        config.memory_dir.display()
    );

    let service = RecallService::new(config, tuning, log_sink);
    let server = service.clone().serve(stdio()).await?;

    server.waiting().await?;
    service.shutdown().await;

    log::info!("Recall MCP server stopped");
    Ok(())
}
