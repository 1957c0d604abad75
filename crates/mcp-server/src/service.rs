use crate::logging::ClientLogSink;
use crate::sampler::PeerSampler;
use recall_query::Memory;
use recall_store::{
    render_summary, version_lock_wait_ms_last, version_lock_wait_ms_max, MemoryConfig, Tuning,
};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, InitializeRequestParam, InitializeResult,
    ServerCapabilities, ServerInfo, SetLevelRequestParam,
};
use rmcp::schemars;
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::OnceCell;

const INSTRUCTIONS: &str = "Recall is a long-term memory for this codebase and its user. \
Call 'query' before searching the codebase; if it has nothing, search, then call 'ingest' with what you learned. \
Use 'list' to see every category and 'get' to read one in full.";

/// Recall MCP service. Memory is opened once the client has initialized, since every
/// model call is sampled through that client.
#[derive(Clone)]
pub struct RecallService {
    config: MemoryConfig,
    tuning: Tuning,
    sampler: Arc<PeerSampler>,
    log_sink: Arc<ClientLogSink>,
    memory: Arc<OnceCell<Arc<Memory>>>,
    tool_router: ToolRouter<Self>,
}

impl RecallService {
    pub fn new(config: MemoryConfig, tuning: Tuning, log_sink: Arc<ClientLogSink>) -> Self {
        Self {
            config,
            tuning,
            sampler: Arc::new(PeerSampler::new()),
            log_sink,
            memory: Arc::new(OnceCell::new()),
            tool_router: Self::tool_router(),
        }
    }

    async fn memory(&self) -> anyhow::Result<Arc<Memory>> {
        let memory = self
            .memory
            .get_or_try_init(|| async {
                let memory =
                    Memory::create(self.config.clone(), &self.tuning, self.sampler.clone()).await?;
                memory.initialize(true).await?;
                Ok::<_, anyhow::Error>(memory)
            })
            .await?;
        Ok(memory.clone())
    }

    /// Stops watching and lets a scheduled reconciliation batch finish before exit.
    pub async fn shutdown(&self) {
        let Some(memory) = self.memory.get() else {
            return;
        };
        memory.stop_watching();
        memory.flush().await;
        log::info!(
            "Memory closed (version lock wait: last {}ms, max {}ms)",
            version_lock_wait_ms_last(),
            version_lock_wait_ms_max()
        );
    }
}

fn error_result(err: impl std::fmt::Display) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!("Error: {err}"))])
}

// ============================================================================
// Tool Input Schemas
// ============================================================================

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct QueryRequest {
    #[schemars(description = "Natural-language question to answer from memory")]
    pub query: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct IngestRequest {
    #[schemars(description = "Findings to remember, written so they make sense on their own")]
    pub content: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetRequest {
    #[schemars(description = "Category name, e.g. 'lang/rust'")]
    pub category: String,
}

// ============================================================================
// Tool Implementations
// ============================================================================

#[tool_router]
impl RecallService {
    #[tool(description = "Answer a question from stored memory. Returns a canned hint when nothing relevant is stored.")]
    pub async fn query(
        &self,
        Parameters(request): Parameters<QueryRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.query.trim().is_empty() {
            return Ok(error_result("query must not be empty"));
        }
        let memory = match self.memory().await {
            Ok(memory) => memory,
            Err(e) => return Ok(error_result(e)),
        };
        match memory.query_memory(&request.query).await {
            Ok(answer) => Ok(CallToolResult::success(vec![Content::text(answer)])),
            Err(e) => Ok(error_result(e)),
        }
    }

    #[tool(description = "Store new findings in memory. The content is filed into one or more categories.")]
    pub async fn ingest(
        &self,
        Parameters(request): Parameters<IngestRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.content.trim().is_empty() {
            return Ok(error_result("content must not be empty"));
        }
        let memory = match self.memory().await {
            Ok(memory) => memory,
            Err(e) => return Ok(error_result(e)),
        };
        let report = match memory.ingest_memory(&request.content).await {
            Ok(report) => report,
            Err(e) => return Ok(error_result(e)),
        };
        let text = serde_json::to_string_pretty(&report).unwrap_or_default();
        if report.is_success() {
            Ok(CallToolResult::success(vec![Content::text(text)]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(text)]))
        }
    }

    #[tool(description = "List every memory category with its description.")]
    pub async fn list(&self) -> Result<CallToolResult, McpError> {
        let memory = match self.memory().await {
            Ok(memory) => memory,
            Err(e) => return Ok(error_result(e)),
        };
        match memory.list_categories().await {
            Ok(versions) => Ok(CallToolResult::success(vec![Content::text(
                render_summary(&versions),
            )])),
            Err(e) => Ok(error_result(e)),
        }
    }

    #[tool(description = "Read the full markdown of one memory category.")]
    pub async fn get(
        &self,
        Parameters(request): Parameters<GetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let memory = match self.memory().await {
            Ok(memory) => memory,
            Err(e) => return Ok(error_result(e)),
        };
        match memory.get_category(&request.category).await {
            Ok(Some(content)) => Ok(CallToolResult::success(vec![Content::text(content)])),
            Ok(None) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Category '{}' does not exist yet.",
                request.category
            ))])),
            Err(e) => Ok(error_result(e)),
        }
    }
}

#[tool_handler]
impl ServerHandler for RecallService {
    #[allow(clippy::manual_async_fn)]
    fn initialize(
        &self,
        request: InitializeRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = std::result::Result<InitializeResult, McpError>> + Send + '_
    {
        async move {
            if context.peer.peer_info().is_none() {
                context.peer.set_peer_info(request.clone());
            }
            if request.capabilities.sampling.is_none() {
                log::warn!("Client did not declare sampling support; memory updates will fail");
            }
            self.sampler.connect(context.peer.clone());
            self.log_sink.connect(context.peer.clone());

            // Open memory in the background so the handshake is not held up by the first scan.
            let service = self.clone();
            tokio::spawn(async move {
                if let Err(err) = service.memory().await {
                    log::error!("Failed to open memory: {err:#}");
                }
            });

            let mut info = self.get_info();
            info.protocol_version = request.protocol_version;
            Ok(info)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn set_level(
        &self,
        request: SetLevelRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = std::result::Result<(), McpError>> + Send + '_ {
        async move {
            self.log_sink.set_level(request.level);
            Ok(())
        }
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder()
                .enable_logging()
                .enable_tools()
                .build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}
