use std::{path::PathBuf, sync::Arc};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config_db::Settings,
    embedding::Query,
    engine::{Engine, SearchHit},
    error::{self, Error},
    extract::ImageData,
};

const DEFAULT_SEARCH_LIMIT: usize = 10;

struct DocsiftState {
    engine: Engine,
    settings: Settings,
}

#[derive(Clone)]
pub struct DocsiftMcpServer {
    state: Arc<DocsiftState>,
    tool_router: ToolRouter<Self>,
}

impl DocsiftMcpServer {
    fn new(engine: Engine, settings: Settings) -> Self {
        Self {
            state: Arc::new(DocsiftState { engine, settings }),
            tool_router: Self::tool_router(),
        }
    }

    /// Run a blocking engine call off the async executor.
    async fn blocking<T, F>(&self, f: F) -> Result<T, rmcp::ErrorData>
    where
        T: Send + 'static,
        F: FnOnce(&DocsiftState) -> T + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || f(&state))
            .await
            .map_err(|e| mcp_error("engine task failed", e))
    }
}

#[tool_router(router = tool_router)]
impl DocsiftMcpServer {
    /// Search indexed documents by text, or by an image file.
    #[tool(
        name = "docsift_search",
        description = "Search indexed documents by meaning. Pass `query` for text search or `imagePath` to search with an image. Text queries also match images and vice versa."
    )]
    pub async fn docsift_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

        let (query, label) = match (params.query, params.image_path) {
            (Some(text), None) => (Query::Text(text.clone()), text),
            (None, Some(path)) => {
                let image = ImageData::from_path(&path)
                    .map_err(|e| mcp_error("failed to read query image", e))?;
                (Query::Image(image), format!("image {}", path.display()))
            }
            _ => {
                return Err(rmcp::ErrorData::invalid_params(
                    "exactly one of `query` or `imagePath` is required",
                    None,
                ));
            }
        };

        let results = self
            .blocking(move |state| state.engine.search_documents(&query, limit))
            .await?;
        let hits = match results {
            Ok(hits) => hits,
            Err(Error::EmptyResult) => Vec::new(),
            Err(e) => return Err(mcp_error("search failed", e)),
        };

        let summary = format_search_summary(&hits, &label);
        let structured = serde_json::to_value(SearchResponse {
            query: label,
            result_count: hits.len(),
            results: hits,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Reconcile the index with the configured root directory.
    #[tool(
        name = "docsift_sync",
        description = "Re-scan the configured directory and index new, changed and deleted files."
    )]
    pub async fn docsift_sync(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let report = self
            .blocking(|state| {
                let root = state.settings.require_root()?.to_path_buf();
                let filter = state.settings.filter()?;
                state.engine.sync(&root, &filter)
            })
            .await?
            .map_err(|e| mcp_error("sync failed", e))?;

        let summary = format!(
            "Sync finished: {} added, {} updated, {} repaired, {} deleted, {} unchanged, {} failed",
            report.added,
            report.updated,
            report.repaired,
            report.deleted,
            report.unchanged,
            report.failed.len()
        );
        let structured = serde_json::to_value(&report)
            .map_err(|e| mcp_error("failed to serialize sync report", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Report document and vector counts.
    #[tool(
        name = "docsift_status",
        description = "Show how many documents and vectors are indexed and which directory is configured."
    )]
    pub async fn docsift_status(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let stats = self
            .blocking(|state| state.engine.stats())
            .await?
            .map_err(|e| mcp_error("failed to read index stats", e))?;
        let root = self
            .state
            .settings
            .root
            .as_ref()
            .map(|p| p.display().to_string());

        let summary = format!(
            "{} documents, {} vectors, root: {}",
            stats.documents,
            stats.vectors,
            root.as_deref().unwrap_or("(not configured)")
        );
        let mut structured = serde_json::to_value(&stats)
            .map_err(|e| mcp_error("failed to serialize index stats", e))?;
        structured["root"] = json!(root);

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocsiftMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docsift", env!("CARGO_PKG_VERSION")).with_title("docsift MCP"),
            )
            .with_instructions(
                "Use docsift_search to find local documents (text, PDF, DOCX, images) by meaning. Run docsift_sync first if files changed.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Text query.
    pub query: Option<String>,
    /// Path to an image to search with instead of text.
    pub image_path: Option<PathBuf>,
    /// Maximum number of documents (default: 10).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    result_count: usize,
    results: Vec<SearchHit>,
}

fn format_search_summary(results: &[SearchHit], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for hit in results {
        lines.push(format!("#{} {:.3} {}", hit.doc_id, hit.score, hit.path));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(engine: Engine, settings: Settings) -> error::Result<()> {
    let server = DocsiftMcpServer::new(engine, settings);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            Error::Config(format!("MCP server initialization failed: {e}"))
        })?;
        running
            .waiting()
            .await
            .map_err(|e| Error::Config(format!("MCP server error: {e}")))?;
        Ok(())
    })
}
