//! MCP tool handlers.
//!
//! 1. ingest_document  – upload a local file and index it
//! 2. retry_ingest     – index an earlier upload again by file id
//! 3. create_session   – start a chat session
//! 4. post_question    – ask a question in a session
//! 5. retry_question   – answer a session's pending question again
//! 6. list_messages    – messages of a session in order
//! 7. list_sessions    – all sessions
//! 8. list_documents   – indexed documents with chunk counts
//! 9. session_usage    – token totals for a session
use crate::blocking::run_blocking;
use crate::db::SqliteStore;
use crate::error::{ChatError, IngestError};
use crate::mcp::server::McpContext;
use crate::uploads::{self, DocumentHandle};
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct IngestParams {
    /// Path to a .pdf, .txt, .md, .docx, .xlsx or .xls file
    filepath: String,
    /// Document name to record (defaults to the file name)
    name: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct FileParam {
    /// File id returned by ingest_document
    file_id: i64,
}

#[derive(Deserialize, JsonSchema)]
struct CreateSessionParams {
    /// Owner of the session
    owner: String,
}

#[derive(Deserialize, JsonSchema)]
struct QuestionParams {
    /// Session id returned by create_session
    session_id: i64,
    /// The question to answer
    question: String,
}

#[derive(Deserialize, JsonSchema)]
struct SessionParam {
    /// Session id
    session_id: i64,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(&value).unwrap_or_default(),
    )]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

fn ingest_error_kind(err: &IngestError) -> &'static str {
    match err {
        IngestError::UnsupportedFormat(_) => "UnsupportedFormat",
        IngestError::IngestionFailed { .. } => "IngestionFailed",
        IngestError::ChunkingFailed(_) => "ChunkingFailed",
        IngestError::Read { .. } | IngestError::Extraction(_) => "ExtractionFailed",
    }
}

fn chat_error_kind(err: &ChatError) -> &'static str {
    match err {
        ChatError::EmptyQuestion => "EmptyQuestion",
        ChatError::SessionNotFound(_) => "SessionNotFound",
        ChatError::NoPendingQuestion(_) => "NoPendingQuestion",
        ChatError::RetrievalUnavailable(_) => "RetrievalUnavailable",
        ChatError::GenerationFailed(_) | ChatError::GenerationTimedOut(_) => "GenerationFailed",
        ChatError::Store(_) | ChatError::Blocking(_) => "StoreError",
    }
}

fn chat_error_result(err: &ChatError) -> Result<CallToolResult, McpError> {
    error_result(&format!("{}: {}", chat_error_kind(err), err))
}

/// Run a store read on the blocking pool
async fn read_store<T, F>(store: &Arc<SqliteStore>, f: F) -> Result<T, McpError>
where
    F: FnOnce(&SqliteStore) -> Result<T, crate::db::StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    run_blocking(move || f(&store))
        .await
        .map_err(|e| McpError::internal_error(format!("{e}"), None))?
        .map_err(|e| McpError::internal_error(format!("store error: {e}"), None))
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: McpContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

impl AppTools {
    async fn index_upload(&self, handle: &DocumentHandle) -> Result<CallToolResult, McpError> {
        match self.ctx.indexer.ingest(handle).await {
            Ok(chunks) => json_result(serde_json::json!({
                "file_id": handle.file_id,
                "document": handle.name,
                "uploaded_at": handle.uploaded_at.to_rfc3339(),
                "chunks": chunks,
            })),
            Err(e) => error_result(&format!(
                "{}: {} (file_id {})",
                ingest_error_kind(&e),
                e,
                handle.file_id
            )),
        }
    }
}

#[tool_router]
impl AppTools {
    pub fn new(ctx: McpContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    // ── Tool 1: ingest_document ─────────────────────────────────────

    #[tool(description = "Upload a local document (pdf, txt, md, docx, xlsx, xls) and index it for retrieval")]
    async fn ingest_document(
        &self,
        params: Parameters<IngestParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.filepath.is_empty() {
            return error_result("filepath is required");
        }

        let path = Path::new(&p.filepath);
        let name = match p.name {
            Some(name) if !name.is_empty() => name,
            _ => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => return error_result(&format!("cannot read {}: {e}", p.filepath)),
        };

        let store = Arc::clone(&self.ctx.store);
        let upload_dir = self.ctx.config.upload_dir();
        let handle = run_blocking(move || uploads::receive_upload(&store, &upload_dir, &name, &bytes))
            .await
            .map_err(|e| McpError::internal_error(format!("{e}"), None))?
            .map_err(|e| McpError::internal_error(format!("upload failed: {e:#}"), None))?;

        self.index_upload(&handle).await
    }

    // ── Tool 2: retry_ingest ────────────────────────────────────────

    #[tool(description = "Index a previously uploaded file again, e.g. after IngestionFailed")]
    async fn retry_ingest(&self, params: Parameters<FileParam>) -> Result<CallToolResult, McpError> {
        let file_id = params.0.file_id;
        let store = Arc::clone(&self.ctx.store);
        let handle = run_blocking(move || uploads::find_upload(&store, file_id))
            .await
            .map_err(|e| McpError::internal_error(format!("{e}"), None))?
            .map_err(|e| McpError::internal_error(format!("lookup failed: {e:#}"), None))?;

        match handle {
            Some(handle) => self.index_upload(&handle).await,
            None => error_result(&format!("file {file_id} not found")),
        }
    }

    // ── Tool 3: create_session ──────────────────────────────────────

    #[tool(description = "Create a new chat session")]
    async fn create_session(
        &self,
        params: Parameters<CreateSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let owner = params.0.owner;
        if owner.trim().is_empty() {
            return error_result("owner is required");
        }
        match self.ctx.answerer.create_session(&owner).await {
            Ok(session) => json_result(serde_json::json!({ "session": session })),
            Err(e) => chat_error_result(&e),
        }
    }

    // ── Tool 4: post_question ───────────────────────────────────────

    #[tool(
        description = "Ask a question in a chat session. The answer uses the indexed documents and the session's earlier turns, and reports token usage."
    )]
    async fn post_question(
        &self,
        params: Parameters<QuestionParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        match self.ctx.answerer.post_question(p.session_id, &p.question).await {
            Ok(answer) => json_result(serde_json::json!({ "answer": answer })),
            Err(e) => chat_error_result(&e),
        }
    }

    // ── Tool 5: retry_question ──────────────────────────────────────

    #[tool(description = "Answer the session's last unanswered question (after a failed post_question)")]
    async fn retry_question(
        &self,
        params: Parameters<SessionParam>,
    ) -> Result<CallToolResult, McpError> {
        match self.ctx.answerer.retry_pending(params.0.session_id).await {
            Ok(answer) => json_result(serde_json::json!({ "answer": answer })),
            Err(e) => chat_error_result(&e),
        }
    }

    // ── Tool 6: list_messages ───────────────────────────────────────

    #[tool(description = "List the messages of a chat session in order")]
    async fn list_messages(
        &self,
        params: Parameters<SessionParam>,
    ) -> Result<CallToolResult, McpError> {
        match self.ctx.answerer.list_messages(params.0.session_id).await {
            Ok(messages) => json_result(serde_json::json!({ "messages": messages })),
            Err(e) => chat_error_result(&e),
        }
    }

    // ── Tool 7: list_sessions ───────────────────────────────────────

    #[tool(description = "List chat sessions, newest first")]
    async fn list_sessions(&self) -> Result<CallToolResult, McpError> {
        let sessions = read_store(&self.ctx.store, |s| s.list_sessions()).await?;
        json_result(serde_json::json!({ "sessions": sessions }))
    }

    // ── Tool 8: list_documents ──────────────────────────────────────

    #[tool(description = "Retrieve list of indexed documents")]
    async fn list_documents(&self) -> Result<CallToolResult, McpError> {
        let docs = read_store(&self.ctx.store, |s| s.list_documents()).await?;

        let documents: Vec<serde_json::Value> = docs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "uploaded_at": d.uploaded_at.to_rfc3339(),
                    "indexed_at": d.indexed_at.to_rfc3339(),
                    "chunks": d.chunk_count,
                })
            })
            .collect();

        json_result(serde_json::json!({ "documents": documents }))
    }

    // ── Tool 9: session_usage ───────────────────────────────────────

    #[tool(description = "Total input and output tokens used by a chat session")]
    async fn session_usage(
        &self,
        params: Parameters<SessionParam>,
    ) -> Result<CallToolResult, McpError> {
        let session_id = params.0.session_id;
        match read_store(&self.ctx.store, move |s| s.session_usage(session_id)).await {
            Ok(usage) => json_result(serde_json::json!({
                "usage": usage,
                "total_tokens": usage.total_tokens(),
            })),
            Err(e) => error_result(&e.message),
        }
    }
}
