//! HTTP + WebSocket API.
//!
//! Exposes the question-answering pipeline over JSON HTTP, plus a
//! WebSocket variant that streams answer tokens as they arrive.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/upload` | Upload and index a document (multipart) |
//! | `GET`  | `/api/documents` | List the caller's documents |
//! | `DELETE` | `/api/documents/{filename}` | Delete a document record |
//! | `POST` | `/api/chat` | Ask a question, get a grounded answer |
//! | `POST` | `/api/retrieve` | Retrieval only, with distances |
//! | `POST` | `/api/sessions/new` | Create a conversation session |
//! | `GET`  | `/api/sessions` | List sessions, most recent first |
//! | `GET`  | `/api/sessions/{id}` | Session metadata + history |
//! | `PATCH` | `/api/sessions/{id}` | Rename a session |
//! | `DELETE` | `/api/sessions/{id}` | Delete a session |
//! | `POST` | `/api/sessions/{id}/clear` | Clear history, keep session |
//! | `GET`  | `/ws/chat` | Streaming chat over WebSocket |
//! | `GET`  | `/health` | Health check (unauthenticated) |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "rate_limited", "message": "..." } }
//! ```
//!
//! Codes: `validation_failed` (400), `authentication_failed` (401),
//! `not_found` (404), `rate_limited` (429), `no_extractable_text` (400),
//! `unsupported_type` (400), `generation_timeout` (504),
//! `generation_failed` (502), `internal` (500).
//!
//! # WebSocket protocol
//!
//! Each client message is `{token, question, session_id?, document_ids?}`.
//! The server answers with ordered events: `session_id`, `sources`, zero
//! or more `token`s, then `done` — or a single terminal `error`.

use std::collections::HashSet;
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::{bearer_token, TokenVerifier};
use crate::config::Config;
use crate::error::ServiceError;
use crate::indexer::{IndexLocks, Indexer};
use crate::llm::{LlmService, StreamEvent};
use crate::memory::ChatMemory;
use crate::models::ScoredChunk;
use crate::rate_limit::RateLimiter;
use crate::retriever::Retriever;

const NO_SOURCES_ANSWER: &str =
    "I couldn't find any relevant information. Please upload documents first.";

/// Bounded history reload when reconstructing a session from the durable
/// log. Larger than the prompt-history bound on purpose: session memory
/// applies its own trimming on replay.
const SESSION_RELOAD_TURNS: usize = 100;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub memory: Arc<ChatMemory>,
    pub rate_limiter: Arc<RateLimiter>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub llm: Arc<LlmService>,
    pub indexer: Arc<Indexer>,
    pub index_locks: Arc<IndexLocks>,
    pub embedder: Arc<dyn crate::embedding::EmbeddingProvider>,
}

impl AppState {
    fn retriever_for(&self, user_id: &str) -> Retriever {
        Retriever::new(
            user_id,
            self.config.retrieval.top_k,
            self.config.retrieval.oversample_factor,
            self.config.embedding.dims,
            self.config.storage.vector_store_root(),
            self.embedder.clone(),
        )
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<String, ServiceError> {
        let header = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Authentication("missing authorization header".to_string())
            })?;
        self.verifier.verify(bearer_token(header)?)
    }
}

/// Starts the HTTP server. Runs until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/upload", post(handle_upload))
        .route("/api/documents", get(handle_list_documents))
        .route("/api/documents/{filename}", delete(handle_delete_document))
        .route("/api/chat", post(handle_chat))
        .route("/api/retrieve", post(handle_retrieve))
        .route("/api/sessions/new", post(handle_create_session))
        .route("/api/sessions", get(handle_list_sessions))
        .route(
            "/api/sessions/{id}",
            get(handle_get_session)
                .patch(handle_update_session)
                .delete(handle_delete_session),
        )
        .route("/api/sessions/{id}/clear", post(handle_clear_session))
        .route("/ws/chat", get(handle_chat_ws))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!("listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct AppError(ServiceError);

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        AppError(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError(ServiceError::Internal(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::Validation(_)
            | ServiceError::NoExtractableText
            | ServiceError::UnsupportedType(_) => StatusCode::BAD_REQUEST,
            ServiceError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::GenerationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
            ServiceError::DimensionMismatch { .. } | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            error!("request failed: {:#}", self.0);
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============ Validation ============

/// Reject malformed questions before any external call.
fn validate_question(question: &str) -> Result<(), ServiceError> {
    let len = question.chars().count();
    if question.trim().chars().count() < 3 {
        return Err(ServiceError::Validation(
            "Query too short. Please provide at least 3 characters.".to_string(),
        ));
    }
    if len > 1000 {
        return Err(ServiceError::Validation(
            "Query too long. Maximum 1000 characters.".to_string(),
        ));
    }
    Ok(())
}

// ============ Context assembly ============

/// Context text and citation labels for a ranked hit list. Source labels
/// are deduplicated preserving rank order so responses are deterministic.
fn build_context(hits: &[ScoredChunk]) -> (String, Vec<String>) {
    let mut blocks = Vec::with_capacity(hits.len());
    let mut sources: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for hit in hits {
        blocks.push(hit.chunk.text.clone());
        let label = format!("{} (page {})", hit.chunk.filename, hit.chunk.page);
        if seen.insert(label.clone()) {
            sources.push(label);
        }
    }

    (blocks.join("\n\n"), sources)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/upload ============

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = state.authenticate(&headers)?;

    let mut payload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Validation(format!("invalid multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| ServiceError::Validation("file field needs a filename".into()))?;
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ServiceError::Validation(format!("failed to read upload: {}", e)))?;
            payload = Some((filename, bytes.to_vec()));
        }
    }
    let (filename, bytes) =
        payload.ok_or_else(|| ServiceError::Validation("missing 'file' field".to_string()))?;

    // Strip any path components a client smuggled into the filename.
    let filename = FsPath::new(&filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    let ext = FsPath::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !crate::extract::SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ServiceError::UnsupportedType(ext).into());
    }

    // Stage the upload on disk for the extractor.
    let user_dir = state.config.storage.upload_dir().join(&user_id);
    tokio::fs::create_dir_all(&user_dir)
        .await
        .map_err(|e| ServiceError::Internal(e.into()))?;
    let file_path = user_dir.join(&filename);
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| ServiceError::Internal(e.into()))?;

    let result = index_upload(&state, &user_id, &file_path).await;

    // The staged file is scratch space either way.
    let _ = tokio::fs::remove_file(&file_path).await;

    let (document_id, pages, chunks) = result?;
    info!(user_id, filename, document_id, chunks, "document uploaded");

    Ok(Json(serde_json::json!({
        "message": "File uploaded and processed successfully",
        "user_id": user_id,
        "document": {
            "id": document_id,
            "filename": filename,
            "pages": pages,
            "chunks": chunks,
        }
    })))
}

/// Extract, chunk, and index one staged upload.
///
/// Chunking runs before the document record is inserted, so an empty
/// document is rejected without leaving an orphan row. The index write
/// runs under the user's write lock; concurrent uploads for the same user
/// serialize here.
async fn index_upload(
    state: &AppState,
    user_id: &str,
    file_path: &FsPath,
) -> Result<(i64, usize, usize), ServiceError> {
    let document = {
        let path = file_path.to_path_buf();
        tokio::task::spawn_blocking(move || crate::extract::load(&path))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))??
    };

    if document.pages.is_empty() {
        return Err(ServiceError::NoExtractableText);
    }

    let lock = state.index_locks.lock_for(user_id).await;
    let _guard = lock.lock().await;

    // Probe with a placeholder id: chunk emptiness does not depend on it.
    if state.indexer.chunk(&document, 0).is_empty() {
        return Err(ServiceError::NoExtractableText);
    }

    let document_id = state
        .llm
        .store()
        .insert_document(user_id, &document.filename)
        .await
        .map_err(ServiceError::Internal)?;

    let chunks = state.indexer.chunk(&document, document_id);
    let count = state.indexer.index_chunks(user_id, chunks).await?;

    Ok((document_id, document.pages.len(), count))
}

// ============ GET /api/documents, DELETE /api/documents/{filename} ============

async fn handle_list_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = state.authenticate(&headers)?;
    let documents = state
        .llm
        .store()
        .list_documents(&user_id)
        .await
        .map_err(ServiceError::Internal)?;

    Ok(Json(serde_json::json!({
        "user_id": user_id,
        "documents": documents,
    })))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = state.authenticate(&headers)?;

    // Removes the metadata record only; stored vectors stay behind until
    // the index is rebuilt.
    state
        .llm
        .store()
        .delete_document(&user_id, &filename)
        .await
        .map_err(ServiceError::Internal)?;

    Ok(Json(serde_json::json!({
        "message": format!("Document {} deleted", filename),
        "user_id": user_id,
    })))
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub document_ids: Option<Vec<i64>>,
}

async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = state.authenticate(&headers)?;

    validate_question(&payload.question)?;
    state.rate_limiter.check(&user_id)?;

    let session_id = payload
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    state.memory.create_session(&session_id, None);

    let document_ids: Option<HashSet<i64>> =
        payload.document_ids.map(|ids| ids.into_iter().collect());
    let hits = state
        .retriever_for(&user_id)
        .retrieve(&payload.question, document_ids.as_ref())
        .await
        .map_err(ServiceError::Internal)?;

    if hits.is_empty() {
        // Empty retrieval is a valid answer-with-no-sources state.
        state
            .llm
            .record_turn(
                &state.memory,
                &user_id,
                &session_id,
                &payload.question,
                NO_SOURCES_ANSWER,
                &[],
            )
            .await;

        return Ok(Json(serde_json::json!({
            "answer": NO_SOURCES_ANSWER,
            "sources": [],
            "session_id": session_id,
            "user_id": user_id,
        })));
    }

    let (context, sources) = build_context(&hits);

    let answer = state
        .llm
        .generate_answer(&payload.question, &context, &user_id, &session_id)
        .await?;

    state
        .llm
        .record_turn(
            &state.memory,
            &user_id,
            &session_id,
            &payload.question,
            &answer,
            &sources,
        )
        .await;

    Ok(Json(serde_json::json!({
        "answer": answer,
        "sources": sources,
        "session_id": session_id,
        "conversation_turns": state.memory.get_history(&session_id).len(),
        "user_id": user_id,
    })))
}

// ============ POST /api/retrieve ============

async fn handle_retrieve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = state.authenticate(&headers)?;
    validate_question(&payload.question)?;

    let document_ids: Option<HashSet<i64>> =
        payload.document_ids.map(|ids| ids.into_iter().collect());
    let results = state
        .retriever_for(&user_id)
        .retrieve(&payload.question, document_ids.as_ref())
        .await
        .map_err(ServiceError::Internal)?;

    Ok(Json(serde_json::json!({
        "question": payload.question,
        "results": results,
        "user_id": user_id,
    })))
}

// ============ Session endpoints ============

#[derive(Deserialize, Default)]
pub struct SessionCreateRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Deserialize)]
pub struct SessionUpdateRequest {
    pub title: String,
}

async fn handle_create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<SessionCreateRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = state.authenticate(&headers)?;

    let session_id = Uuid::new_v4().to_string();
    let title = payload.and_then(|Json(p)| p.title);
    state.memory.create_session(&session_id, title);

    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "metadata": state.memory.get_session_metadata(&session_id),
        "user_id": user_id,
    })))
}

async fn handle_list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = state.authenticate(&headers)?;
    Ok(Json(serde_json::json!({
        "sessions": state.memory.list_sessions(),
        "user_id": user_id,
    })))
}

async fn handle_get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = state.authenticate(&headers)?;

    // Memory is a cache over the durable log: on a miss, replay the log
    // back through it so restarts do not lose conversations.
    if state.memory.get_session_metadata(&session_id).is_none()
        || state.memory.get_history(&session_id).is_empty()
    {
        let rows = state
            .llm
            .store()
            .load_history(&user_id, Some(&session_id), SESSION_RELOAD_TURNS)
            .await
            .map_err(ServiceError::Internal)?;

        state.memory.create_session(&session_id, None);
        for row in &rows {
            state.memory.add_turn(&session_id, &row.question, &row.answer);
        }
    }

    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "metadata": state.memory.get_session_metadata(&session_id),
        "history": state.memory.get_history(&session_id),
        "user_id": user_id,
    })))
}

async fn handle_update_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<SessionUpdateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = state.authenticate(&headers)?;

    if !state.memory.update_session_title(&session_id, &payload.title) {
        return Err(ServiceError::NotFound("Session".to_string()).into());
    }

    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "metadata": state.memory.get_session_metadata(&session_id),
        "user_id": user_id,
    })))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = state.authenticate(&headers)?;

    if !state.memory.delete_session(&session_id) {
        return Err(ServiceError::NotFound("Session".to_string()).into());
    }
    state
        .llm
        .store()
        .delete_session_chats(&user_id, &session_id)
        .await
        .map_err(ServiceError::Internal)?;

    Ok(Json(serde_json::json!({
        "message": format!("Session {} deleted", session_id),
        "user_id": user_id,
    })))
}

async fn handle_clear_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user_id = state.authenticate(&headers)?;

    if !state.memory.clear(&session_id) {
        return Err(ServiceError::NotFound("Session".to_string()).into());
    }

    Ok(Json(serde_json::json!({
        "message": format!("Session {} cleared", session_id),
        "user_id": user_id,
    })))
}

// ============ GET /ws/chat ============

#[derive(Deserialize)]
struct WsRequest {
    token: String,
    question: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    document_ids: Option<Vec<i64>>,
}

async fn handle_chat_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| chat_ws_loop(socket, state))
}

async fn send_event(socket: &mut WebSocket, event: serde_json::Value) -> bool {
    socket
        .send(Message::Text(event.to_string().into()))
        .await
        .is_ok()
}

async fn send_error(socket: &mut WebSocket, message: impl std::fmt::Display) -> bool {
    send_event(
        socket,
        serde_json::json!({ "type": "error", "message": message.to_string() }),
    )
    .await
}

async fn chat_ws_loop(mut socket: WebSocket, state: AppState) {
    // A connection keeps its session across messages unless the client
    // switches explicitly.
    let mut current_session: Option<String> = None;

    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let request: WsRequest = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                if !send_error(&mut socket, format!("invalid request: {}", e)).await {
                    return;
                }
                continue;
            }
        };

        let user_id = match state.verifier.verify(&request.token) {
            Ok(id) => id,
            Err(e) => {
                if !send_error(&mut socket, e).await {
                    return;
                }
                continue;
            }
        };

        if let Err(e) = validate_question(&request.question) {
            if !send_error(&mut socket, e).await {
                return;
            }
            continue;
        }

        if let Err(e) = state.rate_limiter.check(&user_id) {
            if !send_error(&mut socket, e).await {
                return;
            }
            continue;
        }

        let session_id = request
            .session_id
            .or_else(|| current_session.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        current_session = Some(session_id.clone());
        state.memory.create_session(&session_id, None);

        if !send_event(
            &mut socket,
            serde_json::json!({ "type": "session_id", "session_id": session_id }),
        )
        .await
        {
            return;
        }

        let document_ids: Option<HashSet<i64>> =
            request.document_ids.map(|ids| ids.into_iter().collect());
        let hits = match state
            .retriever_for(&user_id)
            .retrieve(&request.question, document_ids.as_ref())
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                if !send_error(&mut socket, format!("retrieval failed: {:#}", e)).await {
                    return;
                }
                continue;
            }
        };

        if hits.is_empty() {
            if !send_error(
                &mut socket,
                "No relevant information found. Please upload documents first.",
            )
            .await
            {
                return;
            }
            continue;
        }

        let (context, sources) = build_context(&hits);

        if !send_event(
            &mut socket,
            serde_json::json!({ "type": "sources", "sources": sources }),
        )
        .await
        {
            return;
        }

        let mut rx = state
            .llm
            .stream_answer(&request.question, &context, &user_id, &session_id)
            .await;

        let mut full_answer = String::new();
        let mut failed = false;

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token(token) => {
                    full_answer.push_str(&token);
                    if !send_event(
                        &mut socket,
                        serde_json::json!({ "type": "token", "content": token }),
                    )
                    .await
                    {
                        return;
                    }
                }
                StreamEvent::Done => break,
                StreamEvent::Error(message) => {
                    // Terminal: nothing gets recorded for this turn.
                    failed = true;
                    if !send_error(&mut socket, message).await {
                        return;
                    }
                    break;
                }
            }
        }

        if failed {
            continue;
        }

        // The whole turn commits only after the stream completed.
        state
            .llm
            .record_turn(
                &state.memory,
                &user_id,
                &session_id,
                &request.question,
                &full_answer,
                &sources,
            )
            .await;

        if !send_event(
            &mut socket,
            serde_json::json!({
                "type": "done",
                "session_id": session_id,
                "conversation_turns": state.memory.get_history(&session_id).len(),
            }),
        )
        .await
        {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn hit(filename: &str, page: u32, text: &str, distance: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                text: text.to_string(),
                filename: filename.to_string(),
                page,
                chunk_index: 0,
                document_id: 1,
            },
            distance,
        }
    }

    #[test]
    fn test_validate_question_bounds() {
        assert!(validate_question("ok?").is_ok());
        assert!(validate_question("  a ").is_err());
        assert!(validate_question("").is_err());
        assert!(validate_question(&"x".repeat(1001)).is_err());
        assert!(validate_question(&"x".repeat(1000)).is_ok());
    }

    #[test]
    fn test_build_context_joins_and_dedups_in_rank_order() {
        let hits = vec![
            hit("b.pdf", 2, "second chunk", 0.2),
            hit("a.pdf", 1, "first chunk", 0.1),
            hit("b.pdf", 2, "third chunk", 0.3),
        ];
        let (context, sources) = build_context(&hits);
        assert_eq!(context, "second chunk\n\nfirst chunk\n\nthird chunk");
        assert_eq!(sources, vec!["b.pdf (page 2)", "a.pdf (page 1)"]);
    }

    #[test]
    fn test_build_context_empty() {
        let (context, sources) = build_context(&[]);
        assert!(context.is_empty());
        assert!(sources.is_empty());
    }
}
