//! JSON API for question answering sessions.
//!
//! Endpoints:
//! - `POST /ask`                       — run one question through the agent
//! - `GET  /sessions/{id}/history`     — bounded conversation history
//! - `POST /sessions/{id}/reset`       — clear a session's history

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use autoquery_agent::{AgentLoop, ConversationStore};
use autoquery_core::{
    AgentAnswer, CompletionClient, ConversationTurn, RunStatus, SchemaError, SqlExecutor, SqlStep,
};
use autoquery_db::{DbPool, SchemaCache};

/// The one seam the handlers need: a question plus prior turns in, a
/// terminal answer out. Schema problems are the only error; everything
/// the agent can recover from is folded into the answer itself.
#[async_trait]
pub trait QuestionService: Send + Sync + 'static {
    async fn answer(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<AgentAnswer, SchemaError>;
}

/// Production service: the agent loop plus the shared schema cache.
pub struct AgentService<C, E> {
    agent: AgentLoop<C, E>,
    schema: Arc<SchemaCache>,
    db_pool: DbPool,
}

impl<C, E> AgentService<C, E> {
    pub fn new(agent: AgentLoop<C, E>, schema: Arc<SchemaCache>, db_pool: DbPool) -> Self {
        Self { agent, schema, db_pool }
    }
}

#[async_trait]
impl<C, E> QuestionService for AgentService<C, E>
where
    C: CompletionClient + 'static,
    E: SqlExecutor + 'static,
{
    async fn answer(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<AgentAnswer, SchemaError> {
        let schema = self.schema.get_or_load(&self.db_pool).await?;
        Ok(self.agent.ask(question, &schema, history).await)
    }
}

/// Sessions kept in memory before the least recently touched one is
/// evicted to make room.
const DEFAULT_MAX_SESSIONS: usize = 512;

struct SessionEntry {
    store: Arc<Mutex<ConversationStore>>,
    touched: u64,
}

/// Bounded in-memory session registry. Every lookup bumps a logical
/// clock so eviction can pick the least recently touched session; an
/// in-flight run keeps its own `Arc` to the store, so eviction never
/// interrupts it.
struct SessionRegistry {
    entries: HashMap<String, SessionEntry>,
    capacity: usize,
    clock: u64,
}

impl SessionRegistry {
    fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), capacity: capacity.max(1), clock: 0 }
    }

    fn get(&mut self, session_id: &str) -> Option<Arc<Mutex<ConversationStore>>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(session_id).map(|entry| {
            entry.touched = clock;
            Arc::clone(&entry.store)
        })
    }

    fn get_or_create(
        &mut self,
        session_id: &str,
        history_turns: usize,
    ) -> Arc<Mutex<ConversationStore>> {
        if let Some(store) = self.get(session_id) {
            return store;
        }

        if self.entries.len() >= self.capacity {
            let stale = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.touched)
                .map(|(id, _)| id.clone());
            if let Some(stale_id) = stale {
                self.entries.remove(&stale_id);
                info!(
                    event_name = "api.session.evicted",
                    session_id = %stale_id,
                    "idle session evicted at capacity"
                );
            }
        }

        let store = Arc::new(Mutex::new(ConversationStore::new(history_turns)));
        self.entries.insert(
            session_id.to_string(),
            SessionEntry { store: Arc::clone(&store), touched: self.clock },
        );
        store
    }
}

pub struct AppState<S> {
    service: Arc<S>,
    sessions: Arc<Mutex<SessionRegistry>>,
    max_history_turns: usize,
}

// Manual impl: `S` lives behind an `Arc`, so no `S: Clone` bound.
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            sessions: Arc::clone(&self.sessions),
            max_history_turns: self.max_history_turns,
        }
    }
}

impl<S> AppState<S> {
    pub fn new(service: Arc<S>, max_history_turns: usize) -> Self {
        Self::with_session_capacity(service, max_history_turns, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_session_capacity(
        service: Arc<S>,
        max_history_turns: usize,
        max_sessions: usize,
    ) -> Self {
        Self {
            service,
            sessions: Arc::new(Mutex::new(SessionRegistry::new(max_sessions))),
            max_history_turns: max_history_turns.max(1),
        }
    }

    async fn session(&self, session_id: &str) -> Option<Arc<Mutex<ConversationStore>>> {
        self.sessions.lock().await.get(session_id)
    }

    async fn session_or_create(&self, session_id: &str) -> Arc<Mutex<ConversationStore>> {
        self.sessions.lock().await.get_or_create(session_id, self.max_history_turns)
    }
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub session_id: String,
    pub answer: String,
    pub status: RunStatus,
    pub sql_trail: Vec<SqlStep>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub turns: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub session_id: String,
    pub cleared_turns: usize,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.to_string() }
    }

    fn not_found(message: &str) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.to_string() }
    }
}

impl From<SchemaError> for ApiError {
    fn from(error: SchemaError) -> Self {
        Self { status: StatusCode::SERVICE_UNAVAILABLE, message: error.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

pub fn router<S: QuestionService>(state: AppState<S>) -> Router {
    Router::new()
        .route("/ask", post(ask::<S>))
        .route("/sessions/{session_id}/history", get(history::<S>))
        .route("/sessions/{session_id}/reset", post(reset::<S>))
        .with_state(state)
}

pub async fn ask<S: QuestionService>(
    State(state): State<AppState<S>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(ApiError::bad_request("question must not be empty"));
    }

    let session_id = request.session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let store = state.session_or_create(&session_id).await;

    // Holding the store lock across the run serializes questions
    // within a session; concurrent sessions proceed independently.
    let mut store = store.lock().await;
    let history = store.recent(state.max_history_turns);
    let answer = state.service.answer(question, &history).await?;
    store.append(ConversationTurn::new(question, &answer));

    info!(
        event_name = "api.ask.completed",
        session_id = %session_id,
        status = answer.status.as_str(),
        steps = answer.sql_trail.len(),
        "question answered"
    );

    Ok(Json(AskResponse {
        session_id,
        answer: answer.text,
        status: answer.status,
        sql_trail: answer.sql_trail,
    }))
}

pub async fn history<S: QuestionService>(
    State(state): State<AppState<S>>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let store = state
        .session(&session_id)
        .await
        .ok_or_else(|| ApiError::not_found("unknown session"))?;

    let turns = store.lock().await.recent(state.max_history_turns);
    Ok(Json(HistoryResponse { session_id, turns }))
}

pub async fn reset<S: QuestionService>(
    State(state): State<AppState<S>>,
    Path(session_id): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    let store = state
        .session(&session_id)
        .await
        .ok_or_else(|| ApiError::not_found("unknown session"))?;

    let mut store = store.lock().await;
    let cleared_turns = store.len();
    store.reset();

    info!(
        event_name = "api.session.reset",
        session_id = %session_id,
        cleared_turns,
        "session history cleared"
    );

    Ok(Json(ResetResponse { session_id, cleared_turns }))
}
