//! Bearer-guarded knowledge-engine HTTP surface. Every handler returns JSON;
//! failures come back as `{"error": "..."}"` with a matching HTTP status.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use corvus_core::types::{DocumentType, MemoryLayer};
use corvus_knowledge::{LearnRequest, SearchFilter, SearchMode, SearchQuery};

use crate::app::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/search", get(search))
        .route("/api/consult", get(consult))
        .route("/api/learn", post(learn))
        .route("/api/doc/{id}", get(get_doc))
        .route("/api/list", get(list_docs))
        .route("/api/stats", get(stats))
        .route("/api/threads", get(threads))
        .route("/api/decisions", get(decisions))
        .route("/api/traces", get(traces))
        .route("/api/supersessions", get(supersessions))
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    q: String,
    #[serde(rename = "type")]
    type_filter: Option<DocumentType>,
    limit: Option<usize>,
    mode: Option<SearchMode>,
    project: Option<String>,
    layer: Option<MemoryLayer>,
}

async fn search(State(state): State<Arc<AppState>>, Query(params): Query<SearchParams>) -> ApiResult<Value> {
    let query = SearchQuery {
        text: params.q,
        mode: params.mode.unwrap_or(SearchMode::Hybrid),
        filter: SearchFilter {
            type_filter: params.type_filter,
            project_filter: params.project,
            layer_filter: params.layer,
        },
        limit: params.limit.unwrap_or(10),
        expected_lexical_dominant: false,
    };
    let hits = state
        .search
        .search(query)
        .await
        .map_err(|e| error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(json!({ "hits": hits })))
}

#[derive(Debug, Deserialize)]
pub struct ConsultParams {
    q: String,
}

/// A lighter-weight cousin of `/api/search`: lexical-leaning, tighter limit,
/// meant for a container doing a quick "have we seen this before" check.
async fn consult(State(state): State<Arc<AppState>>, Query(params): Query<ConsultParams>) -> ApiResult<Value> {
    let hits = state
        .search
        .search(SearchQuery {
            text: params.q,
            mode: SearchMode::Hybrid,
            filter: SearchFilter::default(),
            limit: 5,
            expected_lexical_dominant: true,
        })
        .await
        .map_err(|e| error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(json!({ "hits": hits })))
}

#[derive(Debug, Deserialize)]
pub struct LearnBody {
    title: String,
    content: String,
    #[serde(default)]
    concepts: Vec<String>,
    project: Option<String>,
    layer: MemoryLayer,
}

async fn learn(State(state): State<Arc<AppState>>, Json(body): Json<LearnBody>) -> ApiResult<Value> {
    let id = state
        .knowledge
        .learn(LearnRequest {
            title: body.title,
            content: body.content,
            concepts: body.concepts,
            project: body.project,
            layer: body.layer,
            metadata: json!({}),
        })
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "id": id })))
}

async fn get_doc(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Value> {
    let doc = state
        .knowledge
        .get_document(&id)
        .await
        .map_err(|e| error_response(StatusCode::NOT_FOUND, e.to_string()))?;
    Ok(Json(json!(doc)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(rename = "type")]
    type_filter: Option<DocumentType>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_docs(State(state): State<Arc<AppState>>, Query(params): Query<ListParams>) -> ApiResult<Value> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);
    let type_name = params.type_filter.map(doc_type_name);

    let rows = state
        .knowledge
        .pool()
        .interact(move |conn| {
            let (sql, bind_type): (&str, bool) = match &type_name {
                Some(_) => (
                    "SELECT id, title, doc_type, project, updated_at FROM documents \
                     WHERE doc_type = ?1 ORDER BY updated_at DESC LIMIT ?2 OFFSET ?3",
                    true,
                ),
                None => (
                    "SELECT id, title, doc_type, project, updated_at FROM documents \
                     ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
                    false,
                ),
            };
            let mut stmt = conn.prepare(sql)?;
            let mapper = |row: &rusqlite::Row| -> rusqlite::Result<Value> {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "title": row.get::<_, String>(1)?,
                    "doc_type": row.get::<_, String>(2)?,
                    "project": row.get::<_, Option<String>>(3)?,
                    "updated_at": row.get::<_, String>(4)?,
                }))
            };
            let out: Result<Vec<Value>, rusqlite::Error> = if bind_type {
                stmt.query_map(
                    rusqlite::params![type_name.clone().unwrap(), limit, offset],
                    mapper,
                )?
                .collect()
            } else {
                stmt.query_map(rusqlite::params![limit, offset], mapper)?.collect()
            };
            Ok(out?)
        })
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({ "documents": rows })))
}

async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let counts = state
        .knowledge
        .pool()
        .interact(|conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
            let pending_sync: i64 =
                conn.query_row("SELECT COUNT(*) FROM documents WHERE sync_status = 'pending'", [], |r| r.get(0))?;
            let chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
            Ok(json!({ "documents": total, "chunks": chunks, "pending_sync": pending_sync }))
        })
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(counts))
}

async fn threads(state: State<Arc<AppState>>) -> ApiResult<Value> {
    list_by_type(state, DocumentType::Thread).await
}

async fn decisions(state: State<Arc<AppState>>) -> ApiResult<Value> {
    list_by_type(state, DocumentType::Decision).await
}

async fn traces(state: State<Arc<AppState>>) -> ApiResult<Value> {
    list_by_type(state, DocumentType::Trace).await
}

async fn list_by_type(State(state): State<Arc<AppState>>, doc_type: DocumentType) -> ApiResult<Value> {
    let type_name = doc_type_name(doc_type);
    let rows = state
        .knowledge
        .pool()
        .interact(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, project, updated_at FROM documents WHERE doc_type = ?1 ORDER BY updated_at DESC LIMIT 100",
            )?;
            let out: Result<Vec<Value>, rusqlite::Error> = stmt
                .query_map(rusqlite::params![type_name], |row| {
                    Ok(json!({
                        "id": row.get::<_, String>(0)?,
                        "title": row.get::<_, String>(1)?,
                        "project": row.get::<_, Option<String>>(2)?,
                        "updated_at": row.get::<_, String>(3)?,
                    }))
                })?
                .collect();
            Ok(out?)
        })
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "documents": rows })))
}

async fn supersessions(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let rows = state
        .knowledge
        .pool()
        .interact(|conn| {
            let mut stmt = conn.prepare(
                "SELECT old_doc, new_doc, reason, at FROM supersessions ORDER BY at DESC LIMIT 100",
            )?;
            let out: Result<Vec<Value>, rusqlite::Error> = stmt
                .query_map([], |row| {
                    Ok(json!({
                        "old_doc": row.get::<_, String>(0)?,
                        "new_doc": row.get::<_, String>(1)?,
                        "reason": row.get::<_, String>(2)?,
                        "at": row.get::<_, String>(3)?,
                    }))
                })?
                .collect();
            Ok(out?)
        })
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "supersessions": rows })))
}

fn doc_type_name(doc_type: DocumentType) -> String {
    serde_json::to_value(doc_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
