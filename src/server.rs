use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::filter::Filters;
use crate::repository::{Repository, SelectQuery};
use crate::response::{ErrorCode, ErrorDetails, Response, ResponseStatus};

type Reply = (StatusCode, Json<Value>);

#[derive(Debug, Deserialize)]
pub struct InsertRequest {
    pub table: String,
    pub values: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub table: String,
    pub values: Map<String, Value>,
    #[serde(default)]
    pub filters: Filters,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub table: String,
    #[serde(default)]
    pub filters: Filters,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub table: String,
    pub display_column: String,
    pub id_column: String,
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: u64,
}

fn default_search_limit() -> u64 {
    20
}

pub fn router(repository: Arc<Repository>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);
    Router::new()
        .route("/v1/tables", get(tables))
        .route("/v1/tables/:table/columns", get(columns))
        .route("/v1/select", post(select))
        .route("/v1/insert", post(insert))
        .route("/v1/update", post(update))
        .route("/v1/delete", post(delete))
        .route("/v1/search", post(search))
        .layer(cors)
        .with_state(repository)
}

/// HTTP status for an envelope. Warnings are still successful calls.
pub fn status_for<T>(response: &Response<T>) -> StatusCode {
    match (response.status(), response.error_code()) {
        (ResponseStatus::Success | ResponseStatus::Warning, _) => StatusCode::OK,
        (_, Some(ErrorCode::TableNotFound)) => StatusCode::NOT_FOUND,
        (_, Some(code)) if code.is_validation() => StatusCode::BAD_REQUEST,
        (_, Some(code)) if code.is_constraint() => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Runs a repository call on the blocking pool, since the repository is synchronous.
async fn respond<T, F>(repository: Arc<Repository>, operation: &'static str, work: F) -> Reply
where
    T: Serialize,
    F: FnOnce(&Repository) -> Response<T> + Send + 'static,
{
    let started = Instant::now();
    let outcome = tokio::task::spawn_blocking(move || {
        let response = work(&repository);
        (status_for(&response), response.to_value())
    })
    .await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    match outcome {
        Ok((status, body)) => {
            info!(operation, ms = elapsed_ms, code = status.as_u16(), "request complete");
            (status, Json(body))
        }
        Err(e) => {
            warn!(operation, error = %e, "join error");
            let response: Response<Value> = Response::error(
                ErrorCode::UnknownError,
                "The request could not be completed",
                ErrorDetails {
                    operation: operation.to_string(),
                    exception_type: "JoinError".into(),
                    original_message: e.to_string(),
                    extra: Map::new(),
                },
            );
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response.to_value()))
        }
    }
}

async fn tables(State(repository): State<Arc<Repository>>) -> Reply {
    respond(repository, "table_names", |r| r.table_names()).await
}

async fn columns(State(repository): State<Arc<Repository>>, Path(table): Path<String>) -> Reply {
    respond(repository, "describe", move |r| r.describe(&table)).await
}

async fn select(State(repository): State<Arc<Repository>>, Json(query): Json<SelectQuery>) -> Reply {
    respond(repository, "select", move |r| r.select(&query)).await
}

async fn insert(State(repository): State<Arc<Repository>>, Json(req): Json<InsertRequest>) -> Reply {
    respond(repository, "insert", move |r| r.insert(&req.table, &req.values)).await
}

async fn update(State(repository): State<Arc<Repository>>, Json(req): Json<UpdateRequest>) -> Reply {
    respond(repository, "update", move |r| r.update(&req.table, &req.values, &req.filters)).await
}

async fn delete(State(repository): State<Arc<Repository>>, Json(req): Json<DeleteRequest>) -> Reply {
    respond(repository, "delete", move |r| r.delete(&req.table, &req.filters)).await
}

async fn search(State(repository): State<Arc<Repository>>, Json(req): Json<SearchRequest>) -> Reply {
    respond(repository, "search", move |r| {
        r.search_foreign_key(&req.table, &req.display_column, &req.id_column, &req.query, req.limit)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::persist::Database;
    use serde_json::json;
    use std::time::Duration;

    fn repository() -> Arc<Repository> {
        let registry = Arc::new(catalog::plant().unwrap());
        let database = Database::in_memory(Duration::from_millis(50)).unwrap();
        database.create_tables(&registry).unwrap();
        Arc::new(Repository::new(registry, database))
    }

    fn details() -> ErrorDetails {
        ErrorDetails {
            operation: "op".into(),
            exception_type: "T".into(),
            original_message: "m".into(),
            extra: Map::new(),
        }
    }

    #[test]
    fn statuses_follow_error_codes() {
        let ok: Response<Value> = Response::success(Value::Null, "ok", None);
        assert_eq!(status_for(&ok), StatusCode::OK);
        let warned: Response<Value> = Response::warning("approx", None);
        assert_eq!(status_for(&warned), StatusCode::OK);
        let cases = [
            (ErrorCode::TableNotFound, StatusCode::NOT_FOUND),
            (ErrorCode::InvalidFilter, StatusCode::BAD_REQUEST),
            (ErrorCode::ColumnNotFound, StatusCode::BAD_REQUEST),
            (ErrorCode::DuplicateKey, StatusCode::CONFLICT),
            (ErrorCode::CheckConstraintViolation, StatusCode::CONFLICT),
            (ErrorCode::QueryTimeout, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (code, status) in cases {
            let failed: Response<Value> = Response::error(code, "failed", details());
            assert_eq!(status_for(&failed), status, "{code}");
        }
    }

    #[tokio::test]
    async fn handlers_serve_the_envelope() {
        let repository = repository();
        let values = json!({"name": "Bolt", "price": 5}).as_object().cloned().unwrap();
        let (status, Json(body)) = insert(
            State(Arc::clone(&repository)),
            Json(InsertRequest { table: "products".into(), values }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["affected_rows"], 1);

        let query: SelectQuery = serde_json::from_value(json!({"table": "products", "filters": {"price__gt": 1}})).unwrap();
        let (status, Json(body)) = select(State(Arc::clone(&repository)), Json(query)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

        let (status, Json(body)) = columns(State(Arc::clone(&repository)), Path("ghosts".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "TABLE_NOT_FOUND");

        let (status, _) = delete(
            State(repository),
            Json(DeleteRequest { table: "products".into(), filters: Filters::new() }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
