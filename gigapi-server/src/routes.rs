use std::io::Read;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Router, body::Bytes};
use flate2::read::GzDecoder;
use gigapi_lake::{Promise, Registry, TableDescriptor};
use gigapi_wire::{parse_line_protocol, parse_ndjson};
use serde::Deserialize;
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::ServerError;

/// Matches `telemetry-ingestion-srv`'s ingest body cap.
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/gigapi/write/{db}", post(write_with_db_path))
        .route("/gigapi/write", post(write_default_db))
        .route("/write", post(write_default_db))
        .route("/api/v2/write", post(write_default_db))
        .route("/api/v3/write_lp", post(write_default_db))
        .route("/gigapi/create", post(create_table))
        .route("/health", get(health))
        .route("/ping", get(ping))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct WriteQuery {
    db: Option<String>,
    table: Option<String>,
}

async fn write_with_db_path(
    State(state): State<AppState>,
    Path(db): Path<String>,
    Query(query): Query<WriteQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ServerError> {
    ingest(&state, &db, query.table.as_deref(), &headers, &body).await
}

async fn write_default_db(
    State(state): State<AppState>,
    Query(query): Query<WriteQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ServerError> {
    let db = query.db.unwrap_or_else(|| "default".to_string());
    ingest(&state, &db, query.table.as_deref(), &headers, &body).await
}

/// Decodes `body` per `Content-Type`/`Content-Encoding` (§6) and forwards
/// each resulting batch to `registry.store(db, table, columns)`, waiting on
/// every promise before returning so a client's 204 means the data landed in
/// at least the in-memory store.
async fn ingest(
    state: &AppState,
    db: &str,
    table_override: Option<&str>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<StatusCode, ServerError> {
    let body = decompress(headers, body)?;

    let is_json = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("json"))
        .unwrap_or(false);

    let mut promises: Vec<Promise> = Vec::new();
    if is_json {
        let table = table_override.unwrap_or("default").to_string();
        let batch = parse_ndjson(&body)?;
        promises.push(state.registry.store(db, &table, batch).await?);
    } else {
        let groups = parse_line_protocol(&body)?;
        for group in groups {
            let table = table_override.map(str::to_string).unwrap_or(group.measurement);
            promises.push(state.registry.store(db, &table, group.batch).await?);
        }
    }

    for promise in promises {
        promise
            .await
            .map_err(|_| ServerError::BadRequest("promise sender dropped".to_string()))??;
    }
    Ok(StatusCode::NO_CONTENT)
}

fn decompress(headers: &HeaderMap, body: &Bytes) -> Result<Vec<u8>, ServerError> {
    let gzipped = headers
        .get(axum::http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    if !gzipped {
        return Ok(body.to_vec());
    }
    let mut decoder = GzDecoder::new(body.as_ref());
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ServerError::BadRequest(format!("invalid gzip body: {e}")))?;
    Ok(out)
}

async fn create_table(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ServerError> {
    let descriptor: TableDescriptor = serde_yaml::from_slice(&body)
        .map_err(|e| ServerError::BadRequest(format!("invalid table descriptor YAML: {e}")))?;
    state.registry.create_table(descriptor).await?;
    Ok(StatusCode::CREATED)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "pass" }))
}

async fn ping() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use gigapi_lake::RegistryConfig;
    use http::{Request, header};
    use tower::ServiceExt;

    fn test_app() -> Router {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig {
            root: dir.keep(),
            merge_timeout_s: 1.0,
            save_timeout_s: 1.0,
            no_merges: true,
            allow_save_to_hd: true,
        };
        router(AppState { registry: Registry::new(config) })
    }

    #[tokio::test]
    async fn health_reports_pass() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8(body.to_vec()).unwrap().contains("\"status\":\"pass\""));
    }

    #[tokio::test]
    async fn ping_returns_no_content() {
        let response = test_app()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn line_protocol_write_returns_no_content() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/write?db=mydb")
                    .body(Body::from("cpu,host=a value=1.0 1700000000000000000"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn ndjson_write_requires_table_and_succeeds() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/write?db=mydb&table=events")
                    .header(header::CONTENT_TYPE, "application/x-ndjson")
                    .body(Body::from("{\"a\":1}\n{\"a\":2}\n"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn malformed_line_protocol_is_bad_request() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/write")
                    .body(Body::from("not a valid line"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_table_accepts_yaml_descriptor() {
        let table_dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "db: mydb\nname: events\nroot: {}\nengine: HiveMerge\n",
            table_dir.path().display()
        );
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/gigapi/create")
                    .body(Body::from(yaml))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn create_table_rejects_invalid_yaml() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/gigapi/create")
                    .body(Body::from("not: [valid"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
