use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use gigapi_types::IngestError;
use thiserror::Error;

/// Maps an [`IngestError`] (or a request-decoding failure) onto an HTTP
/// response, following `http-gateway::GatewayError`'s `IntoResponse` shape.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response<Body> {
        let (status, message) = match &self {
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServerError::Ingest(IngestError::InvalidData(msg)) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServerError::Ingest(e @ IngestError::SchemaConflict { .. }) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            ServerError::Ingest(e @ IngestError::Fatal(_)) => (StatusCode::BAD_REQUEST, e.to_string()),
            ServerError::Ingest(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ServerError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:?}")),
        };
        (status, message).into_response()
    }
}
