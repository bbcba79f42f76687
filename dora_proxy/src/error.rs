use anyhow::Error as AnyhowError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::warn;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create upstream request")]
    InvalidUpstreamRequest(#[source] AnyhowError),
    #[error("upstream unreachable")]
    UpstreamUnreachable(#[source] reqwest::Error),
    #[error("failed to read upstream response")]
    UpstreamBody(#[source] reqwest::Error),
    #[error("failed to marshal response")]
    Serialization(#[source] serde_json::Error),
    #[error("failed to resolve head")]
    HeadUnresolved(#[source] AnyhowError),
    #[error("failed to encode metrics")]
    Metrics(#[source] prometheus::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let body = Json(json!({ "status": format!("ERROR: {self}") }));

        warn!("explorer proxy request failed: {:?}", AnyhowError::new(self));

        (status_code, body).into_response()
    }
}

impl Error {
    const fn status_code(&self) -> StatusCode {
        match self {
            Self::UpstreamUnreachable(_) | Self::HeadUnresolved(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidUpstreamRequest(_)
            | Self::UpstreamBody(_)
            | Self::Serialization(_)
            | Self::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
