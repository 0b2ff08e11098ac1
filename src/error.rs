use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::database::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ShortenError {
    #[error("{0}")]
    Validation(String),
    #[error("no short link for {0}")]
    NotFound(String),
    #[error("{operation} failed: {source}")]
    Store {
        operation: &'static str,
        id: Option<String>,
        #[source]
        source: StoreError,
    },
}

impl ShortenError {
    pub fn store(operation: &'static str, id: &str, source: StoreError) -> Self {
        Self::Store {
            operation,
            id: Some(id.to_owned()),
            source,
        }
    }

    /// For operations that span the whole collection.
    pub fn store_unkeyed(operation: &'static str, source: StoreError) -> Self {
        Self::Store {
            operation,
            id: None,
            source,
        }
    }
}

impl IntoResponse for ShortenError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "URL not found").into_response(),
            Self::Store {
                operation,
                id,
                source,
            } => {
                tracing::error!(operation, id = ?id, err = ?source, "store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error").into_response()
            }
        }
    }
}
