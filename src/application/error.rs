use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{compression::CompressionError, repos::RepoError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Diagnostic attached to error responses and consumed by the response logger.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error("resource not found")]
    NotFound,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// True for a well-formed `success: false` answer from the gallery API.
    pub fn is_rejection(&self) -> bool {
        matches!(self, AppError::Repo(RepoError::Rejected { .. }))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Repo(RepoError::NotFound) | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Domain(_) => StatusCode::BAD_REQUEST,
            AppError::Repo(RepoError::Rejected { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Repo(
                RepoError::Transport(_) | RepoError::Status { .. } | RepoError::Decode(_),
            ) => StatusCode::BAD_GATEWAY,
            AppError::Compression(CompressionError::Dimensions(_)) => StatusCode::BAD_REQUEST,
            AppError::Compression(CompressionError::Encode { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Infra(_) | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Repo(RepoError::NotFound) | AppError::NotFound => "Resource not found",
            AppError::Domain(_) => "Request could not be processed",
            AppError::Repo(RepoError::Rejected { .. }) => "Gallery rejected the request",
            AppError::Repo(_) => "Gallery API unavailable",
            AppError::Compression(CompressionError::Dimensions(_)) => "Unsupported image",
            AppError::Compression(CompressionError::Encode { .. }) => "Compression failed",
            AppError::Infra(_) | AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_maps_to_unprocessable() {
        let err = AppError::from(RepoError::rejected("Failed to delete image"));
        assert!(err.is_rejection());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.to_string(), "Failed to delete image");
    }

    #[test]
    fn transport_failures_are_bad_gateway() {
        let err = AppError::from(RepoError::transport("connection refused"));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn response_carries_error_report() {
        let response = AppError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.source, "application::error::AppError");
        assert_eq!(report.messages, vec!["resource not found".to_string()]);
    }
}
