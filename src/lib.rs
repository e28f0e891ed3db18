#[macro_use]
extern crate async_trait;

use std::error::Error as StdError;
use std::fmt::Formatter;
use std::io;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use strum::Display;

pub mod api;
pub mod args;
pub mod builder;
pub mod coordinator;
pub mod naming;
pub mod orchestrator;
pub mod service;
pub mod task;
pub mod template;
pub mod tracker;
pub mod worker;

/// The kinds of failure the public API ever surfaces to a client, independent
/// of which component raised them. Mirrors the error table in the error
/// handling design: every non-2xx response is produced from exactly one of
/// these.
#[derive(Debug, Clone, Display, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    UpstreamTransient,
    Internal,
}

impl ErrorKind {
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::UpstreamTransient => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ApiError {
    #[serde(skip)]
    status_code: u16,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Server-side errors. All [`Error`]s have an [`ErrorKind`] and an optional source.
///
/// [`Error`] is safe to use as the error variant of axum endpoint return types:
/// its [`IntoResponse`] implementation never leaks internal detail, only the
/// kind-derived status code and a generic message.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn StdError + Sync + Send + 'static>>,
}

impl Error {
    pub fn source<E: StdError + Sync + Send + 'static>(kind: ErrorKind, err: E) -> Self {
        Self {
            kind,
            source: Some(Box::new(err)),
        }
    }

    pub fn custom<S: AsRef<str>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(io::Error::new(
                io::ErrorKind::Other,
                message.as_ref().to_string(),
            ))),
        }
    }

    pub fn from_kind(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind.clone()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::from_kind(kind)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::source(ErrorKind::Internal, err)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.kind.status_code().as_u16() >= 500 {
            tracing::error!(
                error = &self as &dyn std::error::Error,
                "control plane request error"
            );
        }

        let message = match &self.kind {
            ErrorKind::InvalidRequest => self.to_string(),
            ErrorKind::NotFound => "not found".to_string(),
            ErrorKind::UpstreamTransient | ErrorKind::Internal => {
                "internal error, please retry".to_string()
            }
        };

        ApiError {
            status_code: self.kind.status_code().as_u16(),
            message,
        }
        .into_response()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(source) = self.source.as_ref() {
            write!(f, ": ")?;
            source.fmt(f)?;
        }
        Ok(())
    }
}

impl StdError for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_maps_kind_to_status() {
        let err = Error::from_kind(ErrorKind::NotFound);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.kind().status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn custom_error_display_includes_message() {
        let err = Error::custom(ErrorKind::InvalidRequest, "bad base image");
        assert!(err.to_string().contains("bad base image"));
    }
}
