//! Error taxonomy shared by models and routes.
//!
//! Every variant maps onto one HTTP status and renders as `{"error": "..."}`.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use mongodb::error::{ErrorKind, WriteFailure};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// No session, or the session token did not verify.
    #[error("UNAUTHORIZED")]
    Unauthorized,

    /// Authenticated, but the profile's role does not grant the operation.
    #[error("FORBIDDEN")]
    Forbidden,

    /// Missing record, or a reference to a record that does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Malformed input: bad id, rejected file, missing field.
    #[error("{0}")]
    Validation(String),

    /// The write would clobber a newer revision or violate uniqueness.
    #[error("{0}")]
    Conflict(String),

    /// MongoDB or attachment storage failure, message passed through.
    #[error("{0}")]
    Upstream(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: &str) -> Self {
        Error::NotFound(format!("{what}_NOT_FOUND"))
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(error: mongodb::error::Error) -> Self {
        Error::Upstream(error.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for Error {
    fn from(error: mongodb::bson::ser::Error) -> Self {
        Error::Upstream(error.to_string())
    }
}

impl From<mongodb::bson::de::Error> for Error {
    fn from(error: mongodb::bson::de::Error) -> Self {
        Error::Upstream(error.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Upstream(error.to_string())
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let Error::Upstream(message) = self {
            tracing::error!(%message, "upstream failure");
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

/// True when the driver rejected a write because of a unique index.
pub fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    const DUPLICATE_KEY: i32 = 11000;
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY
        }
        ErrorKind::Command(command_error) => command_error.code == DUPLICATE_KEY,
        _ => false,
    }
}
