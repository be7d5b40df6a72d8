use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProjectionError>;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Invalid CDC message: {0}")]
    Decode(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Projection not ready")]
    NotReady,

    #[error("Projection did not become ready within {0} seconds")]
    StartupTimeout(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProjectionError {
    /// Whether the error is confined to a single envelope (ingestion keeps going)
    pub fn is_per_message(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

impl From<serde_json::Error> for ProjectionError {
    fn from(err: serde_json::Error) -> Self {
        ProjectionError::Decode(err.to_string())
    }
}

impl From<openssl::error::ErrorStack> for ProjectionError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        ProjectionError::Tls(err.to_string())
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for ProjectionError {
    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        let message = match self {
            ProjectionError::NotFound(msg) => msg.clone(),
            _ => self.to_string(),
        };

        HttpResponse::build(code).json(ErrorResponse {
            error: message,
            code: code.as_u16(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ProjectionError::NotFound(_) => StatusCode::NOT_FOUND,
            ProjectionError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
