use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Token error: {0}")]
    TokenError(#[from] TokenError),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

// Implement conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::StoreError(err.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "message": self.public_message()
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(e) => match e {
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
                AuthError::SamePassword => StatusCode::BAD_REQUEST,
                AuthError::PasswordReused => StatusCode::BAD_REQUEST,
                AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            },
            AppError::TokenError(TokenError::MissingSecret) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::TokenError(_) => StatusCode::UNAUTHORIZED,
            AppError::StoreError(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::StoreError(StoreError::Duplicate(_)) => StatusCode::CONFLICT,
            AppError::StoreError(StoreError::NotFound) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ConfigError(_) | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl AppError {
    /// Message safe to hand back to a client.
    ///
    /// Credential and token failures collapse to their generic wording, and
    /// infrastructure errors never echo driver or config details.
    pub fn public_message(&self) -> String {
        match self {
            AppError::AuthError(e) => e.to_string(),
            AppError::TokenError(TokenError::MissingSecret) => "Internal server error".to_string(),
            AppError::TokenError(_) => AuthError::Unauthorized.to_string(),
            AppError::StoreError(StoreError::Unavailable(_)) => "Service temporarily unavailable".to_string(),
            AppError::StoreError(e) => e.to_string(),
            AppError::ValidationError(msg) | AppError::Conflict(msg) => msg.clone(),
            AppError::ConfigError(_) | AppError::InternalError(_) => "Internal server error".to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Unauthorized request")]
    Unauthorized,

    #[error("New password must be different from the old password")]
    SamePassword,

    #[error("This password was used recently, choose a different one")]
    PasswordReused,

    #[error("Too many failed attempts, try again later")]
    RateLimited,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Signing secret is not configured")]
    MissingSecret,

    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Record not found")]
    NotFound,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.constraint().unwrap_or("unique").to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}
