use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::Status;
use thiserror::Error;
use tracing::{Span, error, warn};

#[derive(Error, Debug)]
pub enum ProgressionError {
    #[error("Cannot save a study session with no elapsed time")]
    EmptySession,

    #[error("Progression state for user {user_id} changed concurrently")]
    WriteConflict { user_id: i64 },

    #[error("Progression store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Stored progression state is invalid: {0}")]
    InvalidState(String),
}

impl From<sqlx::Error> for ProgressionError {
    fn from(error: sqlx::Error) -> Self {
        ProgressionError::StoreUnavailable(error.to_string())
    }
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Rate limit exceeded. Please try again in a moment.")]
    RateLimited,

    #[error("AI credits exhausted. Please add credits to continue.")]
    CreditsExhausted,

    #[error("Text generation failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(error: reqwest::Error) -> Self {
        GenerationError::Other(error.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    Progression(#[from] ProgressionError),

    #[error("{0}")]
    Generation(#[from] GenerationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let is_valid_span = !current_span.is_none();

        let message = self.to_string();
        let error_kind = match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error");
                "database_error"
            }
            AppError::Authentication(msg) => {
                warn!(message = %msg, context = %ctx, "Authentication error");
                "authentication_error"
            }
            AppError::Authorization(msg) => {
                warn!(message = %msg, context = %ctx, "Authorization error");
                "authorization_error"
            }
            AppError::NotFound(msg) => {
                warn!(message = %msg, context = %ctx, "Not found error");
                "not_found_error"
            }
            AppError::Validation(msg) => {
                warn!(message = %msg, context = %ctx, "Validation error");
                "validation_error"
            }
            AppError::Progression(err) => match err {
                ProgressionError::EmptySession => {
                    warn!(message = %err, context = %ctx, "Empty study session rejected");
                    "empty_session_error"
                }
                ProgressionError::WriteConflict { .. } => {
                    warn!(message = %err, context = %ctx, "Progression write conflict");
                    "write_conflict_error"
                }
                ProgressionError::StoreUnavailable(_) => {
                    error!(message = %err, context = %ctx, "Progression store unavailable");
                    "store_unavailable_error"
                }
                ProgressionError::InvalidState(_) => {
                    error!(message = %err, context = %ctx, "Invalid progression state");
                    "invalid_state_error"
                }
            },
            AppError::Generation(err) => {
                error!(message = %err, context = %ctx, "Text generation error");
                "external_service_error"
            }
            AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal server error");
                "internal_error"
            }
        };

        if is_valid_span {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(error_kind));
            current_span.record("error.message", tracing::field::display(&message));

            match self {
                AppError::Database(_)
                | AppError::Internal(_)
                | AppError::Generation(_)
                | AppError::Progression(ProgressionError::StoreUnavailable(_))
                | AppError::Progression(ProgressionError::InvalidState(_)) => {
                    current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
                }
                _ => {}
            }
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_) => Status::InternalServerError,
            AppError::Authentication(_) => Status::Unauthorized,
            AppError::Authorization(_) => Status::Forbidden,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Validation(_) => Status::BadRequest,
            AppError::Progression(ProgressionError::EmptySession) => Status::BadRequest,
            AppError::Progression(ProgressionError::WriteConflict { .. }) => Status::Conflict,
            AppError::Progression(ProgressionError::StoreUnavailable(_)) => {
                Status::ServiceUnavailable
            }
            AppError::Progression(ProgressionError::InvalidState(_)) => {
                Status::InternalServerError
            }
            AppError::Generation(GenerationError::RateLimited) => Status::TooManyRequests,
            AppError::Generation(GenerationError::CreditsExhausted) => Status::PaymentRequired,
            AppError::Generation(GenerationError::Other(_)) => Status::ServiceUnavailable,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Cryptography error: {}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {}", error))
    }
}
