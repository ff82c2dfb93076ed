use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Entity kinds surfaced by [`AppError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    App,
    Listing,
    WebhookApp,
    CustomerData,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NotFoundKind::App => "app",
            NotFoundKind::Listing => "marketplace listing",
            NotFoundKind::WebhookApp => "webhook app",
            NotFoundKind::CustomerData => "customer app data",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: NotFoundKind, id: String },
    #[error("precondition failed: {0}")]
    PreCondition(String),
    #[error("provider rejected the app credentials: {0}")]
    ProviderAuthentication(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("inconsistency: {0}")]
    Inconsistency(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("secret store error: {0}")]
    SecretStore(String),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        AppError::PreCondition(message.into())
    }

    pub fn not_found(kind: NotFoundKind, id: impl fmt::Display) -> Self {
        AppError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Innermost error with every [`AppError::Context`] layer stripped.
    pub fn root(&self) -> &AppError {
        let mut current = self;
        while let AppError::Context { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root(), AppError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), AppError::NotFound { .. })
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self.root(), AppError::PreCondition(_))
    }

    pub fn is_provider_authentication(&self) -> bool {
        matches!(self.root(), AppError::ProviderAuthentication(_))
    }

    pub fn is_provider(&self) -> bool {
        matches!(self.root(), AppError::Provider(_))
    }

    fn status(&self) -> StatusCode {
        match self.root() {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::PreCondition(_) => StatusCode::PRECONDITION_FAILED,
            // The caller's own token is fine; the installed app's key is not.
            AppError::ProviderAuthentication(_) => StatusCode::FAILED_DEPENDENCY,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::Inconsistency(_)
            | AppError::Db(_)
            | AppError::SecretStore(_)
            | AppError::Context { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self);
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Adds operation context to an error without hiding its kind.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> AppResult<T>;

    fn with_context<F, S>(self, f: F) -> AppResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn context(self, context: impl Into<String>) -> AppResult<T> {
        self.map_err(|err| AppError::Context {
            context: context.into(),
            source: Box::new(err.into()),
        })
    }

    fn with_context<F, S>(self, f: F) -> AppResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|err| AppError::Context {
            context: f().into(),
            source: Box::new(err.into()),
        })
    }
}
