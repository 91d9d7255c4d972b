use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatbotError {
    /// Bad or missing input from the caller.
    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    NotFound(String),

    /// A provider failure worth retrying (rate limit, 5xx, timeout).
    #[error("{service} temporarily unavailable: {message}")]
    TransientService { service: &'static str, message: String },

    #[error("{service} request failed: {message}")]
    PermanentService { service: &'static str, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatbotError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientService { .. })
    }

    /// Classify a failed HTTP exchange with an external service.
    pub fn from_status(service: &'static str, status: reqwest::StatusCode, body: String) -> Self {
        let message = format!("{} - {}", status, body);
        if status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            Self::TransientService { service, message }
        } else {
            Self::PermanentService { service, message }
        }
    }

    pub fn from_transport(service: &'static str, err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::TransientService { service, message }
        } else if let Some(status) = err.status() {
            Self::from_status(service, status, message)
        } else {
            Self::PermanentService { service, message }
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatbotError>;
