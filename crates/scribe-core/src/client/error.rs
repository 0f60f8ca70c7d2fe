//! Errors returned by the REST/stream client

/// Failure of one HTTP exchange with the writing server
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Connection refused, DNS failure, timeout or broken read
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-2xx HTTP status
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },
    /// Response envelope carried a non-success business code
    #[error("request failed ({code}): {message}")]
    Envelope { code: i64, message: String },
    /// Body could not be decoded into the expected shape
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Numeric code to surface alongside the message
    pub fn code(&self) -> Option<i64> {
        match self {
            ApiError::Status { status, .. } => Some(i64::from(*status)),
            ApiError::Envelope { code, .. } => Some(*code),
            ApiError::Transport(_) | ApiError::Decode(_) => None,
        }
    }

    /// Message suitable for showing to a user
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { message, .. } | ApiError::Envelope { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }

    /// Build the error for a non-2xx response. `server_message` is the
    /// `message` field of the error body, when it had one.
    pub fn from_status(status: u16, server_message: Option<String>) -> Self {
        let message = match friendly_status_message(status) {
            Some(friendly) => friendly.to_string(),
            None => server_message.unwrap_or_else(|| format!("HTTP error! status: {status}")),
        };
        ApiError::Status { status, message }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

fn friendly_status_message(status: u16) -> Option<&'static str> {
    let message = match status {
        400 => "Invalid request parameters",
        401 => "Session expired, please sign in again",
        403 => "Permission denied",
        404 => "Requested resource does not exist",
        422 => "Validation failed",
        500 => "Internal server error",
        503 => "Service temporarily unavailable",
        _ => return None,
    };
    Some(message)
}
