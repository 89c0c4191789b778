//! Core error types for the quill engine

use thiserror::Error;

/// Result type alias for quill operations
pub type QuillResult<T> = Result<T, QuillError>;

/// Main error type for the quill engine
///
/// Each variant carries the contextual fields callers need to surface the
/// failure in the conversation log without re-parsing message strings.
#[derive(Error, Debug, Clone)]
pub enum QuillError {
    /// Configuration related errors (missing key, bad field, unparseable file)
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        field: Option<String>,
    },

    /// Provider-reported or provider-adapter errors
    #[error("Provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    /// HTTP transport errors
    #[error("HTTP error: {message}")]
    Http {
        message: String,
        url: Option<String>,
        status: Option<u16>,
    },

    /// Persistence collaborator errors
    #[error("Storage error: {message}")]
    Storage { message: String, key: Option<String> },

    /// Resource lookup failures
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// A generation or summarization is already in flight for the session
    #[error("Session is busy: {operation} already in progress")]
    Busy { operation: String },

    /// Invalid input errors
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        path: Option<String>,
    },
}

impl QuillError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new provider error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a new HTTP error
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
            url: None,
            status: None,
        }
    }

    /// Create an HTTP error with the request URL and status code
    pub fn http_status(message: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self::Http {
            message: message.into(),
            url: Some(url.into()),
            status: Some(status),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            key: None,
        }
    }

    /// Create a storage error naming the key involved
    pub fn storage_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a new not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a new busy error for a rejected re-entrant operation
    pub fn busy(operation: impl Into<String>) -> Self {
        Self::Busy {
            operation: operation.into(),
        }
    }

    /// Create a new invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for QuillError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for QuillError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<toml::de::Error> for QuillError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for QuillError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for QuillError {
    fn from(err: reqwest::Error) -> Self {
        // Query strings can carry credentials (Gemini sends the API key as
        // `?key=`), so drop them before the URL lands in an error.
        let url = err.url().map(|u| {
            let mut u = u.clone();
            u.set_query(None);
            u.to_string()
        });
        let status = err.status().map(|s| s.as_u16());
        Self::Http {
            message: err.without_url().to_string(),
            url,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QuillError::config("missing API key");
        assert_eq!(err.to_string(), "Configuration error: missing API key");

        let err = QuillError::busy("chat");
        assert_eq!(err.to_string(), "Session is busy: chat already in progress");
    }

    #[test]
    fn test_http_status_fields() {
        let err = QuillError::http_status("rejected", "http://localhost:11434/api/chat", 429);
        match err {
            QuillError::Http { status, url, .. } => {
                assert_eq!(status, Some(429));
                assert_eq!(url.as_deref(), Some("http://localhost:11434/api/chat"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
