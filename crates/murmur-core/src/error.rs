//! Error types for the chat core.

/// Shown when a failure carries no usable message of its own.
pub const GENERIC_SEND_FAILURE: &str =
    "Something went wrong while contacting the model. Please try again.";

/// Errors from the completion backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    /// No credential configured. Raised before any network call.
    #[error("{0}")]
    Configuration(String),
    /// The endpoint answered with a non-success status.
    #[error("{}", remote_message(.status, .body))]
    Remote { status: u16, body: String },
    /// Transport failure or an undecodable body.
    #[error("{0}")]
    Network(String),
}

fn remote_message(status: &u16, body: &str) -> String {
    if body.is_empty() {
        format!("Completion endpoint error: {}", status)
    } else {
        body.to_string()
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        CompletionError::Network(err.to_string())
    }
}

/// Why a send was refused before anything was added to the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("message cannot be empty")]
    EmptyInput,
    #[error("a reply is still pending")]
    Busy,
}

/// Turn any error into text fit for the conversation view.
///
/// The error's own message is used verbatim when it has one.
pub fn normalize_error<E: std::fmt::Display + ?Sized>(err: &E, fallback: &str) -> String {
    let message = err.to_string();
    if message.is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_error_display() {
        let err = CompletionError::Configuration("Missing API key".to_string());
        assert_eq!(err.to_string(), "Missing API key");

        let err = CompletionError::Network("timeout".to_string());
        assert_eq!(err.to_string(), "timeout");
    }

    #[test]
    fn test_remote_error_prefers_body() {
        let err = CompletionError::Remote {
            status: 401,
            body: "{\"error\":\"invalid key\"}".to_string(),
        };
        assert_eq!(err.to_string(), "{\"error\":\"invalid key\"}");
    }

    #[test]
    fn test_remote_error_without_body_uses_status() {
        let err = CompletionError::Remote {
            status: 503,
            body: String::new(),
        };
        assert_eq!(err.to_string(), "Completion endpoint error: 503");
    }

    #[test]
    fn test_send_error_display() {
        assert_eq!(SendError::EmptyInput.to_string(), "message cannot be empty");
        assert_eq!(SendError::Busy.to_string(), "a reply is still pending");
    }

    #[test]
    fn test_normalize_error_uses_message() {
        let err = CompletionError::Network("timeout".to_string());
        assert_eq!(normalize_error(&err, GENERIC_SEND_FAILURE), "timeout");
        assert_eq!(normalize_error("plain string", GENERIC_SEND_FAILURE), "plain string");
    }

    #[test]
    fn test_normalize_error_falls_back_on_empty_message() {
        let err = CompletionError::Network(String::new());
        assert_eq!(normalize_error(&err, GENERIC_SEND_FAILURE), GENERIC_SEND_FAILURE);
        assert_eq!(normalize_error("", "fallback"), "fallback");
    }

    #[test]
    fn test_whitespace_message_is_kept_verbatim() {
        assert_eq!(normalize_error("  ", "fallback"), "  ");

        let err = CompletionError::Remote {
            status: 500,
            body: " ".to_string(),
        };
        assert_eq!(err.to_string(), " ");
    }
}
