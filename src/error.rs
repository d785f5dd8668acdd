//! Crate-level error type.

use thiserror::Error;

/// Errors that can occur anywhere in the bridge.
///
/// Remote-channel variants carry enough context to diagnose the failure
/// without inspecting the originating error directly.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The remote server replied with a non-200 HTTP status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Response body could not be parsed as the expected JSON structure.
    #[error("JSON parse error on field '{field}': {detail}")]
    Json { field: String, detail: String },

    /// A TCP-level connection could not be established, or the request timed out.
    #[error("Connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    /// Configuration file missing, unreadable or incomplete.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A remote command's `service` is not of the form `domain.service`.
    #[error("malformed service '{0}', expected 'domain.service'")]
    MalformedService(String),

    /// A remote command is not an object or lacks a required field.
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    /// The hub rejected or failed a request.
    #[error("hub error: {0}")]
    Host(String),

    /// The hub event stream failed during handshake or subscription.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// A long-running bridge job exited; the instance no longer does its work.
    #[error("bridge job '{job}' stopped: {detail}")]
    JobStopped { job: &'static str, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_http_contains_status_and_url() {
        let err = BridgeError::Http {
            status: 503,
            url: "https://example.org/api_bridge.php".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("503"), "expected status in display: {s}");
        assert!(s.contains("api_bridge.php"), "expected url: {s}");
    }

    #[test]
    fn display_connect_contains_detail() {
        let err = BridgeError::Connect {
            url: "http://localhost:1".to_string(),
            detail: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn display_malformed_service_names_input() {
        let err = BridgeError::MalformedService("invalid_no_dot".to_string());
        assert!(err.to_string().contains("invalid_no_dot"));
    }

    #[test]
    fn display_job_stopped_names_job() {
        let err = BridgeError::JobStopped {
            job: "forwarder",
            detail: "state change stream ended".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("forwarder"), "{s}");
        assert!(s.contains("stream ended"), "{s}");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: BridgeError = io.into();
        assert!(matches!(err, BridgeError::Io(_)));
    }
}
