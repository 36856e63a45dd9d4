//! Error taxonomy shared by every layer of the core.
//!
//! Cluster errors are classified once, at the client boundary, and then pass
//! through the cache and context untouched.

use k8s_openapi::serde_json;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("cluster unreachable: {0}")]
    Connectivity(String),

    #[error("forbidden: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("malformed response: {0}")]
    Parse(String),

    #[error("failed to start log stream: {0}")]
    SpawnFailed(String),

    #[error("invalid namespace mode '{0}' (expected current|all|specific)")]
    InvalidMode(String),

    #[error("unknown cache key '{0}' (expected pods|namespaces)")]
    CacheKey(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Stable tag used in notifications sent to the picker.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connectivity(_) => "connectivity",
            Error::Auth(_) => "auth",
            Error::NotFound(_) => "not_found",
            Error::Timeout(_) => "timeout",
            Error::Parse(_) => "parse",
            Error::SpawnFailed(_) => "spawn_failed",
            Error::InvalidMode(_) => "invalid_mode",
            Error::CacheKey(_) => "cache_key",
            Error::InvalidInput(_) => "invalid_input",
        }
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                401 | 403 => Error::Auth(resp.message),
                404 => Error::NotFound(resp.message),
                408 | 504 => Error::Timeout(resp.message),
                code => Error::Connectivity(format!("{} ({})", resp.message, code)),
            },
            kube::Error::SerdeError(e) => Error::Parse(e.to_string()),
            other => classify_message(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

fn classify_message(msg: String) -> Error {
    let lower = msg.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") || lower.contains("deadline") {
        Error::Timeout(msg)
    } else if lower.contains("unauthorized") || lower.contains("forbidden") {
        Error::Auth(msg)
    } else {
        Error::Connectivity(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_api_errors_classified_by_code() {
        assert_eq!(Error::from(api_error(403)).kind(), "auth");
        assert_eq!(Error::from(api_error(401)).kind(), "auth");
        assert_eq!(Error::from(api_error(404)).kind(), "not_found");
        assert_eq!(Error::from(api_error(504)).kind(), "timeout");
        assert_eq!(Error::from(api_error(500)).kind(), "connectivity");
    }

    #[test]
    fn test_serde_errors_are_parse_errors() {
        let err = serde_json::from_str::<Vec<String>>("{").unwrap_err();
        assert!(matches!(Error::from(err), Error::Parse(_)));
    }

    #[test]
    fn test_message_classification() {
        assert!(matches!(
            classify_message("operation timed out".into()),
            Error::Timeout(_)
        ));
        assert!(matches!(
            classify_message("connection refused".into()),
            Error::Connectivity(_)
        ));
    }
}
