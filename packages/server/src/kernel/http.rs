//! Shared error mapping for the HTTP clients.

use crate::common::AutomationError;

/// Map a transport-level failure. Network problems are always worth a
/// retry.
pub(crate) fn transport_error(service: &str, err: reqwest::Error) -> AutomationError {
    AutomationError::transient(format!("{service} request failed: {err}"))
}

/// Map a non-success HTTP status. 429 and server errors are transient;
/// everything else in the 4xx range means the request itself is wrong and
/// a retry cannot help.
pub(crate) fn status_error(service: &str, status: reqwest::StatusCode, body: &str) -> AutomationError {
    let msg = format!("{service} returned {status}: {body}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AutomationError::transient(msg)
    } else {
        AutomationError::terminal(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::BAD_GATEWAY, StatusCode::INTERNAL_SERVER_ERROR] {
            assert!(matches!(status_error("svc", status, ""), AutomationError::Transient(_)));
        }
    }

    #[test]
    fn client_errors_are_terminal() {
        for status in [StatusCode::BAD_REQUEST, StatusCode::UNAUTHORIZED, StatusCode::NOT_FOUND] {
            assert!(matches!(status_error("svc", status, ""), AutomationError::Terminal(_)));
        }
    }
}
