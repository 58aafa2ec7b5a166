//! Drive API Error Types
//!
//! Every call against the Drive collaborator returns a typed [`Result`]. The
//! storage layer wraps these in its own error tree, so the kinds here only
//! need to say *how* a request failed, not which filesystem operation it
//! belonged to.

use derive_more::{Display, Error};

/// A Drive API error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for Drive API calls.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Display, Error)]
pub enum ErrorKind {
    /// The object (or permission, or upload session) does not exist.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Credentials were accepted but the caller may not touch the object.
    #[display("permission denied: {_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// The token source could not produce a token at all.
    #[display("no access token available")]
    TokenUnavailable,
    /// The token source handed out a token that has already expired.
    #[display("access token expired")]
    TokenExpired,
    /// Any other non-success status returned by Drive.
    #[display("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    /// Connection, TLS or timeout failures.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Drive answered, but not with something we could decode.
    #[display("invalid response: {_0}")]
    InvalidResponse(#[error(not(source))] String),
    /// The request could not be built locally.
    #[display("invalid request: {_0}")]
    InvalidRequest(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::TokenUnavailable => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if the failure came from the transport rather than
    /// from Drive deciding about the request.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::TokenUnavailable | Self::TokenExpired | Self::InvalidResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Network("reset".into()), true)]
    #[case(ErrorKind::Rejected { status: 503, message: String::new() }, true)]
    #[case(ErrorKind::Rejected { status: 429, message: String::new() }, true)]
    #[case(ErrorKind::Rejected { status: 400, message: String::new() }, false)]
    #[case(ErrorKind::NotFound("abc".into()), false)]
    #[case(ErrorKind::TokenExpired, false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn test_display() {
        let kind = ErrorKind::Rejected { status: 403, message: "rate limit".into() };
        assert_eq!(kind.to_string(), "request rejected with status 403: rate limit");
    }
}
