use std::io::ErrorKind;

/// Uniform error definition for probes, sessions and configuration parsing.
#[derive(Debug)]
pub enum QueryErr {
    /// Connect or receive deadline elapsed.
    Timeout(String),
    /// The remote end refused or reset the connection.
    Refused(String),
    /// The remote end answered, but with data we cannot understand.
    Malformed(String),
    /// RCON password was rejected by the server.
    Unauthenticated(String),
    /// A probe was queried before it was connected.
    NotConnected(String),
    /// Invalid configuration input.
    Config(String),
    /// Any other socket error.
    IoErr(std::io::Error),
}

impl QueryErr {
    /// Whether the error came from the transport itself, meaning any
    /// connection it happened on should be thrown away.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            QueryErr::Timeout(_) | QueryErr::Refused(_) | QueryErr::IoErr(_)
        )
    }

    /// Short machine-readable name of the failure reason.
    pub fn reason(&self) -> &'static str {
        match self {
            QueryErr::Timeout(_) => "timeout",
            QueryErr::Refused(_) => "refused",
            QueryErr::Malformed(_) => "malformed",
            QueryErr::Unauthenticated(_) => "unauthenticated",
            QueryErr::NotConnected(_) => "not connected",
            QueryErr::Config(_) => "config",
            QueryErr::IoErr(_) => "io",
        }
    }
}

impl std::fmt::Display for QueryErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryErr::Timeout(str) => write!(f, "timed out: {}", str),
            QueryErr::Refused(str) => write!(f, "connection refused: {}", str),
            QueryErr::Malformed(str) => write!(f, "malformed response: {}", str),
            QueryErr::Unauthenticated(str) => write!(f, "unauthenticated: {}", str),
            QueryErr::NotConnected(str) => write!(f, "not connected: {}", str),
            QueryErr::Config(str) => write!(f, "invalid configuration: {}", str),
            QueryErr::IoErr(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for QueryErr {}

impl From<std::io::Error> for QueryErr {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => QueryErr::Refused(err.to_string()),
            ErrorKind::TimedOut | ErrorKind::WouldBlock => QueryErr::Timeout(err.to_string()),
            ErrorKind::UnexpectedEof => QueryErr::Malformed(err.to_string()),
            _ => QueryErr::IoErr(err),
        }
    }
}

impl From<tokio::time::error::Elapsed> for QueryErr {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        QueryErr::Timeout(err.to_string())
    }
}

impl From<std::time::SystemTimeError> for QueryErr {
    fn from(err: std::time::SystemTimeError) -> Self {
        QueryErr::Config(err.to_string())
    }
}

impl From<std::num::ParseIntError> for QueryErr {
    fn from(err: std::num::ParseIntError) -> Self {
        QueryErr::Malformed(err.to_string())
    }
}

impl From<std::str::Utf8Error> for QueryErr {
    fn from(err: std::str::Utf8Error) -> Self {
        QueryErr::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_failure_reasons() {
        let refused: QueryErr = std::io::Error::from(ErrorKind::ConnectionRefused).into();
        let timed_out: QueryErr = std::io::Error::from(ErrorKind::TimedOut).into();
        let other: QueryErr = std::io::Error::from(ErrorKind::PermissionDenied).into();

        assert_eq!(refused.reason(), "refused");
        assert_eq!(timed_out.reason(), "timeout");
        assert_eq!(other.reason(), "io");
        assert!(refused.is_transport());
        assert!(!QueryErr::Malformed("x".into()).is_transport());
        assert!(!QueryErr::Unauthenticated("x".into()).is_transport());
    }
}
