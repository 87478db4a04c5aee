//! Error taxonomy shared by every back end.
//!
//! Every failure surfaces as a [`PmError`]: an [`ErrorKind`] plus a
//! human-readable detail string. Each kind maps to a stable negative status
//! code so that per-metric failures inside a value set, error frames sent by
//! a collector and archive records all speak the same language.

use std::fmt;
use std::io;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Could not reach the collector, or the connection was lost.
    ConnectionFailed,
    /// No response within the context's request timeout.
    Timeout,
    /// Malformed frame: bad length, truncated payload, unknown type.
    ProtocolViolation,
    /// Unknown or illegal metric identifier.
    UnknownMetric,
    /// No agent/plugin owns the metric's domain.
    UnknownAgent,
    /// Unknown or illegal instance identifier.
    UnknownInstance,
    /// Context handle is unknown or has been destroyed.
    BadContext,
    /// The calling thread has no current context.
    NoContext,
    /// Archive replay reached the start or the end of the log.
    EndOfLog,
    /// Corrupt or truncated archive record.
    LogRecordError,
    /// Archive label record missing, corrupt or inconsistent across files.
    BadLabel,
    /// Archive files could not be opened.
    NoSuchArchive,
    /// Store attempted against a source that cannot be written.
    NotWritable,
    /// The derived-metric evaluator could not bind the metric.
    DerivedMetricBindFailed,
    /// Allocation failed while building a response.
    OutOfMemory,
    /// Replay mode operation on a context that is not an archive.
    BadMode,
    /// Operation not defined for the metric's value type.
    BadType,
    /// Only one local context may be live in a process.
    LocalInUse,
    /// Caller supplied an invalid argument (e.g. an empty PMID list).
    InvalidArgument,
    /// Local I/O failure.
    Io,
    /// Status code received from a peer that has no local meaning.
    Other(i32),
}

impl ErrorKind {
    /// Negative status code for this kind.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::ConnectionFailed => -12391,
            ErrorKind::Timeout => -12353,
            ErrorKind::ProtocolViolation => -12366,
            ErrorKind::UnknownMetric => -12358,
            ErrorKind::UnknownAgent => -12386,
            ErrorKind::UnknownInstance => -12360,
            ErrorKind::BadContext => -12376,
            ErrorKind::NoContext => -12383,
            ErrorKind::EndOfLog => -12370,
            ErrorKind::LogRecordError => -12373,
            ErrorKind::BadLabel => -12372,
            ErrorKind::NoSuchArchive => -12375,
            ErrorKind::NotWritable => -12369,
            ErrorKind::DerivedMetricBindFailed => -12401,
            ErrorKind::OutOfMemory => -12,
            ErrorKind::BadMode => -12371,
            ErrorKind::BadType => -12397,
            ErrorKind::LocalInUse => -12398,
            ErrorKind::InvalidArgument => -22,
            ErrorKind::Io => -5,
            ErrorKind::Other(code) => code,
        }
    }

    /// Maps a status code back to a kind. Unknown codes are kept verbatim.
    pub fn from_code(code: i32) -> Self {
        match code {
            -12391 => ErrorKind::ConnectionFailed,
            -12353 => ErrorKind::Timeout,
            -12366 => ErrorKind::ProtocolViolation,
            -12358 => ErrorKind::UnknownMetric,
            -12386 => ErrorKind::UnknownAgent,
            -12360 => ErrorKind::UnknownInstance,
            -12376 => ErrorKind::BadContext,
            -12383 => ErrorKind::NoContext,
            -12370 => ErrorKind::EndOfLog,
            -12373 => ErrorKind::LogRecordError,
            -12372 => ErrorKind::BadLabel,
            -12375 => ErrorKind::NoSuchArchive,
            -12369 => ErrorKind::NotWritable,
            -12401 => ErrorKind::DerivedMetricBindFailed,
            -12 => ErrorKind::OutOfMemory,
            -12371 => ErrorKind::BadMode,
            -12397 => ErrorKind::BadType,
            -12398 => ErrorKind::LocalInUse,
            -22 => ErrorKind::InvalidArgument,
            -5 => ErrorKind::Io,
            other => ErrorKind::Other(other),
        }
    }

    /// Short description, in the style of a status-code lookup table.
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::ConnectionFailed => "No connection to the metrics collector",
            ErrorKind::Timeout => "Timeout waiting for a response from the collector",
            ErrorKind::ProtocolViolation => "Malformed protocol frame",
            ErrorKind::UnknownMetric => "Unknown or illegal metric identifier",
            ErrorKind::UnknownAgent => "No agent for the requested metric domain",
            ErrorKind::UnknownInstance => "Unknown or illegal instance identifier",
            ErrorKind::BadContext => "Unknown or destroyed context handle",
            ErrorKind::NoContext => "No current context",
            ErrorKind::EndOfLog => "End of archive log",
            ErrorKind::LogRecordError => "Corrupted archive record",
            ErrorKind::BadLabel => "Illegal or mismatched archive label record",
            ErrorKind::NoSuchArchive => "Cannot open archive",
            ErrorKind::NotWritable => "Metrics source is not writable",
            ErrorKind::DerivedMetricBindFailed => "Derived metric could not be bound",
            ErrorKind::OutOfMemory => "Out of memory",
            ErrorKind::BadMode => "Illegal mode for this context",
            ErrorKind::BadType => "Operation not supported for the metric's value type",
            ErrorKind::LocalInUse => "A local context is already open",
            ErrorKind::InvalidArgument => "Invalid argument",
            ErrorKind::Io => "I/O error",
            ErrorKind::Other(_) => "Unrecognized status code",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Other(code) => write!(f, "{} ({})", self.description(), code),
            _ => f.write_str(self.description()),
        }
    }
}

/// Structured error: what went wrong plus a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmError {
    kind: ErrorKind,
    detail: String,
}

impl PmError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Builds an error from a status code received from a peer.
    pub fn from_code(code: i32) -> Self {
        Self {
            kind: ErrorKind::from_code(code),
            detail: String::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    pub(crate) fn protocol(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, detail)
    }

    pub(crate) fn log_record(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::LogRecordError, detail)
    }
}

impl From<ErrorKind> for PmError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            detail: String::new(),
        }
    }
}

impl fmt::Display for PmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.detail)
        }
    }
}

impl std::error::Error for PmError {}

impl From<io::Error> for PmError {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ErrorKind::ConnectionFailed,
            io::ErrorKind::OutOfMemory => ErrorKind::OutOfMemory,
            _ => ErrorKind::Io,
        };
        PmError::new(kind, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_kind() {
        for kind in [
            ErrorKind::ConnectionFailed,
            ErrorKind::Timeout,
            ErrorKind::ProtocolViolation,
            ErrorKind::UnknownMetric,
            ErrorKind::UnknownAgent,
            ErrorKind::BadContext,
            ErrorKind::EndOfLog,
            ErrorKind::LogRecordError,
            ErrorKind::NotWritable,
            ErrorKind::DerivedMetricBindFailed,
        ] {
            assert!(kind.code() < 0);
            assert_eq!(ErrorKind::from_code(kind.code()), kind);
        }
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let err = PmError::from_code(-99999);
        assert_eq!(err.kind(), ErrorKind::Other(-99999));
        assert_eq!(err.code(), -99999);
    }

    #[test]
    fn test_display_includes_detail() {
        let err = PmError::new(ErrorKind::BadContext, "handle 7");
        assert_eq!(err.to_string(), "Unknown or destroyed context handle: handle 7");
        let bare: PmError = ErrorKind::EndOfLog.into();
        assert_eq!(bare.to_string(), "End of archive log");
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let err: PmError = io::Error::new(io::ErrorKind::WouldBlock, "read").into();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        let err: PmError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    }
}
