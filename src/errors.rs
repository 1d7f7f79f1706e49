use thiserror::Error;

/// Input rejected before any network I/O happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid IP address or hostname: {0:?}")]
    InvalidTarget(String),

    #[error("Invalid port number: {0} (must be 1-65535)")]
    InvalidPort(i64),

    #[error("Invalid port range {start}-{end}")]
    InvalidPortRange { start: i64, end: i64 },

    #[error("Port range cannot exceed {max} ports per scan (got {got})")]
    TooManyPorts { got: usize, max: usize },

    #[error("{field} must be between {min} and {max} (got {got})")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        got: u64,
    },

    #[error("Invalid URL for HTTP test: {0}")]
    InvalidUrl(String),

    #[error("Invalid nameserver address: {0}")]
    InvalidNameserver(String),

    #[error("Unsupported DNS record type: {0}")]
    InvalidRecordType(String),

    #[error("Unsupported HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid test type {0:?}. Must be: ping, tcp, http, or dns")]
    InvalidTestType(String),

    #[error("{0}")]
    Missing(&'static str),
}

/// Failure of an external utility invocation. Folded into result values, never surfaced raw.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} did not finish within {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("{tool} failed ({status}): {stderr_tail}")]
    Failed {
        tool: String,
        status: String,
        stderr_tail: String,
    },

    #[error("I/O error while waiting for {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}
