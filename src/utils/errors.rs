use std::error::Error;
use std::fmt;

/**
 * Structured failures surfaced at the window boundary.
 *
 * A window either completes or fails as a whole; nothing inside the core
 * retries. The orchestrator owns retry policy, so every variant carries
 * enough context to be actionable in its logs.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KelpieError {
    /// Internal bug or corrupt input: inconsistent sample lists between
    /// records, allele or sequence index out of range, count histograms
    /// that do not reconcile.
    InvariantViolation(String),
    /// Malformed bref3 stream or genetic-map text: bad magic, truncation,
    /// overflow in packed widths.
    Format(String),
    /// Run configuration rejected at driver entry.
    Parameter(String),
    /// Allocation or capacity failure fatal to the window.
    Resource(String),
    Io(String),
}

impl fmt::Display for KelpieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KelpieError::InvariantViolation(msg) => write!(f, "Invariant violation: {}", msg),
            KelpieError::Format(msg) => write!(f, "Format error: {}", msg),
            KelpieError::Parameter(msg) => write!(f, "Parameter error: {}", msg),
            KelpieError::Resource(msg) => write!(f, "Resource error: {}", msg),
            KelpieError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl Error for KelpieError {}

impl From<std::io::Error> for KelpieError {
    fn from(error: std::io::Error) -> Self {
        KelpieError::Io(error.to_string())
    }
}
