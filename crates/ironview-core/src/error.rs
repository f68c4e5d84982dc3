//! Error types shared across the ironview crates.

use thiserror::Error;

/// Result type for ironview operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Process-wide error taxonomy.
///
/// Adapters and pollers never propagate these upward; they classify and
/// recover locally. The variants exist so recovery policy and status
/// reporting can tell the cases apart.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket-level connect/read/write failure. Recovered by reconnecting
    /// on the next tick.
    #[error("transport error: {0}")]
    Transport(String),

    /// The device answered with an exception code or a malformed PDU.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A call exceeded its configured per-call timeout. Classified like a
    /// transport failure but counted separately.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Invalid device or register configuration. Fatal at start; the
    /// supervisor refuses the device.
    #[error("configuration error: {0}")]
    Config(String),

    /// A repository write failed after retries.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A discovery phase returned partial results. Non-fatal.
    #[error("discovery phase {phase} incomplete: {detail}")]
    DiscoveryPartial { phase: String, detail: String },

    /// Raw-socket phases need elevation the process does not have.
    #[error("insufficient privileges: {0}")]
    Permission(String),

    /// IO error outside the device transports.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for startup failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 64,
            Error::Io(_) | Error::Persistence(_) => 74,
            _ => 1,
        }
    }

    /// True for errors that warrant a reconnect of the device transport.
    pub fn is_transport_class(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout(_))
    }
}
