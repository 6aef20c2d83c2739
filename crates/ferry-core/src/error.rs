//! Bridge error types.

use ferry_abi::Handle;
use thiserror::Error;

use crate::value::{HostError, HostValue};

/// Errors that can occur while marshaling across the guest boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Guest text was not valid UTF-8. Fails the current call only.
    #[error("malformed UTF-8 from guest: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// A handle was released, never allocated, or out of range.
    #[error("handle violation on {handle}: {reason}")]
    HandleViolation { handle: Handle, reason: &'static str },

    /// A guest `(offset, length)` pair fell outside linear memory.
    #[error("memory access out of bounds: offset {offset}, length {len}")]
    MemoryOutOfBounds { offset: u32, len: u32 },

    /// A host operation failed; delivered to the guest as an exception.
    #[error("host operation failed: {0}")]
    HostOperation(#[from] HostError),

    /// Loading, compiling, linking or starting the module failed.
    #[error("instantiation failed: {0}")]
    Instantiation(String),

    /// A closure was invoked after its last reference was released.
    #[error("closure invoked after it was destroyed")]
    ClosureDestroyed,

    /// The guest raised a value through `throw` / `rethrow`.
    #[error("guest threw: {0}")]
    GuestThrew(HostValue),

    /// The guest trapped (including running out of fuel).
    #[error("guest trapped: {0}")]
    Trap(#[from] wasmi::Error),

    /// A required export (or function table slot) is missing.
    #[error("missing export `{0}`")]
    MissingExport(String),

    /// The module has not been loaded.
    #[error("module is not running")]
    NotRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl BridgeError {
    /// Message plus stack where one is available, as written to diagnostics.
    pub fn report(&self) -> String {
        match self {
            Self::HostOperation(e) => e.report(),
            Self::GuestThrew(value) => match value.as_error() {
                Some(e) => format!("guest threw {}", e.report()),
                None => format!("guest threw {}", value.debug_string()),
            },
            other => other.to_string(),
        }
    }

    /// Whether the failure is a contract violation that must trap the guest.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            Self::HandleViolation { .. } | Self::MemoryOutOfBounds { .. }
        )
    }

    /// The value a guest sees when this failure is delivered as an exception.
    pub fn into_host_value(self) -> HostValue {
        match self {
            Self::GuestThrew(value) => value,
            Self::HostOperation(e) => HostValue::from(e),
            Self::Encoding(e) => {
                HostValue::from(HostError::capture_named("TypeError", e.to_string()))
            }
            other => HostValue::from(HostError::capture(other.to_string())),
        }
    }
}

/// Bridge result type alias.
pub type BridgeResult<T> = Result<T, BridgeError>;
