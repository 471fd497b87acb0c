use thiserror::Error;

use crate::transport::FrameError;

/// Prefix tagged onto every framework-origin error string so callers can
/// tell runtime failures apart from handler-returned application errors.
pub const RPC_ERROR_PREFIX: &str = "[RPC_ERROR] ";

#[derive(Error, Debug)]
pub enum Error {
    /// Framework-origin failure. Display carries the wire prefix.
    #[error("[RPC_ERROR] {0}")]
    Fault(String),

    /// Error string received over the wire, surfaced verbatim. Handler
    /// errors arrive unprefixed; server-side framework errors arrive
    /// already tagged.
    #[error("{0}")]
    Remote(String),

    /// Rejected at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("failed to decode message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn fault(msg: impl Into<String>) -> Self {
        Error::Fault(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// True when the error originated in the RPC runtime rather than in
    /// a user handler, on either side of the wire.
    pub fn is_framework(&self) -> bool {
        match self {
            Error::Remote(msg) => msg.starts_with(RPC_ERROR_PREFIX),
            Error::Fault(_) => true,
            _ => false,
        }
    }
}

/// Tags a diagnostic with the framework prefix for placement in a
/// `Response.error` field.
pub fn tagged(msg: impl std::fmt::Display) -> String {
    format!("{RPC_ERROR_PREFIX}{msg}")
}

/// Builds an [`Error::Fault`] from a format string, mirroring how the
/// server formats its wire diagnostics.
#[macro_export]
macro_rules! fault {
    ($($arg:tt)*) => {
        $crate::protocol::error::Error::Fault(format!($($arg)*))
    };
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_display_carries_prefix() {
        let err = fault!("Service '{}' is not found", "Nope");
        assert_eq!(err.to_string(), "[RPC_ERROR] Service 'Nope' is not found");
        assert!(err.is_framework());
    }

    #[test]
    fn remote_display_is_verbatim() {
        let err = Error::Remote("missing header".into());
        assert_eq!(err.to_string(), "missing header");
        assert!(!err.is_framework());
    }

    #[test]
    fn remote_with_prefix_is_framework() {
        let err = Error::Remote("[RPC_ERROR] Request is missing metadata".into());
        assert!(err.is_framework());
    }
}
