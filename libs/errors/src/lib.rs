//! Unified error handling for ModLink
//!
//! This crate defines the fault taxonomy shared by the connection core.
//! Faults are classified explicitly so callers (and the reconnect logic)
//! never have to guess from a catch-all: each variant knows whether it
//! implies the underlying socket should be considered dead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ErrorInfo - UI-facing error summary
// ============================================================================

/// Standard error information handed to the embedding UI layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Short fault kind tag (e.g. "connection_closed")
    pub kind: String,
    /// Human-readable message with endpoint/address context
    pub message: String,
    /// Device endpoint (`host:port`) the fault relates to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

// ============================================================================
// LinkError - Main error type
// ============================================================================

/// Fault taxonomy for managed Modbus sessions
#[derive(Debug, Error)]
pub enum LinkError {
    // ======================================
    // Connection state faults
    // ======================================
    /// Operation attempted on a disconnected session with reconnection
    /// disallowed (or a single allowed reconnect attempt failed).
    #[error("Connection to {endpoint} is closed")]
    ConnectionClosed { endpoint: String },

    /// All connect attempts exhausted.
    #[error("Failed to connect to {endpoint} after {attempts} attempts")]
    ConnectFailed { endpoint: String, attempts: u32 },

    // ======================================
    // Device and transport faults
    // ======================================
    /// Device reported an illegal data address. Kept distinct from other
    /// device exceptions because the address-fallback probe keys on it.
    #[error("Illegal data address {address} at {endpoint}{detail}")]
    IllegalAddress {
        endpoint: String,
        address: u16,
        detail: String,
    },

    /// Device exception response or transport-level I/O failure.
    #[error("Transport fault at {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// I/O did not complete within the operation timeout.
    #[error("Timeout waiting for {operation} from {endpoint}")]
    Timeout { endpoint: String, operation: String },

    // ======================================
    // Caller faults
    // ======================================
    /// Write requested against a read-only register space.
    #[error("Unsupported operation: {operation} on {space} space")]
    UnsupportedOperation { space: String, operation: String },

    /// Malformed request (zero count, empty value list, address overflow).
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl LinkError {
    /// Fault kind -> "should force disconnect" table.
    ///
    /// Any irregularity seen on the wire (device exception, I/O error,
    /// timeout) marks the link suspect so the next operation goes through
    /// reconnection. Caller faults and already-closed states leave a
    /// healthy socket alone.
    pub fn forces_disconnect(&self) -> bool {
        match self {
            LinkError::IllegalAddress { .. }
            | LinkError::Transport { .. }
            | LinkError::Timeout { .. } => true,
            LinkError::ConnectionClosed { .. }
            | LinkError::ConnectFailed { .. }
            | LinkError::UnsupportedOperation { .. }
            | LinkError::Validation(_) => false,
        }
    }

    /// True for the illegal-address device exception the probe keys on
    pub fn is_illegal_address(&self) -> bool {
        matches!(self, LinkError::IllegalAddress { .. })
    }

    /// Endpoint context, when the fault carries one
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            LinkError::ConnectionClosed { endpoint }
            | LinkError::ConnectFailed { endpoint, .. }
            | LinkError::IllegalAddress { endpoint, .. }
            | LinkError::Transport { endpoint, .. }
            | LinkError::Timeout { endpoint, .. } => Some(endpoint),
            LinkError::UnsupportedOperation { .. } | LinkError::Validation(_) => None,
        }
    }

    /// Short machine-readable tag for the fault kind
    pub fn kind(&self) -> &'static str {
        match self {
            LinkError::ConnectionClosed { .. } => "connection_closed",
            LinkError::ConnectFailed { .. } => "connect_failed",
            LinkError::IllegalAddress { .. } => "illegal_address",
            LinkError::Transport { .. } => "transport",
            LinkError::Timeout { .. } => "timeout",
            LinkError::UnsupportedOperation { .. } => "unsupported_operation",
            LinkError::Validation(_) => "validation",
        }
    }

    /// Convert to the UI-facing summary
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind().to_string(),
            message: self.to_string(),
            endpoint: self.endpoint().map(str::to_string),
        }
    }
}

/// Result type alias used across the workspace
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    // ========== Disconnect table tests ==========

    #[test]
    fn test_wire_faults_force_disconnect() {
        let faults = [
            LinkError::IllegalAddress {
                endpoint: "10.0.0.1:502".to_string(),
                address: 100,
                detail: String::new(),
            },
            LinkError::Transport {
                endpoint: "10.0.0.1:502".to_string(),
                message: "connection reset".to_string(),
            },
            LinkError::Timeout {
                endpoint: "10.0.0.1:502".to_string(),
                operation: "read holding".to_string(),
            },
        ];

        for fault in &faults {
            assert!(fault.forces_disconnect(), "{fault} should force disconnect");
        }
    }

    #[test]
    fn test_caller_faults_do_not_force_disconnect() {
        let faults = [
            LinkError::ConnectionClosed {
                endpoint: "10.0.0.1:502".to_string(),
            },
            LinkError::ConnectFailed {
                endpoint: "10.0.0.1:502".to_string(),
                attempts: 3,
            },
            LinkError::UnsupportedOperation {
                space: "input".to_string(),
                operation: "write".to_string(),
            },
            LinkError::Validation("count must be >= 1".to_string()),
        ];

        for fault in &faults {
            assert!(!fault.forces_disconnect(), "{fault} should not disconnect");
        }
    }

    // ========== Context tests ==========

    #[test]
    fn test_display_carries_endpoint_context() {
        let err = LinkError::IllegalAddress {
            endpoint: "192.168.1.50:502".to_string(),
            address: 4000,
            detail: ", no responsive address within +/-8".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("192.168.1.50:502"));
        assert!(msg.contains("4000"));
        assert!(msg.contains("+/-8"));
    }

    #[test]
    fn test_error_info_conversion() {
        let err = LinkError::Timeout {
            endpoint: "plc7:502".to_string(),
            operation: "read input".to_string(),
        };

        let info = err.to_error_info();
        assert_eq!(info.kind, "timeout");
        assert_eq!(info.endpoint.as_deref(), Some("plc7:502"));
        assert!(info.message.contains("read input"));
    }

    #[test]
    fn test_validation_has_no_endpoint() {
        let err = LinkError::Validation("empty value list".to_string());
        assert!(err.endpoint().is_none());
        assert!(err.to_error_info().endpoint.is_none());
    }

    #[test]
    fn test_illegal_address_predicate() {
        let err = LinkError::IllegalAddress {
            endpoint: "plc:502".to_string(),
            address: 0,
            detail: String::new(),
        };
        assert!(err.is_illegal_address());

        let err = LinkError::Transport {
            endpoint: "plc:502".to_string(),
            message: "broken pipe".to_string(),
        };
        assert!(!err.is_illegal_address());
    }
}
