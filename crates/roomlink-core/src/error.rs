//! Shared error type across roomlink crates.

use thiserror::Error;

/// Stable error codes surfaced to logs, alerts and delivery reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Missing or malformed transport credentials.
    Construction,
    /// Envelope value exceeds the configured size limit.
    PayloadTooLarge,
    /// Network or timeout failure on one destination.
    Delivery,
    /// Persistent key absent.
    NotFound,
    /// Peer did not acknowledge in time.
    ProtocolTimeout,
    /// Destination outside the configured group.
    Filter,
    /// Invalid input / malformed message.
    BadRequest,
    /// A layout change is already in flight.
    Busy,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in reports and alerts.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Construction => "CONSTRUCTION",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::Delivery => "DELIVERY",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ProtocolTimeout => "PROTOCOL_TIMEOUT",
            ErrorCode::Filter => "FILTER",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Busy => "BUSY",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, RoomLinkError>;

/// Unified error type used by core and node.
#[derive(Debug, Clone, Error)]
pub enum RoomLinkError {
    #[error("construction failed: {0}")]
    Construction(String),
    #[error("payload too large: {size} bytes exceeds limit of {max}")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("delivery to {destination} failed (id={correlation_id}): {reason}; payload={payload}")]
    Delivery {
        destination: String,
        correlation_id: u64,
        /// Rendered body with credential material masked.
        payload: String,
        reason: String,
    },
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("protocol timeout: {0}")]
    ProtocolTimeout(String),
    #[error("destination not in configured group: {0}")]
    Filter(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("busy: {0}")]
    Busy(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl RoomLinkError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomLinkError::Construction(_) => ErrorCode::Construction,
            RoomLinkError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            RoomLinkError::Delivery { .. } => ErrorCode::Delivery,
            RoomLinkError::NotFound(_) => ErrorCode::NotFound,
            RoomLinkError::ProtocolTimeout(_) => ErrorCode::ProtocolTimeout,
            RoomLinkError::Filter(_) => ErrorCode::Filter,
            RoomLinkError::BadRequest(_) => ErrorCode::BadRequest,
            RoomLinkError::Busy(_) => ErrorCode::Busy,
            RoomLinkError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// True for errors a caller is expected to recover from with a default.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RoomLinkError::NotFound(_))
    }
}
