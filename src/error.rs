// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Error taxonomy for the PTHI client core.
//!
//! Three independent families mirror the failure domains of the system:
//! the kernel/driver transport, the wire protocol, and caller misuse. They
//! are never collapsed into one another — a caller that only cares about
//! transport failures can match on [`TransportError`] via [`PthiError::Transport`].

use thiserror::Error;

/// Failures originating in the HECI/MEI transport (device open, send, receive).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HECI device node is missing")]
    DeviceUnavailable,
    #[error("permission denied opening the HECI device")]
    PermissionDenied,
    #[error("ME refused a second concurrent client connection")]
    Busy,
    #[error("ME reported a protocol version other than 1.1")]
    VersionMismatch,
    #[error("write to HECI device was shorter than the request")]
    ShortWrite,
    #[error("HECI device returned a zero-byte response")]
    Empty,
    #[error("response exceeded the caller's receive buffer")]
    Truncated,
    #[error("HECI device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures in decoding a PTHI response once bytes have been received.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("AMT returned non-zero status {0:#010x}")]
    Status(u32),
    #[error("response was shorter than its declared fields")]
    Truncated,
    #[error("response string is not valid UTF-8")]
    InvalidUtf8,
    #[error("response command {actual:#010x} does not echo request command {expected:#010x}")]
    CommandMismatch { expected: u32, actual: u32 },
}

/// Caller misuse that never reaches the wire.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("operation attempted without a live handle")]
    NotOpen,
    #[error("request payload exceeds the negotiated MTU")]
    RequestTooLarge,
}

/// The error type every public [`crate::client::PthiClient`] operation returns.
#[derive(Debug, Error)]
pub enum PthiError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Usage(#[from] UsageError),
}
