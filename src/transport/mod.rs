// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The HECI/MEI transport capability, and its platform implementations.
//!
//! [`HeciTransport`] is the trait [`crate::client::PthiClient`] is generic
//! over, so the command API can run against a real device or a scripted
//! mock without change.

use crate::error::TransportError;
use std::time::Duration;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "windows")]
pub mod windows;

pub mod mock;

/// The AMTHI client's GUID, used by `IOCTL_MEI_CONNECT_CLIENT` (Linux) and the
/// PnP device interface class lookup (Windows) to address the PTHI service
/// running inside the ME firmware. Encoded mixed-endian: the first three
/// UUID fields little-endian, the trailing byte string as-is, per the
/// conventional Linux/Windows MEI client-GUID wire layout.
pub const AMTHI_CLIENT_UUID: [u8; 16] = [
    0x28, 0x00, 0xf8, 0x12, 0xb7, 0xb4, 0x2d, 0x4b, 0xac, 0xa8, 0x46, 0xe0, 0xff, 0x65, 0x81, 0x4c,
];

/// Tunable knobs for opening a HECI transport: plain public fields and a
/// chained-setter builder, with a `Default` impl for the common case.
#[derive(Debug, Clone)]
pub struct HeciOptions {
    /// Device node override. `None` tries the platform's default path(s).
    pub device_path: Option<String>,
    /// Per-call deadline. `None` means block indefinitely (the default).
    pub deadline: Option<Duration>,
}

impl Default for HeciOptions {
    fn default() -> Self {
        HeciOptions {
            device_path: None,
            deadline: None,
        }
    }
}

impl HeciOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_path(mut self, path: impl Into<String>) -> Self {
        self.device_path = Some(path.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// One open connection to the ME's AMTHI client.
///
/// Implementors own the underlying device handle and close it on `Drop`.
/// Every method is blocking; there is no internal retry or reconnect — that
/// policy lives in [`crate::client::PthiClient`].
pub trait HeciTransport {
    /// Negotiated maximum message size in bytes for this connection.
    fn mtu(&self) -> usize;

    /// Sends one complete framed message. Returns
    /// [`TransportError::ShortWrite`] if the kernel accepted fewer bytes than
    /// the message's length.
    fn send(&mut self, message: &[u8]) -> Result<(), TransportError>;

    /// Blocks for one complete framed response, or until the transport's
    /// configured deadline elapses. Returns [`TransportError::Empty`] on a
    /// zero-byte read and [`TransportError::Truncated`] if the response would
    /// not fit the caller's buffer.
    fn receive(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Closes the underlying device handle. Idempotent: calling this more
    /// than once, or letting `Drop` run afterward, is not an error.
    fn close(&mut self);

    /// Re-establishes the connection after [`Self::send`] or [`Self::receive`]
    /// poisoned the handle (the ME may have dropped the client).
    /// Implementations perform the same open-and-connect sequence as their
    /// constructor, replacing the handle and renegotiated MTU in place.
    fn reopen(&mut self) -> Result<(), TransportError>;
}
