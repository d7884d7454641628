// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The PTHI command API: one method per AMT query, generic over
//! [`HeciTransport`] so tests can swap in a scripted transport.

use crate::error::{PthiError, ProtocolError, UsageError};
use crate::transport::HeciOptions;
use crate::transport::HeciTransport;
use crate::wire::{
    self, command, decode_response, encode_request, AmtAnsiString, CertHashEntry, CodeVersions,
    HashHandles, LanInterfaceSettings, LocalSystemAccount, RemoteAccessStatus, Uuid,
    RESPONSE_COMMAND_BIT,
};

#[cfg(target_os = "linux")]
use crate::transport::linux::LinuxHeciTransport;
#[cfg(target_os = "windows")]
use crate::transport::windows::WindowsHeciTransport;

/// Which LAN interface [`PthiClient::get_lan_interface_settings`] queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanInterface {
    Wired,
    Wireless,
}

/// A single open PTHI session over a HECI transport.
///
/// Follows the `Idle -> Encoding -> Sending -> Receiving -> Decoding -> Idle`
/// state machine: every public method here performs exactly
/// one request/response exchange and returns to idle. A `Sending`/`Receiving`
/// failure poisons the handle (the ME may have dropped the client); the next
/// call transparently closes and reopens it before attempting its own
/// exchange. A `Decoding` failure leaves the handle open.
pub struct PthiClient<T: HeciTransport> {
    transport: T,
    strict_command_check: bool,
    poisoned: bool,
}

impl<T: HeciTransport> PthiClient<T> {
    /// Wraps an already-open transport.
    pub fn new(transport: T) -> Self {
        PthiClient {
            transport,
            strict_command_check: false,
            poisoned: false,
        }
    }

    /// Enables validating that a response's `command` field echoes the
    /// request's command (with [`RESPONSE_COMMAND_BIT`] set) before
    /// decoding its payload. Off by default: the protocol does not require
    /// this check, and some firmware has been observed to echo it inconsistently.
    pub fn with_strict_command_check(mut self, strict: bool) -> Self {
        self.strict_command_check = strict;
        self
    }

    /// Closes the underlying transport. Idempotent, mirroring
    /// [`HeciTransport::close`].
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Closes the transport and marks the handle for a lazy reopen on the
    /// next call.
    fn poison(&mut self) {
        tracing::debug!("pthi send/receive failed, poisoning handle");
        self.transport.close();
        self.poisoned = true;
    }

    fn call(&mut self, command: u32, payload: &[u8]) -> Result<Vec<u8>, PthiError> {
        if self.poisoned {
            tracing::debug!("pthi handle poisoned by a prior transport failure, reopening");
            self.transport.reopen()?;
            self.poisoned = false;
        }

        let request = encode_request(command, payload);
        if request.len() > self.transport.mtu() {
            return Err(UsageError::RequestTooLarge.into());
        }

        tracing::debug!(command = format_args!("{command:#010x}"), "pthi call");
        if let Err(e) = self.transport.send(&request) {
            self.poison();
            return Err(e.into());
        }
        let response = match self.transport.receive() {
            Ok(r) => r,
            Err(e) => {
                self.poison();
                return Err(e.into());
            }
        };

        let (header, body) = decode_response(&response).map_err(|e| {
            tracing::debug!(error = %e, "pthi response decode failed");
            e
        })?;

        if self.strict_command_check {
            let expected = command | RESPONSE_COMMAND_BIT;
            if header.header.command != expected {
                return Err(ProtocolError::CommandMismatch {
                    expected,
                    actual: header.header.command,
                }
                .into());
            }
        }

        Ok(body.to_vec())
    }

    pub fn get_code_versions(&mut self) -> Result<CodeVersions, PthiError> {
        let body = self.call(command::GET_CODE_VERSIONS, &[])?;
        let mut r = wire::Reader::new(&body);
        Ok(CodeVersions::decode(&mut r)?)
    }

    /// The platform's fixed system UUID, returned as a raw 16-byte string
    /// (never reformatted into hyphenated form here).
    pub fn get_uuid(&mut self) -> Result<Uuid, PthiError> {
        let body = self.call(command::GET_UUID, &[])?;
        let mut r = wire::Reader::new(&body);
        Ok(r.array::<16>()?)
    }

    /// 0 = none, 1 = client control mode, 2 = admin control mode, matching
    /// the AMT firmware's own encoding; no sentinel substitution on failure
    /// (every operation here returns a `Result`, there is no -1 convention
    /// to special-case).
    pub fn get_control_mode(&mut self) -> Result<i32, PthiError> {
        let body = self.call(command::GET_CONTROL_MODE, &[])?;
        let mut r = wire::Reader::new(&body);
        Ok(r.u32()? as i32)
    }

    pub fn get_dns_suffix(&mut self) -> Result<String, PthiError> {
        let body = self.call(command::GET_PKI_FQDN_SUFFIX, &[])?;
        let mut r = wire::Reader::new(&body);
        let s = AmtAnsiString::decode(&mut r)?;
        Ok(s.into_string()?)
    }

    /// Enumerates certificate hash handles, then fetches each entry in turn,
    /// aborting on the first non-zero per-entry status.
    pub fn get_certificate_hashes(&mut self) -> Result<Vec<CertHashEntry>, PthiError> {
        let body = self.call(command::ENUMERATE_HASH_HANDLES, &[])?;
        let mut r = wire::Reader::new(&body);
        let handles = HashHandles::decode(&mut r)?;

        let mut entries = Vec::with_capacity(handles.handles.len());
        for handle in handles.handles {
            let request_payload = handle.to_le_bytes();
            let body = self.call(command::GET_CERTHASH_ENTRY, &request_payload)?;
            let mut r = wire::Reader::new(&body);
            entries.push(CertHashEntry::decode(&mut r)?);
        }
        Ok(entries)
    }

    pub fn get_remote_access_connection_status(
        &mut self,
    ) -> Result<RemoteAccessStatus, PthiError> {
        let body = self.call(command::GET_REMOTE_ACCESS_CONNECTION_STATUS, &[])?;
        let mut r = wire::Reader::new(&body);
        Ok(RemoteAccessStatus::decode(&mut r)?)
    }

    pub fn get_lan_interface_settings(
        &mut self,
        interface: LanInterface,
    ) -> Result<LanInterfaceSettings, PthiError> {
        let selector: u32 = match interface {
            LanInterface::Wired => 0,
            LanInterface::Wireless => 1,
        };
        let body = self.call(
            command::GET_LAN_INTERFACE_SETTINGS,
            &selector.to_le_bytes(),
        )?;
        let mut r = wire::Reader::new(&body);
        Ok(LanInterfaceSettings::decode(&mut r)?)
    }

    pub fn get_local_system_account(&mut self) -> Result<LocalSystemAccount, PthiError> {
        // The request's 40 reserved bytes are zeroed and
        // carry no semantic meaning.
        let body = self.call(command::GET_LOCAL_SYSTEM_ACCOUNT, &[0u8; 40])?;
        let mut r = wire::Reader::new(&body);
        Ok(LocalSystemAccount::decode(&mut r)?)
    }
}

#[cfg(target_os = "linux")]
impl PthiClient<LinuxHeciTransport> {
    /// Opens the Linux `/dev/mei0`/`/dev/mei` device and wraps it.
    pub fn open_linux(options: &HeciOptions) -> Result<Self, PthiError> {
        let transport = LinuxHeciTransport::open(options)?;
        Ok(Self::new(transport))
    }
}

#[cfg(target_os = "windows")]
impl PthiClient<WindowsHeciTransport> {
    /// Opens the Windows ME device interface and wraps it.
    pub fn open_windows(options: &HeciOptions) -> Result<Self, PthiError> {
        let transport = WindowsHeciTransport::open(options)?;
        Ok(Self::new(transport))
    }
}
