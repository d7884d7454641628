// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Wire framing for PTHI requests and responses.
//!
//! Every request is a 12-byte [`MessageHeader`] followed by a command-specific
//! payload; every response is a 16-byte [`ResponseHeader`] (message header plus
//! a `status` word) followed by its own payload. All multi-byte integers are
//! little-endian; byte arrays are copied verbatim, never interpreted here.

use crate::error::ProtocolError;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

/// PTHI command codes. Responses carry the same code with [`RESPONSE_COMMAND_BIT`] set.
pub mod command {
    pub const GET_CODE_VERSIONS: u32 = 0x0400_001A;
    pub const GET_PKI_FQDN_SUFFIX: u32 = 0x0400_005C;
    pub const ENUMERATE_HASH_HANDLES: u32 = 0x0400_0025;
    pub const GET_CERTHASH_ENTRY: u32 = 0x0400_0029;
    pub const GET_REMOTE_ACCESS_CONNECTION_STATUS: u32 = 0x0400_006B;
    pub const GET_LAN_INTERFACE_SETTINGS: u32 = 0x0400_004B;
    pub const GET_LOCAL_SYSTEM_ACCOUNT: u32 = 0x0400_0067;
    pub const GET_UUID: u32 = 0x0400_005A;
    pub const GET_CONTROL_MODE: u32 = 0x0400_006D;
}

pub const PROTOCOL_MAJOR: u8 = 1;
pub const PROTOCOL_MINOR: u8 = 1;
pub const MESSAGE_HEADER_LEN: usize = 12;
pub const RESPONSE_HEADER_LEN: usize = 16;
/// Set on every response's `command` field over the request's code.
pub const RESPONSE_COMMAND_BIT: u32 = 0x8000_0000;

pub const AMT_ANSI_STRING_BUFFER_LEN: usize = 1000;
pub const CERT_HASH_LEN: usize = 64;
pub const MAX_HASH_HANDLES: usize = 16;
pub const MAX_CODE_VERSIONS: usize = 50;
pub const LOCAL_SYSTEM_ACCOUNT_FIELD_LEN: usize = 33;

pub const CERT_HASH_ALGORITHM_MD5: u8 = 0;
pub const CERT_HASH_ALGORITHM_SHA1: u8 = 1;
pub const CERT_HASH_ALGORITHM_SHA256: u8 = 2;
pub const CERT_HASH_ALGORITHM_SHA384: u8 = 3;
pub const CERT_HASH_ALGORITHM_SHA512: u8 = 4;

/// Length in bytes of a certificate hash for a known algorithm code, or `None`
/// for an algorithm code outside the known range (the raw
/// number and full 64-byte buffer are still surfaced, uninterpreted).
pub fn cert_hash_algorithm_len(algorithm: u8) -> Option<usize> {
    match algorithm {
        CERT_HASH_ALGORITHM_MD5 => Some(16),
        CERT_HASH_ALGORITHM_SHA1 => Some(20),
        CERT_HASH_ALGORITHM_SHA256 => Some(32),
        CERT_HASH_ALGORITHM_SHA384 => Some(48),
        CERT_HASH_ALGORITHM_SHA512 => Some(64),
        _ => None,
    }
}

/// Raw 16-byte UUID, returned as-is (never reformatted into hyphenated form here).
pub type Uuid = [u8; 16];

/// A cursor over a response payload with bounds-checked little-endian reads.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos.checked_add(n).ok_or(ProtocolError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(ProtocolError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

/// The 12-byte header prepended to every request and echoed by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub major: u8,
    pub minor: u8,
    pub reserved: u16,
    pub command: u32,
    pub length: u32,
}

impl MessageHeader {
    pub fn request(command: u32, payload_len: u32) -> Self {
        MessageHeader {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            reserved: 0,
            command,
            length: payload_len,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.major);
        out.push(self.minor);
        out.write_u16::<LittleEndian>(self.reserved).unwrap();
        out.write_u32::<LittleEndian>(self.command).unwrap();
        out.write_u32::<LittleEndian>(self.length).unwrap();
    }
}

/// The 16-byte header (message header + status) every response begins with.
#[derive(Debug, Clone, Copy)]
pub struct ResponseHeader {
    pub header: MessageHeader,
    pub status: u32,
}

impl ResponseHeader {
    fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        let major = r.u8()?;
        let minor = r.u8()?;
        let reserved = r.u16()?;
        let command = r.u32()?;
        let length = r.u32()?;
        let status = r.u32()?;
        Ok(ResponseHeader {
            header: MessageHeader {
                major,
                minor,
                reserved,
                command,
                length,
            },
            status,
        })
    }

    /// Payload length declared by `header.length`, which includes the 4-byte status word.
    fn payload_len(&self) -> Result<usize, ProtocolError> {
        self.header
            .length
            .checked_sub(4)
            .map(|n| n as usize)
            .ok_or(ProtocolError::Truncated)
    }
}

/// Encodes a request: 12-byte header followed by `payload` verbatim.
pub fn encode_request(command: u32, payload: &[u8]) -> Vec<u8> {
    let header = MessageHeader::request(command, payload.len() as u32);
    let mut out = Vec::with_capacity(MESSAGE_HEADER_LEN + payload.len());
    header.encode(&mut out);
    out.extend_from_slice(payload);
    out
}

/// Decodes the 16-byte response header and returns it with the remaining payload slice.
///
/// A non-zero status short-circuits to [`ProtocolError::Status`] before any
/// payload bytes are interpreted.
pub fn decode_response(buf: &[u8]) -> Result<(ResponseHeader, &[u8]), ProtocolError> {
    let mut r = Reader::new(buf);
    let header = ResponseHeader::decode(&mut r)?;
    if header.status != 0 {
        return Err(ProtocolError::Status(header.status));
    }
    let payload_len = header.payload_len()?;
    let payload = r.take(payload_len)?;
    Ok((header, payload))
}

/// A length-prefixed 1000-byte ANSI string: only the first `length` bytes of
/// the buffer are meaningful; the remainder is never read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmtAnsiString {
    bytes: Vec<u8>,
}

impl AmtAnsiString {
    pub(crate) fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        let length = r.u16()? as usize;
        let buffer = r.array::<AMT_ANSI_STRING_BUFFER_LEN>()?;
        if length > AMT_ANSI_STRING_BUFFER_LEN {
            return Err(ProtocolError::Truncated);
        }
        Ok(AmtAnsiString {
            bytes: buffer[..length].to_vec(),
        })
    }

    /// Encodes a request-side ANSI string field (truncated to the 1000-byte buffer).
    pub fn encode(s: &str) -> Vec<u8> {
        let source = s.as_bytes();
        let len = source.len().min(AMT_ANSI_STRING_BUFFER_LEN);
        let mut out = Vec::with_capacity(2 + AMT_ANSI_STRING_BUFFER_LEN);
        out.write_u16::<LittleEndian>(len as u16).unwrap();
        out.extend_from_slice(&source[..len]);
        out.resize(2 + AMT_ANSI_STRING_BUFFER_LEN, 0);
        out
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the string, requiring its bytes to be valid UTF-8.
    ///
    /// Does not stop at an embedded NUL — ANSI strings are
    /// not C strings on this wire.
    pub fn into_string(self) -> Result<String, ProtocolError> {
        String::from_utf8(self.bytes).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

/// One enumerated trust-root fingerprint.
#[derive(Debug, Clone)]
pub struct CertHashEntry {
    pub is_default: bool,
    pub is_active: bool,
    pub hash: [u8; CERT_HASH_LEN],
    pub algorithm: u8,
    pub name: AmtAnsiString,
}

impl CertHashEntry {
    pub(crate) fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(CertHashEntry {
            is_default: r.u8()? != 0,
            is_active: r.u8()? != 0,
            hash: r.array::<CERT_HASH_LEN>()?,
            algorithm: r.u8()?,
            name: AmtAnsiString::decode(r)?,
        })
    }

    /// The hash, truncated to the length implied by [`Self::algorithm`]. `None`
    /// when the algorithm code is unrecognized — the raw buffer is still
    /// available via [`Self::hash`].
    pub fn hash_bytes(&self) -> Option<&[u8]> {
        cert_hash_algorithm_len(self.algorithm).map(|len| &self.hash[..len])
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HashHandles {
    pub handles: Vec<u32>,
}

impl HashHandles {
    pub(crate) fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        let count = r.u32()? as usize;
        let n = count.min(MAX_HASH_HANDLES);
        let mut handles = Vec::with_capacity(n);
        for _ in 0..n {
            handles.push(r.u32()?);
        }
        Ok(HashHandles { handles })
    }
}

/// LAN interface settings for either the wired or wireless NIC.
#[derive(Debug, Clone, Copy)]
pub struct LanInterfaceSettings {
    pub enabled: u32,
    pub ipv4: u32,
    pub dhcp_enabled: u32,
    pub dhcp_ip_mode: u32,
    pub link_status: u32,
    pub mac: [u8; 6],
}

impl LanInterfaceSettings {
    pub(crate) fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(LanInterfaceSettings {
            enabled: r.u32()?,
            ipv4: r.u32()?,
            dhcp_enabled: r.u32()?,
            dhcp_ip_mode: r.u32()?,
            link_status: r.u32()?,
            mac: r.array::<6>()?,
        })
    }
}

/// Remote-access (MPS) connection status.
#[derive(Debug, Clone)]
pub struct RemoteAccessStatus {
    pub network_status: u32,
    pub remote_status: u32,
    pub remote_trigger: u32,
    pub mps_hostname: AmtAnsiString,
}

impl RemoteAccessStatus {
    pub(crate) fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(RemoteAccessStatus {
            network_status: r.u32()?,
            remote_status: r.u32()?,
            remote_trigger: r.u32()?,
            mps_hostname: AmtAnsiString::decode(r)?,
        })
    }
}

/// One entry of [`CodeVersions::versions`]: a named component and its version string.
#[derive(Debug, Clone)]
pub struct VersionType {
    pub description: AmtAnsiString,
    pub version: AmtAnsiString,
}

impl VersionType {
    fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(VersionType {
            description: AmtAnsiString::decode(r)?,
            version: AmtAnsiString::decode(r)?,
        })
    }
}

/// Firmware code versions. The wire payload is variable-length: only
/// `versions_count` [`VersionType`] records are present, not the full 50-slot
/// array the device's internal struct declares; anything after is discarded.
#[derive(Debug, Clone)]
pub struct CodeVersions {
    pub bios_version: [u8; 65],
    pub versions: Vec<VersionType>,
}

impl CodeVersions {
    pub(crate) fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        let bios_version = r.array::<65>()?;
        let versions_count = r.u32()? as usize;
        // Defensive clamp: the device-side record declares at most 50 slots.
        let n = versions_count.min(MAX_CODE_VERSIONS);
        let mut versions = Vec::with_capacity(n);
        for _ in 0..n {
            versions.push(VersionType::decode(r)?);
        }
        Ok(CodeVersions {
            bios_version,
            versions,
        })
    }

    /// The BIOS version as a NUL-trimmed string.
    pub fn bios_version_str(&self) -> Result<String, ProtocolError> {
        nul_trimmed_string(&self.bios_version)
    }
}

/// Username and password for the local AMT system account.
#[derive(Debug, Clone)]
pub struct LocalSystemAccount {
    pub username: [u8; LOCAL_SYSTEM_ACCOUNT_FIELD_LEN],
    pub password: [u8; LOCAL_SYSTEM_ACCOUNT_FIELD_LEN],
}

impl LocalSystemAccount {
    pub(crate) fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        // Leading reserved word in the response layout; semantics undocumented.
        let _reserved = r.u32()?;
        Ok(LocalSystemAccount {
            username: r.array::<LOCAL_SYSTEM_ACCOUNT_FIELD_LEN>()?,
            password: r.array::<LOCAL_SYSTEM_ACCOUNT_FIELD_LEN>()?,
        })
    }

    pub fn username_str(&self) -> Result<String, ProtocolError> {
        nul_trimmed_string(&self.username)
    }

    pub fn password_str(&self) -> Result<String, ProtocolError> {
        nul_trimmed_string(&self.password)
    }
}

fn nul_trimmed_string(buf: &[u8]) -> Result<String, ProtocolError> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..end].to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_length_invariant() {
        let req = encode_request(command::GET_UUID, &[]);
        assert_eq!(req.len(), MESSAGE_HEADER_LEN);

        let payload = [1u8, 2, 3, 4];
        let req = encode_request(command::GET_LAN_INTERFACE_SETTINGS, &payload);
        assert_eq!(req.len(), MESSAGE_HEADER_LEN + payload.len());
    }

    #[test]
    fn uuid_round_trip_scenario() {
        // A real GET_UUID exchange captured against AMT firmware.
        let request = encode_request(command::GET_UUID, &[]);
        assert_eq!(
            request,
            vec![0x01, 0x01, 0x00, 0x00, 0x5A, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00]
        );

        let mut response = vec![
            0x01, 0x01, 0x00, 0x00, 0x5A, 0x00, 0x00, 0x84, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ];
        let uuid_bytes: [u8; 16] = [
            0xD2, 0x3F, 0x11, 0x1C, 0x25, 0x33, 0x94, 0x45, 0xA2, 0x72, 0x54, 0xB2, 0x03, 0x8B,
            0xEB, 0x07,
        ];
        response.extend_from_slice(&uuid_bytes);

        let (header, payload) = decode_response(&response).unwrap();
        assert_eq!(header.header.command & 0x7FFF_FFFF, command::GET_UUID);
        assert_eq!(payload, &uuid_bytes);
    }

    #[test]
    fn status_failure_stops_before_payload_access() {
        let mut response = vec![0x01, 0x01, 0x00, 0x00, 0x6D, 0x00, 0x00, 0x84, 0x04, 0x00, 0x00, 0x00];
        response.extend_from_slice(&3u32.to_le_bytes());
        let err = decode_response(&response).unwrap_err();
        assert!(matches!(err, ProtocolError::Status(3)));
    }

    #[test]
    fn response_length_beyond_buffer_is_truncated() {
        let mut response = vec![0x01, 0x01, 0x00, 0x00, 0x6D, 0x00, 0x00, 0x84];
        response.extend_from_slice(&100u32.to_le_bytes()); // declares far more payload than supplied
        response.extend_from_slice(&0u32.to_le_bytes()); // status = 0
        let err = decode_response(&response).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }

    #[test]
    fn empty_ansi_string_is_not_an_error() {
        let mut buf = vec![0u8, 0u8]; // length = 0
        buf.extend(std::iter::repeat(0xAAu8).take(AMT_ANSI_STRING_BUFFER_LEN));
        let mut r = Reader::new(&buf);
        let s = AmtAnsiString::decode(&mut r).unwrap();
        assert_eq!(s.into_string().unwrap(), "");
    }

    #[test]
    fn ansi_string_does_not_stop_at_embedded_nul() {
        let mut buf = 4u16.to_le_bytes().to_vec();
        let mut body = vec![b'a', 0, b'b', b'c'];
        body.resize(AMT_ANSI_STRING_BUFFER_LEN, 0);
        buf.extend(body);
        let mut r = Reader::new(&buf);
        let s = AmtAnsiString::decode(&mut r).unwrap();
        assert_eq!(s.as_bytes(), &[b'a', 0, b'b', b'c']);
    }

    #[test]
    fn control_mode_values_round_trip() {
        for state in [0i32, 1, 2] {
            let mut response = vec![
                0x01, 0x01, 0x00, 0x00, 0x6D, 0x00, 0x00, 0x84, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00,
            ];
            response.extend_from_slice(&state.to_le_bytes());
            let (_, payload) = decode_response(&response).unwrap();
            assert_eq!(i32::from_le_bytes(payload.try_into().unwrap()), state);
        }
    }

    #[test]
    fn cert_hash_algorithm_lengths() {
        assert_eq!(cert_hash_algorithm_len(CERT_HASH_ALGORITHM_SHA256), Some(32));
        assert_eq!(cert_hash_algorithm_len(200), None);
    }
}
