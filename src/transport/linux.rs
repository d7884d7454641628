// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Linux HECI transport: `/dev/mei0` (falling back to `/dev/mei`), opened and
//! connected via the kernel's `mei` char device ioctls.

use super::{HeciOptions, HeciTransport, AMTHI_CLIENT_UUID};
use crate::error::TransportError;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

const DEFAULT_DEVICE_PATHS: [&str; 2] = ["/dev/mei0", "/dev/mei"];
const DEFAULT_MTU: usize = 4096;

/// Mirrors the kernel's `mei_connect_client_data` / `mei_client` structs from
/// `linux/mei.h`: the caller supplies the client's GUID and the driver fills
/// in the negotiated buffer size and protocol version.
#[repr(C)]
#[derive(Copy, Clone)]
struct MeiClient {
    max_msg_length: u32,
    protocol_version: u8,
}

#[repr(C)]
union MeiConnectClientData {
    in_client_uuid: [u8; 16],
    out_client_properties: MeiClient,
}

nix::ioctl_readwrite!(mei_connect_client, b'H', 0x01, MeiConnectClientData);

/// Supported protocol version byte, BCD-packed as major-nibble.minor-nibble
/// (`0x11` = version 1.1); any other value is rejected as a version mismatch.
const EXPECTED_PROTOCOL_VERSION: u8 = 0x11;

pub struct LinuxHeciTransport {
    file: File,
    mtu: usize,
    device_path: Option<String>,
    deadline: Option<Duration>,
    closed: bool,
}

/// Opens the device and connects the AMTHI client, returning the file and
/// negotiated MTU. Shared by [`LinuxHeciTransport::open`] and
/// [`LinuxHeciTransport::reopen`], which perform the identical sequence.
fn connect(device_path: &Option<String>) -> Result<(File, usize), TransportError> {
    let file = match device_path {
        Some(path) => open_device(path)?,
        None => open_default_device()?,
    };

    let mut data = MeiConnectClientData {
        in_client_uuid: AMTHI_CLIENT_UUID,
    };

    // SAFETY: `file` is a valid, open file descriptor for the mei device
    // for the duration of this call, and `data` is a plausible size for
    // the kernel's `mei_connect_client_data` union (it reads the input
    // union member and overwrites it in place with the output member).
    unsafe {
        mei_connect_client(file.as_raw_fd(), &mut data as *mut _).map_err(map_connect_errno)?;
    }

    // SAFETY: the ioctl above succeeded, so the kernel has written
    // `out_client_properties` into the union in place of `in_client_uuid`.
    let properties = unsafe { data.out_client_properties };

    if properties.protocol_version != EXPECTED_PROTOCOL_VERSION {
        return Err(TransportError::VersionMismatch);
    }

    let mtu = if properties.max_msg_length == 0 {
        DEFAULT_MTU
    } else {
        properties.max_msg_length as usize
    };

    Ok((file, mtu))
}

impl LinuxHeciTransport {
    /// Opens the device, connects the AMTHI client, and negotiates the MTU.
    pub fn open(options: &HeciOptions) -> Result<Self, TransportError> {
        let (file, mtu) = connect(&options.device_path)?;

        Ok(LinuxHeciTransport {
            file,
            mtu,
            device_path: options.device_path.clone(),
            deadline: options.deadline,
            closed: false,
        })
    }

    fn wait_readable(&self) -> Result<(), TransportError> {
        let Some(deadline) = self.deadline else {
            return Ok(());
        };
        let borrowed = self.file.as_fd();
        let mut fds = [nix::poll::PollFd::new(borrowed, nix::poll::PollFlags::POLLIN)];
        let started = Instant::now();
        let timeout = nix::poll::PollTimeout::try_from(deadline.as_millis().min(i32::MAX as u128) as u32)
            .unwrap_or(nix::poll::PollTimeout::MAX);
        let ready = nix::poll::poll(&mut fds, timeout)
            .map_err(|e| TransportError::Io(io::Error::from_raw_os_error(e as i32)))?;
        if ready == 0 || started.elapsed() >= deadline {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "HECI read deadline elapsed",
            )));
        }
        Ok(())
    }
}

impl HeciTransport for LinuxHeciTransport {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let written = self.file.write(message)?;
        if written != message.len() {
            return Err(TransportError::ShortWrite);
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        self.wait_readable()?;
        let mut buf = vec![0u8; self.mtu];
        let n = self.file.read(&mut buf)?;
        if n == 0 {
            return Err(TransportError::Empty);
        }
        buf.truncate(n);
        Ok(buf)
    }

    fn close(&mut self) {
        // Dropping `self.file` closes the fd; this flag only prevents a
        // second close from being treated as a logic error by callers.
        self.closed = true;
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        let (file, mtu) = connect(&self.device_path)?;
        self.file = file;
        self.mtu = mtu;
        self.closed = false;
        Ok(())
    }
}

impl Drop for LinuxHeciTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_device(path: &str) -> Result<File, TransportError> {
    OpenOptions::new().read(true).write(true).open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            TransportError::DeviceUnavailable
        } else if e.kind() == io::ErrorKind::PermissionDenied {
            TransportError::PermissionDenied
        } else {
            TransportError::Io(e)
        }
    })
}

fn open_default_device() -> Result<File, TransportError> {
    let mut last_err = TransportError::DeviceUnavailable;
    for path in DEFAULT_DEVICE_PATHS {
        match open_device(path) {
            Ok(file) => return Ok(file),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn map_connect_errno(err: nix::Error) -> TransportError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => TransportError::Busy,
        Errno::EACCES | Errno::EPERM => TransportError::PermissionDenied,
        Errno::ENODEV | Errno::ENOENT => TransportError::DeviceUnavailable,
        other => TransportError::Io(io::Error::from_raw_os_error(other as i32)),
    }
}
