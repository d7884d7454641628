// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Windows HECI transport: discovers the ME's PnP device interface via
//! `SetupDiGetClassDevs`/`SetupDiEnumDeviceInterfaces`, opens it with
//! `CreateFile`, and connects the AMTHI client with `DeviceIoControl`.
//!
//! The device is opened with `FILE_FLAG_OVERLAPPED` so that `connect`/`send`/
//! `receive` can enforce [`HeciOptions::deadline`] the same way Linux's
//! `poll(2)`-before-`read` does: issue the call, then wait on its completion
//! event for at most the deadline instead of blocking inside the syscall itself.

use super::{HeciOptions, HeciTransport, AMTHI_CLIENT_UUID};
use crate::error::TransportError;
use std::io;
use std::time::Duration;
use windows::core::GUID;
use windows::Win32::Devices::DeviceAndDriverInstallation::{
    SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInterfaces, SetupDiGetClassDevsW,
    SetupDiGetDeviceInterfaceDetailW, DIGCF_DEVICEINTERFACE, DIGCF_PRESENT,
    SP_DEVICE_INTERFACE_DATA, SP_DEVICE_INTERFACE_DETAIL_DATA_W,
};
use windows::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_BUSY, ERROR_FILE_NOT_FOUND, ERROR_IO_PENDING, HANDLE,
    INVALID_HANDLE_VALUE, WAIT_TIMEOUT, WIN32_ERROR,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAG_OVERLAPPED, FILE_GENERIC_READ, FILE_GENERIC_WRITE, FILE_SHARE_READ,
    FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::IO::{CancelIoEx, DeviceIoControl, GetOverlappedResult, OVERLAPPED};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};

/// The ME interface device class GUID exposed by the `mei` / `HECI` driver.
const HECI_INTERFACE_CLASS: GUID = GUID::from_values(
    0xE2D1FF34,
    0x3458,
    0x49A9,
    [0x88, 0xDA, 0x8E, 0x69, 0x15, 0xCE, 0x9B, 0xE5],
);

/// `IOCTL_MEI_CONNECT_CLIENT`, defined by the `mei` driver's public header.
const IOCTL_MEI_CONNECT_CLIENT: u32 = 0x8000_E004;
const DEFAULT_MTU: usize = 4096;

pub struct WindowsHeciTransport {
    handle: HANDLE,
    mtu: usize,
    device_path: Option<String>,
    deadline: Option<Duration>,
    closed: bool,
}

fn connect(device_path: &Option<String>, deadline: Option<Duration>) -> Result<(HANDLE, usize), TransportError> {
    let handle = match device_path {
        Some(path) => open_by_path(path)?,
        None => open_by_device_class()?,
    };
    let mtu = connect_client(handle, deadline)?;
    Ok((handle, mtu))
}

impl WindowsHeciTransport {
    pub fn open(options: &HeciOptions) -> Result<Self, TransportError> {
        let (handle, mtu) = connect(&options.device_path, options.deadline)?;

        Ok(WindowsHeciTransport {
            handle,
            mtu,
            device_path: options.device_path.clone(),
            deadline: options.deadline,
            closed: false,
        })
    }
}

fn open_by_path(path: &str) -> Result<HANDLE, TransportError> {
    let wide: Vec<u16> = path.encode_utf16().chain(std::iter::once(0)).collect();
    // SAFETY: `wide` is a valid NUL-terminated UTF-16 buffer for the
    // lifetime of this call; all other arguments are plain values.
    let handle = unsafe {
        CreateFileW(
            windows::core::PCWSTR(wide.as_ptr()),
            (FILE_GENERIC_READ | FILE_GENERIC_WRITE).0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            FILE_FLAG_OVERLAPPED,
            None,
        )
    }
    .map_err(map_win32_error)?;
    if handle == INVALID_HANDLE_VALUE {
        return Err(TransportError::DeviceUnavailable);
    }
    Ok(handle)
}

fn open_by_device_class() -> Result<HANDLE, TransportError> {
    // SAFETY: flags request a device-interface enumeration restricted to
    // present devices; the returned handle is destroyed before returning.
    let device_info = unsafe {
        SetupDiGetClassDevsW(
            Some(&HECI_INTERFACE_CLASS),
            None,
            None,
            DIGCF_PRESENT | DIGCF_DEVICEINTERFACE,
        )
    }
    .map_err(|_| TransportError::DeviceUnavailable)?;

    let mut interface_data = SP_DEVICE_INTERFACE_DATA {
        cbSize: std::mem::size_of::<SP_DEVICE_INTERFACE_DATA>() as u32,
        ..Default::default()
    };

    // SAFETY: `device_info` is the handle just obtained above and is still
    // valid; `interface_data` is correctly sized via `cbSize`.
    let found = unsafe {
        SetupDiEnumDeviceInterfaces(
            device_info,
            None,
            &HECI_INTERFACE_CLASS,
            0,
            &mut interface_data,
        )
    };
    if found.is_err() {
        unsafe { SetupDiDestroyDeviceInfoList(device_info).ok() };
        return Err(TransportError::DeviceUnavailable);
    }

    let mut required_size = 0u32;
    // SAFETY: passing a null detail-data buffer with a null size pointer is
    // the documented way to query the required buffer size.
    unsafe {
        let _ = SetupDiGetDeviceInterfaceDetailW(
            device_info,
            &interface_data,
            None,
            0,
            Some(&mut required_size),
            None,
        );
    }

    let mut detail_buf = vec![0u8; required_size as usize];
    let detail =
        detail_buf.as_mut_ptr() as *mut SP_DEVICE_INTERFACE_DETAIL_DATA_W;
    // SAFETY: `detail_buf` is sized to `required_size` as reported above;
    // the struct's leading `cbSize` field must be set before the call.
    unsafe {
        (*detail).cbSize = std::mem::size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
        SetupDiGetDeviceInterfaceDetailW(
            device_info,
            &interface_data,
            Some(detail),
            required_size,
            None,
            None,
        )
        .map_err(|_| TransportError::DeviceUnavailable)?;

        let path = windows::core::PCWSTR((*detail).DevicePath.as_ptr());
        let handle = CreateFileW(
            path,
            (FILE_GENERIC_READ | FILE_GENERIC_WRITE).0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            FILE_FLAG_OVERLAPPED,
            None,
        )
        .map_err(map_win32_error)?;

        SetupDiDestroyDeviceInfoList(device_info).ok();
        Ok(handle)
    }
}

/// Issues an overlapped I/O call on `handle` and waits for its completion for
/// at most `deadline` (blocks indefinitely when `None`, same as Linux's
/// `wait_readable` with no deadline configured). `issue` performs the actual
/// `ReadFile`/`WriteFile`/`DeviceIoControl` call, writing into `overlapped`;
/// on a timeout the pending I/O is cancelled and a
/// [`io::ErrorKind::TimedOut`] error is returned, which `PthiClient` treats
/// like any other transport failure and poisons the handle for.
fn run_overlapped(
    handle: HANDLE,
    deadline: Option<Duration>,
    issue: impl FnOnce(*mut OVERLAPPED) -> windows::core::Result<()>,
) -> Result<u32, TransportError> {
    // SAFETY: a manual-reset, initially-unsignaled, unnamed event; closed
    // below on every return path.
    let event = unsafe { CreateEventW(None, true, false, None) }
        .map_err(|e| TransportError::Io(io::Error::from(e)))?;

    let mut overlapped = OVERLAPPED::default();
    overlapped.hEvent = event;

    let pending = match issue(&mut overlapped) {
        Ok(()) => false,
        Err(e) if WIN32_ERROR(e.code().0 as u32) == ERROR_IO_PENDING => true,
        Err(e) => {
            // SAFETY: `event` was just created above and is not used again.
            unsafe { let _ = CloseHandle(event); }
            return Err(map_win32_error(e));
        }
    };

    if pending {
        let timeout_ms = deadline
            .map(|d| d.as_millis().min(u128::from(u32::MAX - 1)) as u32)
            .unwrap_or(INFINITE);
        // SAFETY: `event` is the completion event tied to `overlapped`, valid
        // for the duration of this wait.
        let wait = unsafe { WaitForSingleObject(event, timeout_ms) };
        if wait == WAIT_TIMEOUT {
            // SAFETY: `handle`/`overlapped` identify the still-pending I/O;
            // cancelling it here is required before its buffer can be reused.
            unsafe {
                let _ = CancelIoEx(handle, Some(&overlapped));
                let _ = CloseHandle(event);
            }
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "HECI operation deadline elapsed",
            )));
        }
    }

    let mut transferred = 0u32;
    // SAFETY: `handle`/`overlapped` are the ones just used above; `bWait =
    // false` is correct since the event is already known to be signaled.
    let result = unsafe { GetOverlappedResult(handle, &overlapped, &mut transferred, false) };
    // SAFETY: `event` is not used again after this point.
    unsafe { let _ = CloseHandle(event); }
    result.map_err(map_win32_error)?;
    Ok(transferred)
}

fn connect_client(handle: HANDLE, deadline: Option<Duration>) -> Result<usize, TransportError> {
    let mut client_uuid = AMTHI_CLIENT_UUID;
    let mut out_buf = [0u8; 5]; // mei_client: u32 max_msg_length + u8 protocol_version

    // SAFETY: `client_uuid`/`out_buf` are live stack buffers of the sizes
    // passed, kept alive for the duration of `run_overlapped`'s wait.
    run_overlapped(handle, deadline, |overlapped| unsafe {
        DeviceIoControl(
            handle,
            IOCTL_MEI_CONNECT_CLIENT,
            Some(client_uuid.as_mut_ptr() as *mut _),
            client_uuid.len() as u32,
            Some(out_buf.as_mut_ptr() as *mut _),
            out_buf.len() as u32,
            None,
            Some(overlapped),
        )
    })?;

    let max_msg_length = u32::from_ne_bytes([out_buf[0], out_buf[1], out_buf[2], out_buf[3]]);
    let protocol_version = out_buf[4];
    if protocol_version != 0x11 {
        return Err(TransportError::VersionMismatch);
    }
    Ok(if max_msg_length == 0 {
        DEFAULT_MTU
    } else {
        max_msg_length as usize
    })
}

impl HeciTransport for WindowsHeciTransport {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let handle = self.handle;
        // No deadline: matches Linux's `send`, which has no timeout either —
        // only `receive` waits on the configured deadline (spec.md §4.1).
        let written = run_overlapped(handle, None, |overlapped| unsafe {
            windows::Win32::Storage::FileSystem::WriteFile(
                handle,
                Some(message),
                None,
                Some(overlapped),
            )
        })?;
        if written as usize != message.len() {
            return Err(TransportError::ShortWrite);
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let handle = self.handle;
        let deadline = self.deadline;
        let mut buf = vec![0u8; self.mtu];
        let read = run_overlapped(handle, deadline, |overlapped| unsafe {
            windows::Win32::Storage::FileSystem::ReadFile(
                handle,
                Some(&mut buf),
                None,
                Some(overlapped),
            )
        })?;
        if read == 0 {
            return Err(TransportError::Empty);
        }
        buf.truncate(read as usize);
        Ok(buf)
    }

    fn close(&mut self) {
        if !self.closed {
            // SAFETY: `self.handle` is owned by this struct and not used
            // again after this call.
            unsafe {
                let _ = CloseHandle(self.handle);
            }
            self.closed = true;
        }
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        self.close();
        let (handle, mtu) = connect(&self.device_path, self.deadline)?;
        self.handle = handle;
        self.mtu = mtu;
        self.closed = false;
        Ok(())
    }
}

impl Drop for WindowsHeciTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Maps a Win32 error to the taxonomy of spec.md §7, the same way Linux's
/// `map_connect_errno` distinguishes device-missing/permission/busy instead
/// of collapsing everything into one variant.
fn map_win32_error(err: windows::core::Error) -> TransportError {
    match WIN32_ERROR(err.code().0 as u32) {
        ERROR_FILE_NOT_FOUND => TransportError::DeviceUnavailable,
        ERROR_ACCESS_DENIED => TransportError::PermissionDenied,
        ERROR_BUSY => TransportError::Busy,
        _ => TransportError::Io(io::Error::from(err)),
    }
}
