//! Socket creation and IOCP registration (`SPEC_FULL.md` §4.4, `open_socket`).
//!
//! Every socket this engine ever drives — the listener the caller creates
//! directly, and the per-connection socket `accept` creates internally — goes
//! through [`register`] so the kernel never has to queue a redundant
//! completion packet for an operation that already finished inline.

use std::io;

use windows_sys::Win32::Networking::WinSock::{
    SOCKET, WSA_FLAG_NO_HANDLE_INHERIT, WSA_FLAG_OVERLAPPED, WSASocketW,
};
use windows_sys::Win32::Storage::FileSystem::{
    FILE_SKIP_COMPLETION_PORT_ON_SUCCESS, FILE_SKIP_SET_EVENT_ON_HANDLE,
    SetFileCompletionNotificationModes,
};

use crate::reactor::Reactor;

/// Creates an overlapped-capable socket. Does not associate it with any
/// reactor; callers that need a fully wired socket should go through
/// [`register`] or [`open_socket`].
pub(crate) fn open_overlapped_socket(family: i32, sock_type: i32, protocol: i32) -> io::Result<SOCKET> {
    let socket = unsafe {
        WSASocketW(
            family,
            sock_type,
            protocol,
            std::ptr::null(),
            0,
            WSA_FLAG_OVERLAPPED | WSA_FLAG_NO_HANDLE_INHERIT,
        )
    };
    if socket == windows_sys::Win32::Networking::WinSock::INVALID_SOCKET {
        return Err(io::Error::from_raw_os_error(unsafe {
            windows_sys::Win32::Networking::WinSock::WSAGetLastError()
        }));
    }
    Ok(socket)
}

/// Associates `socket` with `reactor`'s completion port and asks the kernel to
/// skip queuing a completion packet (and signalling the socket's event) when
/// an overlapped call on it finishes inline. Without this, `send`/`recv`/
/// `accept`'s inline-success fast path would race a redundant IOCP packet
/// that arrives with no matching pending registration.
pub(crate) fn register(reactor: &Reactor, socket: SOCKET) -> io::Result<()> {
    reactor.associate(socket as isize)?;
    let ok = unsafe {
        SetFileCompletionNotificationModes(
            socket as isize,
            (FILE_SKIP_COMPLETION_PORT_ON_SUCCESS | FILE_SKIP_SET_EVENT_ON_HANDLE) as u8,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Creates a socket and fully wires it up with `reactor` (`SPEC_FULL.md` §4.4,
/// §6 `open_socket`). The returned socket is owned by the caller; it must be
/// closed with [`crate::close`] like any other descriptor this engine hands
/// out.
pub fn open_socket(reactor: &Reactor, family: i32, sock_type: i32, protocol: i32) -> io::Result<SOCKET> {
    let socket = open_overlapped_socket(family, sock_type, protocol)?;
    if let Err(err) = register(reactor, socket) {
        unsafe { windows_sys::Win32::Networking::WinSock::closesocket(socket) };
        return Err(err);
    }
    Ok(socket)
}
