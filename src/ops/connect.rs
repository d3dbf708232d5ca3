//! `connect` state machine. Two states distinguished by the `pending` flag
//! (`SPEC_FULL.md` §4.3): `ConnectEx` requires the socket to already be bound,
//! so the first entry binds to the wildcard address, resolves (and caches)
//! the `ConnectEx` extension pointer, and starts the connect.

use socket2::SockAddr;
use windows_sys::Win32::Networking::WinSock::{
    SOCKET, WSAECONNREFUSED, WSAEADDRNOTAVAIL, WSAEAFNOSUPPORT, WSAENETUNREACH, WSAENOBUFS,
    WSAENOTSOCK, WSAETIMEDOUT, WSA_IO_PENDING, WSAGetLastError, WSAGetOverlappedResult,
    SO_UPDATE_CONNECT_CONTEXT, SOL_SOCKET, bind, setsockopt,
};

use super::Outcome;
use crate::completion::{Completion, CompletionResult, Operation};
use crate::error::ConnectError;
use crate::reactor::Reactor;

pub(crate) fn drive(reactor: &Reactor, completion: &Completion) -> Outcome {
    let Operation::Connect {
        socket,
        addr,
        pending,
    } = &completion.operation
    else {
        unreachable!("connect::drive invoked on a non-Connect completion")
    };

    if !pending.get() {
        start(reactor, completion, *socket, *addr, pending)
    } else {
        poll(*socket, completion)
    }
}

fn start(
    reactor: &Reactor,
    completion: &Completion,
    socket: SOCKET,
    addr: std::net::SocketAddr,
    pending: &std::cell::Cell<bool>,
) -> Outcome {
    let wildcard = match addr {
        std::net::SocketAddr::V4(_) => {
            SockAddr::from(std::net::SocketAddr::from(([0, 0, 0, 0], 0)))
        }
        std::net::SocketAddr::V6(_) => {
            SockAddr::from(std::net::SocketAddr::from(([0u16; 8], 0)))
        }
    };
    let bind_ok = unsafe { bind(socket, wildcard.as_ptr().cast(), wildcard.len()) };
    if bind_ok != 0 {
        return Outcome::Done(CompletionResult::Connect(Err(map_error(unsafe {
            WSAGetLastError()
        }))));
    }

    let connect_ex = match reactor.connect_ex(socket) {
        Ok(f) => f,
        Err(_) => {
            return Outcome::Done(CompletionResult::Connect(Err(ConnectError::SystemResources)));
        }
    };

    let target = SockAddr::from(addr);
    pending.set(true);
    let ok = unsafe {
        connect_ex(
            socket,
            target.as_ptr().cast(),
            target.len(),
            std::ptr::null(),
            0,
            std::ptr::null_mut(),
            completion.overlapped_ptr(),
        )
    };

    if ok == 0 {
        let code = unsafe { WSAGetLastError() };
        if code == WSA_IO_PENDING {
            return Outcome::Pending;
        }
        pending.set(false);
        return Outcome::Done(CompletionResult::Connect(Err(map_error(code))));
    }

    finish(socket)
}

fn poll(socket: SOCKET, completion: &Completion) -> Outcome {
    let mut transferred = 0u32;
    let mut flags = 0u32;
    let ok = unsafe {
        WSAGetOverlappedResult(
            socket,
            completion.overlapped_ptr(),
            &mut transferred,
            0,
            &mut flags,
        )
    };

    if ok == 0 {
        let code = unsafe { WSAGetLastError() };
        return Outcome::Done(CompletionResult::Connect(Err(map_error(code))));
    }

    finish(socket)
}

fn finish(socket: SOCKET) -> Outcome {
    let ok = unsafe {
        setsockopt(
            socket,
            SOL_SOCKET,
            SO_UPDATE_CONNECT_CONTEXT,
            std::ptr::null(),
            0,
        )
    };
    if ok != 0 {
        return Outcome::Done(CompletionResult::Connect(Err(ConnectError::SystemResources)));
    }
    Outcome::Done(CompletionResult::Connect(Ok(())))
}

fn map_error(code: i32) -> ConnectError {
    match code {
        WSAEADDRNOTAVAIL => ConnectError::AddressNotAvailable,
        WSAEAFNOSUPPORT => ConnectError::AddressFamilyNotSupported,
        WSAECONNREFUSED => ConnectError::ConnectionRefused,
        WSAENETUNREACH => ConnectError::NetworkUnreachable,
        WSAENOBUFS => ConnectError::SystemResources,
        WSAETIMEDOUT => ConnectError::ConnectionTimedOut,
        WSAENOTSOCK => ConnectError::FileDescriptorNotASocket,
        other => ConnectError::Unexpected(std::io::Error::from_raw_os_error(other)),
    }
}
