//! `accept` state machine. Two states distinguished by `client_socket`:
//! `INVALID_SOCKET` means "not yet started", any other value means "started,
//! awaiting result" (SPEC_FULL.md §4.3, Open Questions — the `INVALID_SOCKET`
//! sentinel is kept rather than an explicit `bool` flag since the candidate socket
//! already needs a field to live in across both states).

use std::mem::size_of;

use windows_sys::Win32::Networking::WinSock::{
    AF_INET, AcceptEx, IPPROTO_TCP, SO_UPDATE_ACCEPT_CONTEXT, SOCK_STREAM, SOCKET, SOL_SOCKET,
    WSA_IO_PENDING, WSAECONNABORTED, WSAEMFILE, WSAENOBUFS, WSAENOTSOCK, WSAEOPNOTSUPP,
    WSAGetLastError, WSAGetOverlappedResult, closesocket, setsockopt,
};

use super::Outcome;
use crate::completion::{Completion, CompletionResult, Operation};
use crate::error::AcceptError;
use crate::ffi::{ACCEPT_ADDR_LEN, INVALID_SOCKET};
use crate::net;
use crate::reactor::Reactor;

pub(crate) fn drive(reactor: &Reactor, completion: &Completion) -> Outcome {
    let Operation::Accept {
        listen_socket,
        client_socket,
        addr_buf,
    } = &completion.operation
    else {
        unreachable!("accept::drive invoked on a non-Accept completion")
    };

    if client_socket.get() == INVALID_SOCKET {
        start(reactor, completion, *listen_socket, client_socket, addr_buf)
    } else {
        poll(*listen_socket, client_socket, completion)
    }
}

fn start(
    reactor: &Reactor,
    completion: &Completion,
    listen_socket: SOCKET,
    client_socket: &std::cell::Cell<SOCKET>,
    addr_buf: &[u8],
) -> Outcome {
    let accepting = match net::open_overlapped_socket(AF_INET as i32, SOCK_STREAM, IPPROTO_TCP) {
        Ok(socket) => socket,
        Err(_) => {
            return Outcome::Done(CompletionResult::Accept(Err(AcceptError::SystemResources)));
        }
    };

    if net::register(reactor, accepting).is_err() {
        unsafe { closesocket(accepting) };
        return Outcome::Done(CompletionResult::Accept(Err(AcceptError::SystemResources)));
    }

    client_socket.set(accepting);

    let mut bytes_received: u32 = 0;
    let ok = unsafe {
        AcceptEx(
            listen_socket,
            accepting,
            addr_buf.as_ptr() as *mut _,
            0,
            ACCEPT_ADDR_LEN as u32,
            ACCEPT_ADDR_LEN as u32,
            &mut bytes_received,
            completion.overlapped_ptr(),
        )
    };

    if ok == 0 {
        let code = unsafe { WSAGetLastError() };
        if code == WSA_IO_PENDING {
            return Outcome::Pending;
        }
        unsafe { closesocket(accepting) };
        client_socket.set(INVALID_SOCKET);
        return Outcome::Done(CompletionResult::Accept(Err(map_error(code))));
    }

    // FILE_SKIP_COMPLETION_PORT_ON_SUCCESS means this inline success never queues
    // an IOCP packet; finish right here.
    finish(listen_socket, accepting)
}

fn poll(
    listen_socket: SOCKET,
    client_socket: &std::cell::Cell<SOCKET>,
    completion: &Completion,
) -> Outcome {
    let accepting = client_socket.get();
    let mut transferred = 0u32;
    let mut flags = 0u32;
    let ok = unsafe {
        WSAGetOverlappedResult(
            listen_socket,
            completion.overlapped_ptr(),
            &mut transferred,
            0,
            &mut flags,
        )
    };

    if ok == 0 {
        let code = unsafe { WSAGetLastError() };
        unsafe { closesocket(accepting) };
        client_socket.set(INVALID_SOCKET);
        return Outcome::Done(CompletionResult::Accept(Err(map_error(code))));
    }

    finish(listen_socket, accepting)
}

fn finish(listen_socket: SOCKET, accepted: SOCKET) -> Outcome {
    let ok = unsafe {
        setsockopt(
            accepted,
            SOL_SOCKET,
            SO_UPDATE_ACCEPT_CONTEXT,
            &listen_socket as *const SOCKET as *const u8,
            size_of::<SOCKET>() as i32,
        )
    };
    if ok != 0 {
        unsafe { closesocket(accepted) };
        return Outcome::Done(CompletionResult::Accept(Err(AcceptError::SetSockOptError)));
    }
    Outcome::Done(CompletionResult::Accept(Ok(accepted)))
}

fn map_error(code: i32) -> AcceptError {
    match code {
        WSAECONNABORTED => AcceptError::ConnectionAborted,
        WSAENOTSOCK => AcceptError::FileDescriptorNotASocket,
        WSAEOPNOTSUPP => AcceptError::OperationNotSupported,
        WSAENOBUFS | WSAEMFILE => AcceptError::SystemResources,
        other => AcceptError::Unexpected(std::io::Error::from_raw_os_error(other)),
    }
}
