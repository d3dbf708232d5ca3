//! `recv` state machine: `WSARecv` over a single buffer, two states via
//! `pending` (`SPEC_FULL.md` §4.3).
//!
//! Error mapping preserves the source's idiosyncratic choices verbatim
//! (`SPEC_FULL.md` §9 Open Questions): both `WSAETIMEDOUT` and
//! `WSAECONNABORTED` map to `ConnectionRefused`, and `WSAESHUTDOWN` maps to
//! `SocketNotConnected`. These are definitions to preserve, not bugs to fix.

use windows_sys::Win32::Networking::WinSock::{
    SOCKET, WSABUF, WSAECONNABORTED, WSAECONNREFUSED, WSAECONNRESET, WSAEMSGSIZE, WSAENETDOWN,
    WSAENOBUFS, WSAESHUTDOWN, WSAETIMEDOUT, WSA_IO_PENDING, WSAGetLastError,
    WSAGetOverlappedResult, WSARecv,
};

use super::Outcome;
use crate::completion::{Completion, CompletionResult, Operation};
use crate::error::RecvError;

pub(crate) fn drive(completion: &Completion) -> Outcome {
    let Operation::Recv {
        socket,
        buf,
        len,
        pending,
    } = &completion.operation
    else {
        unreachable!("recv::drive invoked on a non-Recv completion")
    };

    if !pending.get() {
        start(completion, *socket, *buf, *len, pending)
    } else {
        poll(*socket, completion)
    }
}

fn start(
    completion: &Completion,
    socket: SOCKET,
    buf: *mut u8,
    len: u32,
    pending: &std::cell::Cell<bool>,
) -> Outcome {
    let mut wsabuf = WSABUF { len, buf };
    let mut bytes_received = 0u32;
    let mut flags = 0u32;

    pending.set(true);
    let result = unsafe {
        WSARecv(
            socket,
            &mut wsabuf,
            1,
            &mut bytes_received,
            &mut flags,
            completion.overlapped_ptr(),
            None,
        )
    };

    if result != 0 {
        let code = unsafe { WSAGetLastError() };
        if code == WSA_IO_PENDING {
            return Outcome::Pending;
        }
        pending.set(false);
        return Outcome::Done(CompletionResult::Recv(Err(map_error(code))));
    }

    Outcome::Done(CompletionResult::Recv(Ok(bytes_received)))
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
        return Outcome::Done(CompletionResult::Recv(Err(map_error(code))));
    }

    Outcome::Done(CompletionResult::Recv(Ok(transferred)))
}

fn map_error(code: i32) -> RecvError {
    match code {
        WSAETIMEDOUT | WSAECONNABORTED => RecvError::ConnectionRefused,
        WSAECONNREFUSED => RecvError::ConnectionRefused,
        WSAECONNRESET => RecvError::ConnectionResetByPeer,
        WSAEMSGSIZE => RecvError::MessageTooBig,
        WSAENETDOWN => RecvError::NetworkSubsystemFailed,
        WSAESHUTDOWN => RecvError::SocketNotConnected,
        WSAENOBUFS => RecvError::SystemResources,
        other => RecvError::Unexpected(std::io::Error::from_raw_os_error(other)),
    }
}
