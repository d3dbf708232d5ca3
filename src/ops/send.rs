//! `send` state machine: `WSASend` over a single buffer, two states via
//! `pending` (`SPEC_FULL.md` §4.3).

use windows_sys::Win32::Networking::WinSock::{
    SOCKET, WSABUF, WSAECONNRESET, WSAEMSGSIZE, WSAENETDOWN, WSAENOBUFS, WSAENOTSOCK,
    WSAESHUTDOWN, WSA_IO_PENDING, WSAGetLastError, WSAGetOverlappedResult, WSASend,
};

use super::Outcome;
use crate::completion::{Completion, CompletionResult, Operation};
use crate::error::SendError;

pub(crate) fn drive(completion: &Completion) -> Outcome {
    let Operation::Send {
        socket,
        buf,
        len,
        pending,
    } = &completion.operation
    else {
        unreachable!("send::drive invoked on a non-Send completion")
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
    buf: *const u8,
    len: u32,
    pending: &std::cell::Cell<bool>,
) -> Outcome {
    let mut wsabuf = WSABUF {
        len,
        buf: buf as *mut u8,
    };
    let mut bytes_sent = 0u32;

    pending.set(true);
    let result = unsafe {
        WSASend(
            socket,
            &mut wsabuf,
            1,
            &mut bytes_sent,
            0,
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
        return Outcome::Done(CompletionResult::Send(Err(map_error(code))));
    }

    // Inline success: FILE_SKIP_COMPLETION_PORT_ON_SUCCESS means no packet is
    // coming, so report the transfer now rather than waiting on the IOCP.
    Outcome::Done(CompletionResult::Send(Ok(bytes_sent)))
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
        return Outcome::Done(CompletionResult::Send(Err(map_error(code))));
    }

    Outcome::Done(CompletionResult::Send(Ok(transferred)))
}

fn map_error(code: i32) -> SendError {
    match code {
        WSAECONNRESET => SendError::ConnectionResetByPeer,
        WSAEMSGSIZE => SendError::MessageTooBig,
        WSAENETDOWN => SendError::NetworkSubsystemFailed,
        WSAENOBUFS => SendError::SystemResources,
        WSAENOTSOCK => SendError::FileDescriptorNotASocket,
        WSAESHUTDOWN => SendError::BrokenPipe,
        other => SendError::Unexpected(std::io::Error::from_raw_os_error(other)),
    }
}
