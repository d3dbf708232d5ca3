//! `close` state machine: probes whether the descriptor is a socket or a
//! kernel handle, then closes it the right way (`SPEC_FULL.md` §4.3).
//! Completes inline; never goes kernel-pending.

use windows_sys::Win32::Foundation::{CloseHandle, ERROR_INVALID_HANDLE, GetLastError};
use windows_sys::Win32::Networking::WinSock::{
    SOCKET, SOL_SOCKET, SO_ERROR, WSAENOTSOCK, closesocket, getsockopt,
};

use super::Outcome;
use crate::completion::{Completion, CompletionResult, Operation};
use crate::error::CloseError;

pub(crate) fn drive(completion: &Completion) -> Outcome {
    let Operation::Close { handle } = &completion.operation else {
        unreachable!("close::drive invoked on a non-Close completion")
    };

    let socket = *handle as SOCKET;
    let mut error_code: i32 = 0;
    let mut len = std::mem::size_of::<i32>() as i32;
    let probe = unsafe {
        getsockopt(
            socket,
            SOL_SOCKET,
            SO_ERROR,
            &mut error_code as *mut i32 as *mut u8,
            &mut len,
        )
    };

    let is_socket = !(probe != 0
        && unsafe { windows_sys::Win32::Networking::WinSock::WSAGetLastError() } == WSAENOTSOCK);

    if is_socket {
        let ok = unsafe { closesocket(socket) };
        if ok != 0 {
            return Outcome::Done(CompletionResult::Close(Err(CloseError::Unexpected(
                std::io::Error::from_raw_os_error(unsafe {
                    windows_sys::Win32::Networking::WinSock::WSAGetLastError()
                }),
            ))));
        }
        return Outcome::Done(CompletionResult::Close(Ok(())));
    }

    let ok = unsafe { CloseHandle(*handle) };
    if ok == 0 {
        let code = unsafe { GetLastError() };
        return Outcome::Done(CompletionResult::Close(Err(map_error(code))));
    }
    Outcome::Done(CompletionResult::Close(Ok(())))
}

fn map_error(code: u32) -> CloseError {
    match code {
        ERROR_INVALID_HANDLE => CloseError::FileDescriptorInvalid,
        other => CloseError::Unexpected(std::io::Error::from_raw_os_error(other as i32)),
    }
}
