//! `read` state machine: synchronous positional read (`SPEC_FULL.md` §4.3).
//! Completes inline during the submit flush; never goes kernel-pending.
//! Overlapped `ReadFileEx` is a drop-in future upgrade that would not change
//! this module's external shape (`SPEC_FULL.md` §9).

use std::fs::File;
use std::mem::ManuallyDrop;
use std::os::windows::fs::FileExt;
use std::os::windows::io::FromRawHandle;

use windows_sys::Win32::Foundation::{
    ERROR_DISK_FULL, ERROR_HANDLE_EOF, ERROR_INVALID_PARAMETER, ERROR_NOT_ENOUGH_MEMORY,
    ERROR_SEEK_ON_DEVICE, HANDLE,
};

use super::Outcome;
use crate::completion::{Completion, CompletionResult, Operation};
use crate::error::ReadError;

pub(crate) fn drive(completion: &Completion) -> Outcome {
    let Operation::Read {
        handle,
        buf,
        len,
        offset,
    } = &completion.operation
    else {
        unreachable!("read::drive invoked on a non-Read completion")
    };

    // SAFETY: `buf`/`len` are exclusively borrowed for the operation's
    // duration per the constructor's contract; the slice does not outlive
    // this call.
    let slice = unsafe { std::slice::from_raw_parts_mut(*buf, *len as usize) };

    // SAFETY: `handle` is a caller-owned, still-open file handle; wrapping it
    // in a `ManuallyDrop<File>` borrows it without taking ownership, so it is
    // never closed here.
    let file = ManuallyDrop::new(unsafe { File::from_raw_handle(to_raw_handle(*handle)) });

    match file.seek_read(slice, *offset) {
        Ok(n) => Outcome::Done(CompletionResult::Read(Ok(n as u32))),
        Err(err) => Outcome::Done(CompletionResult::Read(Err(map_error(err)))),
    }
}

fn to_raw_handle(handle: HANDLE) -> std::os::windows::io::RawHandle {
    handle as *mut std::ffi::c_void
}

fn map_error(err: std::io::Error) -> ReadError {
    match err.raw_os_error().map(|c| c as u32) {
        Some(ERROR_HANDLE_EOF) => ReadError::Unexpected(err),
        Some(ERROR_INVALID_PARAMETER) => ReadError::Alignment,
        Some(ERROR_NOT_ENOUGH_MEMORY) => ReadError::SystemResources,
        Some(ERROR_SEEK_ON_DEVICE) => ReadError::Unseekable,
        Some(ERROR_DISK_FULL) => ReadError::InputOutput,
        _ => match err.kind() {
            std::io::ErrorKind::PermissionDenied => ReadError::NotOpenForReading,
            _ => ReadError::Unexpected(err),
        },
    }
}
