//! `write` state machine: synchronous positional write (`SPEC_FULL.md` §4.3).
//! Mirrors [`crate::ops::read`]; completes inline, never goes kernel-pending.

use std::fs::File;
use std::mem::ManuallyDrop;
use std::os::windows::fs::FileExt;
use std::os::windows::io::FromRawHandle;

use windows_sys::Win32::Foundation::{
    ERROR_DISK_FULL, ERROR_DISK_QUOTA_EXCEEDED, ERROR_INVALID_PARAMETER,
    ERROR_SEEK_ON_DEVICE, HANDLE,
};

use super::Outcome;
use crate::completion::{Completion, CompletionResult, Operation};
use crate::error::WriteError;

pub(crate) fn drive(completion: &Completion) -> Outcome {
    let Operation::Write {
        handle,
        buf,
        len,
        offset,
    } = &completion.operation
    else {
        unreachable!("write::drive invoked on a non-Write completion")
    };

    // SAFETY: `buf`/`len` are exclusively borrowed for the operation's
    // duration per the constructor's contract.
    let slice = unsafe { std::slice::from_raw_parts(*buf, *len as usize) };

    // SAFETY: see `ops::read::drive` — borrows the caller-owned handle
    // without taking ownership of it.
    let file = ManuallyDrop::new(unsafe { File::from_raw_handle(to_raw_handle(*handle)) });

    match file.seek_write(slice, *offset) {
        Ok(n) => Outcome::Done(CompletionResult::Write(Ok(n as u32))),
        Err(err) => Outcome::Done(CompletionResult::Write(Err(map_error(err)))),
    }
}

fn to_raw_handle(handle: HANDLE) -> std::os::windows::io::RawHandle {
    handle as *mut std::ffi::c_void
}

fn map_error(err: std::io::Error) -> WriteError {
    match err.raw_os_error().map(|c| c as u32) {
        Some(ERROR_DISK_FULL) => WriteError::NoSpaceLeft,
        Some(ERROR_DISK_QUOTA_EXCEEDED) => WriteError::DiskQuota,
        Some(ERROR_INVALID_PARAMETER) => WriteError::Alignment,
        Some(ERROR_SEEK_ON_DEVICE) => WriteError::Unseekable,
        _ => match err.kind() {
            std::io::ErrorKind::PermissionDenied => WriteError::NotOpenForWriting,
            _ => WriteError::InputOutput,
        },
    }
}
