//! Durable file open and minimal directory handling (`SPEC_FULL.md` §4.4,
//! `open_file`/`open_dir`).
//!
//! File I/O itself goes through `std::fs::File` (via
//! `std::os::windows::fs::OpenOptionsExt` for the Windows-only flags this
//! contract needs); only the byte-range lock — which `std::fs` has no
//! portable equivalent for — drops to a raw `windows-sys` call.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::windows::ffi::OsStringExt;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::{AsRawHandle, IntoRawHandle};
use std::path::Path;

use windows_sys::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_PATH_NOT_FOUND, HANDLE};
use windows_sys::Win32::Storage::FileSystem::{
    FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_NO_BUFFERING, FILE_FLAG_WRITE_THROUGH,
    GetFinalPathNameByHandleW, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx,
};

use crate::error::OpenFileError;
use crate::ffi::SECTOR_SIZE;
use crate::reactor::Reactor;

/// How `open_file` should treat an existing or missing path, per
/// `SPEC_FULL.md` §4.4.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpenMethod {
    /// Fails if the file already exists.
    Create,
    /// Opens an existing file if present, otherwise creates it.
    CreateOrOpen,
    /// Fails if the file does not already exist.
    Open,
}

/// Opens `path` relative to `dir` (if given) as a durable, direct-I/O file and
/// associates it with `reactor`. `size` must be a multiple of
/// [`crate::SECTOR_SIZE`]; on fresh creation the file is preallocated to
/// exactly `size` bytes, fsynced, and locked exclusively for the lifetime of
/// the returned handle.
///
/// Lock contention and a post-create size smaller than requested are
/// programmer errors per the spec's durability contract: both abort the
/// process after logging, rather than returning an error.
pub fn open_file(
    reactor: &Reactor,
    dir: Option<HANDLE>,
    path: impl AsRef<Path>,
    size: u64,
    method: OpenMethod,
    direct_io: bool,
) -> Result<HANDLE, OpenFileError> {
    if size % SECTOR_SIZE != 0 {
        return Err(OpenFileError::InvalidSectorSize);
    }

    let full_path = match dir {
        Some(dir) => dir_path(dir).map_err(OpenFileError::Unexpected)?.join(path.as_ref()),
        None => path.as_ref().to_path_buf(),
    };

    let (file, created) = open_with_method(&full_path, method, direct_io)?;

    acquire_exclusive_lock(&file, size);

    if created {
        preallocate(&file, size);
    }

    file.sync_all().map_err(OpenFileError::Unexpected)?;

    let actual_size = file
        .metadata()
        .map_err(OpenFileError::Unexpected)?
        .len();
    if actual_size < size {
        log::error!(
            "open_file: {} is {actual_size} bytes, expected at least {size}; aborting",
            full_path.display()
        );
        std::process::abort();
    }

    let handle = file.as_raw_handle() as HANDLE;
    reactor
        .associate(handle as isize)
        .map_err(OpenFileError::Unexpected)?;

    // Ownership of the underlying HANDLE transfers to the caller, who closes
    // it via the engine's `close` op, not `File::drop`.
    let handle = file.into_raw_handle() as HANDLE;
    Ok(handle)
}

/// Opens a directory handle read-only, purely so its path can be passed as
/// `dir` to [`open_file`] for relative opens. Performs no locking and no
/// fsync, matching the spec's Non-goal that directory durability is
/// delegated to the caller.
pub fn open_dir(path: impl AsRef<Path>) -> io::Result<HANDLE> {
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(FILE_FLAG_BACKUP_SEMANTICS)
        .open(path.as_ref())?;
    Ok(file.into_raw_handle() as HANDLE)
}

/// Recovers the filesystem path a directory handle (as returned by
/// [`open_dir`]) was opened with, for callers that only kept the handle.
pub fn dir_path(dir: HANDLE) -> io::Result<std::path::PathBuf> {
    let mut buf = vec![0u16; 260];
    loop {
        let len = unsafe {
            GetFinalPathNameByHandleW(dir, buf.as_mut_ptr(), buf.len() as u32, 0)
        };
        if len == 0 {
            return Err(io::Error::last_os_error());
        }
        if (len as usize) < buf.len() {
            buf.truncate(len as usize);
            return Ok(std::path::PathBuf::from(std::ffi::OsString::from_wide(&buf)));
        }
        buf.resize(len as usize + 1, 0);
    }
}

fn open_with_method(
    path: &Path,
    method: OpenMethod,
    direct_io: bool,
) -> Result<(File, bool), OpenFileError> {
    let mut flags = FILE_FLAG_WRITE_THROUGH;
    if direct_io {
        flags |= FILE_FLAG_NO_BUFFERING;
    }

    let mut open = |create_new: bool, create: bool| {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(create_new)
            .create(create)
            .share_mode(0)
            .custom_flags(flags)
            .open(path)
    };

    match method {
        OpenMethod::Create => open(true, false).map(|f| (f, true)).map_err(map_open_error),
        OpenMethod::Open => open(false, false).map(|f| (f, false)).map_err(map_open_error),
        OpenMethod::CreateOrOpen => match open(false, false) {
            Ok(f) => Ok((f, false)),
            Err(err)
                if err.raw_os_error().map(|c| c as u32)
                    == Some(ERROR_FILE_NOT_FOUND)
                    || err.raw_os_error().map(|c| c as u32) == Some(ERROR_PATH_NOT_FOUND) =>
            {
                open(true, false).map(|f| (f, true)).map_err(map_open_error)
            }
            Err(err) => Err(map_open_error(err)),
        },
    }
}

fn map_open_error(err: io::Error) -> OpenFileError {
    match err.kind() {
        io::ErrorKind::NotFound => OpenFileError::NotFound,
        io::ErrorKind::AlreadyExists => OpenFileError::AlreadyExists,
        io::ErrorKind::PermissionDenied => OpenFileError::PermissionDenied,
        _ => OpenFileError::Unexpected(err),
    }
}

/// Acquires a mandatory exclusive byte-range lock over `[0, size)`. Lock
/// contention means another process already owns this file; per the spec
/// this is a programmer error with no retry policy, so it aborts rather than
/// returning an error.
fn acquire_exclusive_lock(file: &File, size: u64) {
    let handle = file.as_raw_handle() as HANDLE;
    let mut overlapped: windows_sys::Win32::System::IO::OVERLAPPED = unsafe { std::mem::zeroed() };
    let ok = unsafe {
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            (size & 0xFFFF_FFFF) as u32,
            (size >> 32) as u32,
            &mut overlapped,
        )
    };
    if ok == 0 {
        log::error!("open_file: exclusive lock contended, another process owns this file");
        std::process::abort();
    }
}

/// Preallocates `size` bytes on fresh creation. Prefers `SetEndOfFile` (via
/// `File::set_len`); on failure, falls back to writing a single zero sector
/// at `size - SECTOR_SIZE`, retrying on short writes.
fn preallocate(file: &File, size: u64) {
    use std::os::windows::fs::FileExt;

    if file.set_len(size).is_ok() {
        return;
    }

    let zero_sector = vec![0u8; SECTOR_SIZE as usize];
    let mut written = 0usize;
    let offset = size.saturating_sub(SECTOR_SIZE);
    while written < zero_sector.len() {
        match file.seek_write(&zero_sector[written..], offset + written as u64) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(_) => break,
        }
    }
}
