//! A single-threaded, completion-based async I/O engine built on Windows
//! I/O Completion Ports (IOCP).
//!
//! This crate is the completion engine at the core of a larger
//! storage/replication system: it submits overlapped TCP and positional-file
//! operations, harvests kernel completions and in-process timer expirations
//! into one ordered ready queue, and invokes each caller's callback exactly
//! once. See `SPEC_FULL.md` in the repository root for the full design.
//!
//! # Example
//!
//! ```no_run
//! use std::ffi::c_void;
//! use wiocp::{Completion, CompletionResult, Reactor};
//!
//! unsafe fn on_timeout(_ctx: *mut c_void, result: CompletionResult) {
//!     assert!(matches!(result, CompletionResult::Timeout(Ok(()))));
//! }
//!
//! let reactor = Reactor::init(0, 0).expect("init");
//! let completion = Completion::timeout(std::ptr::null_mut(), on_timeout, reactor.now_ns());
//! reactor.submit(&completion);
//! reactor.tick().expect("tick");
//! reactor.deinit();
//! ```

#[cfg(not(windows))]
compile_error!("wiocp is a Windows I/O Completion Port engine and only builds on Windows");

mod completion;
mod error;
mod ffi;
mod fs;
mod net;
mod ops;
mod reactor;
mod timer;

pub use completion::{Callback, Completion, CompletionResult};
pub use error::{
    AcceptError, CloseError, ConnectError, InitError, OpenFileError, ReadError, RecvError,
    SendError, TimeoutError, WriteError,
};
pub use ffi::{IOCP_HARVEST_BATCH, SECTOR_SIZE, TIMER_RESOLUTION_MS};
pub use fs::{OpenMethod, dir_path, open_dir, open_file};
pub use net::open_socket;
pub use reactor::Reactor;

pub use windows_sys::Win32::Foundation::HANDLE;
pub use windows_sys::Win32::Networking::WinSock::SOCKET;
