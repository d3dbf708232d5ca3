//! Constants and extension-function plumbing that `windows-sys` does not hand us directly.
//!
//! `AcceptEx` is statically linkable through `mswsock.lib` and ships as a normal
//! `windows-sys` function. `ConnectEx` is not in any import library; Winsock only
//! exposes it through `WSAIoctl(SIO_GET_EXTENSION_FUNCTION_POINTER, ...)` keyed by a
//! well-known GUID. This module carries exactly that lookup plumbing, plus the small
//! set of layout constants the engine needs and that aren't worth a crate dependency.

use std::ffi::c_void;
use std::mem::size_of;

use windows_sys::Win32::Networking::WinSock::{SOCKADDR_STORAGE, SOCKET};

/// Socket value meaning "no socket" — mirrors `winsock2.h`'s `INVALID_SOCKET`.
pub(crate) const INVALID_SOCKET: SOCKET = SOCKET::MAX;

/// `SIO_GET_EXTENSION_FUNCTION_POINTER`, from `mswsock.h`. Not re-exported by
/// `windows-sys`'s WinSock feature, so it is pinned here as a raw constant.
pub(crate) const SIO_GET_EXTENSION_FUNCTION_POINTER: u32 = 0xC800_0006;

/// `WSAID_CONNECTEX`, the GUID `ConnectEx` is looked up by. Value from `mswsock.h`.
pub(crate) const WSAID_CONNECTEX: Guid = Guid {
    data1: 0x2550_19e0,
    data2: 0x4f54,
    data3: 0x4e29,
    data4: [0x95, 0x8f, 0x74, 0x8f, 0x4a, 0x0e, 0xda, 0x2e],
};

/// Layout-compatible stand-in for `windows_sys::core::GUID`, spelled out locally so
/// this module has no dependency on a `windows-sys` feature beyond the WinSock one.
#[repr(C)]
pub(crate) struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

/// `ConnectEx`'s signature, resolved dynamically. Mirrors the declaration in
/// `mswsock.h`; `windows-sys` does not expose a typed function-pointer alias for it
/// since it is never statically linked.
pub(crate) type LpfnConnectex = unsafe extern "system" fn(
    s: SOCKET,
    name: *const c_void,
    namelen: i32,
    lpsendbuffer: *const c_void,
    dwsenddatalength: u32,
    lpdwbytessent: *mut u32,
    lpoverlapped: *mut windows_sys::Win32::System::IO::OVERLAPPED,
) -> windows_sys::Win32::Foundation::BOOL;

/// Length of a single address slot in the `AcceptEx` dual-address buffer:
/// `sizeof(sockaddr_storage) + 16`, per the Win32 contract for `AcceptEx`'s
/// `lpOutputBuffer` (it reserves 16 extra bytes per address beyond the largest
/// possible `sockaddr`).
pub(crate) const ACCEPT_ADDR_LEN: usize = size_of::<SOCKADDR_STORAGE>() + 16;

/// Full `AcceptEx` output buffer length: local address slot followed by remote.
pub(crate) const ACCEPT_ADDR_BUF_LEN: usize = 2 * ACCEPT_ADDR_LEN;

/// Sector size assumed for direct (unbuffered) I/O. 4 KiB covers every NTFS volume
/// this engine is expected to run on; a real deployment would probe
/// `GetDiskFreeSpace`, but the spec fixes this as a compile-time constant.
pub const SECTOR_SIZE: u64 = 4096;

/// Maximum completion entries harvested from the IOCP in a single flush.
pub const IOCP_HARVEST_BATCH: usize = 64;

/// Wall-clock resolution used to parameterize the IOCP wait timeout.
pub const TIMER_RESOLUTION_MS: u32 = 1;
