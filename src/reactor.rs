//! The [`Reactor`]: owns the IOCP handle, the timer list, and the ready queue,
//! and drives the flush cycle described in `SPEC_FULL.md` §4.1.
//!
//! A `Reactor` is single-threaded: every method here takes `&self` (interior
//! mutability via `Cell`/`RefCell`) rather than `&mut self`, because the only
//! cross-thread actor in this design is the kernel itself posting completions
//! to the IOCP — never another thread of *our* code.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::io;
use std::ptr::NonNull;
use std::time::Instant;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, HANDLE, INVALID_HANDLE_VALUE, WAIT_TIMEOUT,
};
use windows_sys::Win32::Networking::WinSock::{
    SOCKET, WSACleanup, WSADATA, WSAIoctl, WSAStartup,
};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatusEx, OVERLAPPED, OVERLAPPED_ENTRY,
};

use crate::completion::{Completion, CompletionQueue};
use crate::error::InitError;
use crate::ffi::{IOCP_HARVEST_BATCH, LpfnConnectex, SIO_GET_EXTENSION_FUNCTION_POINTER, WSAID_CONNECTEX};
use crate::ops::{self, Outcome};
use crate::timer::TimerList;

const WINSOCK_VERSION: u16 = 0x0202; // MAKEWORD(2, 2), i.e. Winsock 2.2

#[derive(Clone, Copy, PartialEq, Eq)]
enum FlushMode {
    Blocking,
    NonBlocking,
}

/// The single-threaded completion engine. See `SPEC_FULL.md` §3-4.
pub struct Reactor {
    iocp: HANDLE,
    epoch: Instant,
    io_pending: Cell<usize>,
    timeouts: RefCell<TimerList>,
    completed: RefCell<CompletionQueue>,
    /// Maps a still-outstanding overlapped's address to the `Completion` that
    /// owns it, so a harvested `OVERLAPPED*` can be translated back without
    /// relying on the struct's memory layout (`SPEC_FULL.md` §9).
    overlapped_index: RefCell<HashMap<usize, NonNull<Completion>>>,
    /// `ConnectEx` is not statically linkable; its pointer is resolved once
    /// per process via `WSAIoctl` and cached here (`SPEC_FULL.md` §9).
    connect_ex: Cell<Option<LpfnConnectex>>,
}

impl Reactor {
    /// Initializes Winsock 2.2 and creates a fresh completion port.
    /// `entries` is a concurrency hint passed straight through to
    /// `CreateIoCompletionPort`'s `NumberOfConcurrentThreads`; `0` lets the OS
    /// pick a default. `flags` is reserved and must be `0`.
    pub fn init(entries: u32, flags: u32) -> Result<Self, InitError> {
        debug_assert_eq!(flags, 0, "flags is reserved and must be zero");

        let mut wsa_data: WSADATA = unsafe { std::mem::zeroed() };
        let startup_result = unsafe { WSAStartup(WINSOCK_VERSION, &mut wsa_data) };
        if startup_result != 0 {
            return Err(InitError::WinsockStartup(io::Error::from_raw_os_error(
                startup_result,
            )));
        }

        let iocp = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, entries) };
        if iocp == 0 {
            let err = io::Error::last_os_error();
            unsafe { WSACleanup() };
            return Err(InitError::CreateCompletionPort(err));
        }

        log::debug!("reactor initialized, iocp={iocp:#x}");

        Ok(Self {
            iocp,
            epoch: Instant::now(),
            io_pending: Cell::new(0),
            timeouts: RefCell::new(TimerList::new()),
            completed: RefCell::new(CompletionQueue::new()),
            overlapped_index: RefCell::new(HashMap::new()),
            connect_ex: Cell::new(None),
        })
    }

    /// Tears down the completion port and Winsock. The caller must ensure no
    /// Completion is still outstanding (`io_pending == 0` and both queues
    /// empty); violating this is a programmer error.
    pub fn deinit(self) {
        debug_assert_eq!(self.io_pending.get(), 0, "deinit with io still pending");
        debug_assert!(self.completed.borrow().is_empty(), "deinit with completions undrained");
        log::debug!("reactor shutting down, iocp={:#x}", self.iocp);
        unsafe {
            CloseHandle(self.iocp);
            WSACleanup();
        }
    }

    /// Associates a raw handle or socket with this reactor's completion port.
    /// Idempotent in the sense that re-associating the same handle is a
    /// programmer error the OS itself rejects; callers (¸[`crate::net`],
    /// [`crate::fs`]) each associate exactly once per descriptor.
    pub(crate) fn associate(&self, handle: isize) -> io::Result<()> {
        let result = unsafe { CreateIoCompletionPort(handle, self.iocp, 0, 0) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Nanoseconds elapsed since this reactor was created. Monotonic,
    /// non-decreasing; used to compute absolute timer deadlines.
    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Resolves (and caches) `ConnectEx`'s function pointer for `socket`'s
    /// address family. The pointer is process-wide stable once resolved, so
    /// later calls on a different socket of the same family reuse it.
    pub(crate) fn connect_ex(&self, socket: SOCKET) -> io::Result<LpfnConnectex> {
        if let Some(f) = self.connect_ex.get() {
            return Ok(f);
        }

        let mut fn_ptr: LpfnConnectex = unsafe { std::mem::zeroed() };
        let mut bytes_returned: u32 = 0;
        let ok = unsafe {
            WSAIoctl(
                socket,
                SIO_GET_EXTENSION_FUNCTION_POINTER,
                &WSAID_CONNECTEX as *const _ as *const c_void,
                std::mem::size_of_val(&WSAID_CONNECTEX) as u32,
                &mut fn_ptr as *mut _ as *mut c_void,
                std::mem::size_of::<LpfnConnectex>() as u32,
                &mut bytes_returned,
                std::ptr::null_mut(),
                None,
            )
        };
        if ok != 0 {
            return Err(io::Error::last_os_error());
        }

        log::debug!("resolved ConnectEx extension pointer");
        self.connect_ex.set(Some(fn_ptr));
        Ok(fn_ptr)
    }

    /// Submits a pre-constructed [`Completion`] for its first drive attempt.
    /// `completion` must outlive the operation: the caller keeps it pinned
    /// (e.g. boxed) until its callback fires (`SPEC_FULL.md` §3).
    ///
    /// # Safety
    /// `completion` must not already be linked into any queue (i.e. must not
    /// currently be submitted).
    pub fn submit(&self, completion: &Completion) {
        let ptr = NonNull::from(completion);
        if let crate::completion::Operation::Timeout { deadline_ns } = &completion.operation {
            if *deadline_ns <= self.now_ns() {
                unsafe { self.completed.borrow_mut().push_back(ptr) };
            } else {
                unsafe { self.timeouts.borrow_mut().insert(ptr) };
            }
        } else {
            unsafe { self.completed.borrow_mut().push_back(ptr) };
        }
    }

    /// One non-blocking flush cycle: drains expired timers and any
    /// already-queued IOCP completions, then invokes every ready callback.
    /// Never blocks.
    pub fn tick(&self) -> io::Result<()> {
        self.flush(FlushMode::NonBlocking)
    }

    /// Blocks in flush cycles until at least `ns` nanoseconds have elapsed.
    /// Implemented by submitting an internal timer and looping blocking
    /// flushes until it fires (`SPEC_FULL.md` §4.1).
    pub fn run_for_ns(&self, ns: u64) -> io::Result<()> {
        struct ExitFlag(Cell<bool>);
        unsafe fn on_timer_fired(ctx: *mut c_void, _result: crate::completion::CompletionResult) {
            let flag = unsafe { &*(ctx as *const ExitFlag) };
            flag.0.set(true);
        }

        let flag = ExitFlag(Cell::new(false));
        let deadline = self.now_ns() + ns;
        let completion = Completion::timeout(
            &flag as *const ExitFlag as *mut c_void,
            on_timer_fired,
            deadline,
        );
        self.submit(&completion);

        while !flag.0.get() {
            self.flush(FlushMode::Blocking)?;
        }
        Ok(())
    }

    fn flush(&self, mode: FlushMode) -> io::Result<()> {
        let mut completed = self.completed.borrow_mut();

        let mut timeout_ms: Option<u32> = None;
        if completed.is_empty() {
            let now = self.now_ns();
            let remaining = self.timeouts.borrow_mut().flush(now, &mut completed);
            timeout_ms = remaining.map(round_half_up_ms);
        }

        if self.io_pending.get() > 0 && completed.is_empty() {
            let wait_ms = match mode {
                FlushMode::NonBlocking => 0,
                FlushMode::Blocking => timeout_ms
                    .expect("blocking flush with io_pending > 0 requires an outstanding timer"),
            };
            self.drain_iocp(wait_ms, &mut completed)?;
        }

        let mut snapshot = completed.take();
        drop(completed);

        while let Some(ptr) = snapshot.pop_front() {
            // SAFETY: every Completion on a reactor queue stays alive (and at a
            // fixed address) until its callback fires, per the engine-wide
            // storage invariant.
            let completion = unsafe { ptr.as_ref() };
            match ops::drive(self, completion) {
                Outcome::Pending => {
                    self.io_pending.set(self.io_pending.get() + 1);
                    self.overlapped_index
                        .borrow_mut()
                        .insert(completion.overlapped_ptr() as usize, ptr);
                    log::trace!("operation went kernel-pending");
                }
                Outcome::Done(result) => {
                    // SAFETY: this is the one point in the engine that fires a
                    // completion's callback, and it is reached at most once per
                    // submission (drive() never returns Done twice for the same
                    // Completion without an intervening re-submit).
                    unsafe { completion.fire(result) };
                }
            }
        }

        Ok(())
    }

    fn drain_iocp(&self, wait_ms: u32, completed: &mut CompletionQueue) -> io::Result<()> {
        let mut entries: [OVERLAPPED_ENTRY; IOCP_HARVEST_BATCH] =
            unsafe { std::mem::zeroed() };
        let mut removed: u32 = 0;

        let ok = unsafe {
            GetQueuedCompletionStatusEx(
                self.iocp,
                entries.as_mut_ptr(),
                IOCP_HARVEST_BATCH as u32,
                &mut removed,
                wait_ms,
                0,
            )
        };

        if ok == 0 {
            let err = unsafe { GetLastError() };
            if err == WAIT_TIMEOUT {
                return Ok(());
            }
            return Err(io::Error::from_raw_os_error(err as i32));
        }

        let mut index = self.overlapped_index.borrow_mut();
        for entry in &entries[..removed as usize] {
            self.io_pending.set(self.io_pending.get().saturating_sub(1));
            let addr = entry.lpOverlapped as usize;
            match index.remove(&addr) {
                Some(ptr) => unsafe { completed.push_back(ptr) },
                None => log::warn!("harvested overlapped with no matching registration"),
            }
        }

        Ok(())
    }
}

/// Rounds `ns` to the nearest millisecond, half-up, saturating to
/// `DWORD_MAX - 1` (never `INFINITE`) so a blocking wait can never be
/// mistaken for "wait forever".
fn round_half_up_ms(remaining_ns: u64) -> u32 {
    let ms = (remaining_ns + 500_000) / 1_000_000;
    ms.min(u32::MAX as u64 - 1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_half_up_ms_rounds_and_saturates() {
        assert_eq!(round_half_up_ms(0), 0);
        assert_eq!(round_half_up_ms(499_999), 0);
        assert_eq!(round_half_up_ms(500_000), 1);
        assert_eq!(round_half_up_ms(1_500_000), 2);
        assert_eq!(round_half_up_ms(u64::MAX), u32::MAX - 1);
    }
}
