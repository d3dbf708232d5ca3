//! The [`Completion`] control block and the intrusive FIFO it lives on.
//!
//! A `Completion` is allocated by the caller and must not move or be freed between
//! submission and callback invocation — see the engine-wide invariant in
//! [`crate::reactor`]. It carries its own `next` link so it can sit on exactly one
//! of the reactor's two queues (`timeouts`, `completed`) without a separate
//! allocation for list bookkeeping.

use std::cell::{Cell, UnsafeCell};
use std::ffi::c_void;
use std::net::SocketAddr;
use std::ptr::NonNull;

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Networking::WinSock::SOCKET;
use windows_sys::Win32::System::IO::OVERLAPPED;

use crate::error::{
    AcceptError, CloseError, ConnectError, ReadError, RecvError, SendError, TimeoutError,
    WriteError,
};
use crate::ffi::{ACCEPT_ADDR_BUF_LEN, INVALID_SOCKET};

/// Result delivered to a submission's callback. Tagged by operation rather than
/// generic over a result type, so a single concrete `Completion` can hold any kind
/// of outstanding operation — see the dispatch design note in `SPEC_FULL.md` §9.
pub enum CompletionResult {
    Accept(Result<SOCKET, AcceptError>),
    Connect(Result<(), ConnectError>),
    Send(Result<u32, SendError>),
    Recv(Result<u32, RecvError>),
    Read(Result<u32, ReadError>),
    Write(Result<u32, WriteError>),
    Close(Result<(), CloseError>),
    Timeout(Result<(), TimeoutError>),
}

/// Callback signature. `ctx` is the opaque pointer the caller supplied at submit
/// time; the engine never dereferences it.
///
/// # Safety
/// Implementations must tolerate being invoked from inside [`crate::Reactor::tick`]
/// or [`crate::Reactor::run_for_ns`] and must not assume anything about which
/// thread calls them beyond "the reactor's own thread".
pub type Callback = unsafe fn(*mut c_void, CompletionResult);

pub(crate) enum Operation {
    Accept {
        listen_socket: SOCKET,
        client_socket: Cell<SOCKET>,
        addr_buf: Box<[u8; ACCEPT_ADDR_BUF_LEN]>,
    },
    Connect {
        socket: SOCKET,
        addr: SocketAddr,
        pending: Cell<bool>,
    },
    Send {
        socket: SOCKET,
        buf: *const u8,
        len: u32,
        pending: Cell<bool>,
    },
    Recv {
        socket: SOCKET,
        buf: *mut u8,
        len: u32,
        pending: Cell<bool>,
    },
    Read {
        handle: HANDLE,
        buf: *mut u8,
        len: u32,
        offset: u64,
    },
    Write {
        handle: HANDLE,
        buf: *const u8,
        len: u32,
        offset: u64,
    },
    Close {
        handle: HANDLE,
    },
    Timeout {
        deadline_ns: u64,
    },
}

/// User-allocated control block for one in-flight operation.
///
/// Invariant: between [`crate::Reactor::submit_accept`] (or any other submit entry)
/// and the callback firing, this value must stay at a fixed address and must not be
/// read or written by the caller. The engine recovers `&Completion` from the raw
/// `OVERLAPPED*` the kernel hands back via the reactor's overlapped index, not via
/// pointer arithmetic on this struct's layout.
pub struct Completion {
    pub(crate) next: Cell<Option<NonNull<Completion>>>,
    context: *mut c_void,
    callback: Callback,
    overlapped: UnsafeCell<OVERLAPPED>,
    pub(crate) operation: Operation,
}

fn zeroed_overlapped() -> UnsafeCell<OVERLAPPED> {
    // SAFETY: OVERLAPPED is a plain C struct of integers/pointers; all-zero is the
    // state the kernel expects for a fresh, not-yet-submitted overlapped I/O.
    UnsafeCell::new(unsafe { std::mem::zeroed() })
}

impl Completion {
    pub fn accept(context: *mut c_void, callback: Callback, listen_socket: SOCKET) -> Self {
        Self {
            next: Cell::new(None),
            context,
            callback,
            overlapped: zeroed_overlapped(),
            operation: Operation::Accept {
                listen_socket,
                client_socket: Cell::new(INVALID_SOCKET),
                addr_buf: Box::new([0u8; ACCEPT_ADDR_BUF_LEN]),
            },
        }
    }

    pub fn connect(
        context: *mut c_void,
        callback: Callback,
        socket: SOCKET,
        addr: SocketAddr,
    ) -> Self {
        Self {
            next: Cell::new(None),
            context,
            callback,
            overlapped: zeroed_overlapped(),
            operation: Operation::Connect {
                socket,
                addr,
                pending: Cell::new(false),
            },
        }
    }

    /// # Safety
    /// `buf` must stay valid and exclusively borrowed for the duration of the
    /// operation, i.e. until the callback fires.
    pub unsafe fn send(
        context: *mut c_void,
        callback: Callback,
        socket: SOCKET,
        buf: *const u8,
        len: u32,
    ) -> Self {
        Self {
            next: Cell::new(None),
            context,
            callback,
            overlapped: zeroed_overlapped(),
            operation: Operation::Send {
                socket,
                buf,
                len,
                pending: Cell::new(false),
            },
        }
    }

    /// # Safety
    /// `buf` must stay valid and exclusively borrowed for the duration of the
    /// operation, i.e. until the callback fires.
    pub unsafe fn recv(
        context: *mut c_void,
        callback: Callback,
        socket: SOCKET,
        buf: *mut u8,
        len: u32,
    ) -> Self {
        Self {
            next: Cell::new(None),
            context,
            callback,
            overlapped: zeroed_overlapped(),
            operation: Operation::Recv {
                socket,
                buf,
                len,
                pending: Cell::new(false),
            },
        }
    }

    /// # Safety
    /// `buf` must stay valid and exclusively borrowed until the callback fires.
    /// `buf`/`offset` should be sector-aligned if `handle` was opened with direct I/O.
    pub unsafe fn read(
        context: *mut c_void,
        callback: Callback,
        handle: HANDLE,
        buf: *mut u8,
        len: u32,
        offset: u64,
    ) -> Self {
        Self {
            next: Cell::new(None),
            context,
            callback,
            overlapped: zeroed_overlapped(),
            operation: Operation::Read {
                handle,
                buf,
                len,
                offset,
            },
        }
    }

    /// # Safety
    /// `buf` must stay valid and exclusively borrowed until the callback fires.
    pub unsafe fn write(
        context: *mut c_void,
        callback: Callback,
        handle: HANDLE,
        buf: *const u8,
        len: u32,
        offset: u64,
    ) -> Self {
        Self {
            next: Cell::new(None),
            context,
            callback,
            overlapped: zeroed_overlapped(),
            operation: Operation::Write {
                handle,
                buf,
                len,
                offset,
            },
        }
    }

    pub fn close(context: *mut c_void, callback: Callback, handle: HANDLE) -> Self {
        Self {
            next: Cell::new(None),
            context,
            callback,
            overlapped: zeroed_overlapped(),
            operation: Operation::Close { handle },
        }
    }

    pub fn timeout(context: *mut c_void, callback: Callback, deadline_ns: u64) -> Self {
        Self {
            next: Cell::new(None),
            context,
            callback,
            overlapped: zeroed_overlapped(),
            operation: Operation::Timeout { deadline_ns },
        }
    }

    pub(crate) fn overlapped_ptr(&self) -> *mut OVERLAPPED {
        self.overlapped.get()
    }

    /// # Safety
    /// Must be called at most once per submission, and only by the reactor once it
    /// has determined the operation has truly finished (not would-block).
    pub(crate) unsafe fn fire(&self, result: CompletionResult) {
        unsafe { (self.callback)(self.context, result) }
    }
}

/// Intrusive singly-linked FIFO. Membership is a precondition the owning queue
/// tracks; a given `Completion` must never be linked into two queues at once
/// (debug builds assert this at push time).
pub(crate) struct CompletionQueue {
    head: Option<NonNull<Completion>>,
    tail: Option<NonNull<Completion>>,
}

impl CompletionQueue {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// # Safety
    /// `completion` must not currently be linked into any other queue.
    pub(crate) unsafe fn push_back(&mut self, completion: NonNull<Completion>) {
        debug_assert!(
            unsafe { (*completion.as_ptr()).next.get() }.is_none() || self.tail == Some(completion),
            "completion pushed while still linked elsewhere"
        );
        unsafe { (*completion.as_ptr()).next.set(None) };
        match self.tail {
            Some(tail) => unsafe { (*tail.as_ptr()).next.set(Some(completion)) },
            None => self.head = Some(completion),
        }
        self.tail = Some(completion);
    }

    pub(crate) fn pop_front(&mut self) -> Option<NonNull<Completion>> {
        let head = self.head?;
        let next = unsafe { (*head.as_ptr()).next.take() };
        self.head = next;
        if self.head.is_none() {
            self.tail = None;
        }
        Some(head)
    }

    /// Snapshots this queue into a fresh, independent `CompletionQueue`, leaving
    /// `self` empty. This is the "atomically snapshot, then reset" step the flush
    /// algorithm requires before invoking any callback.
    pub(crate) fn take(&mut self) -> CompletionQueue {
        std::mem::replace(self, CompletionQueue::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn noop_callback(_ctx: *mut c_void, _result: CompletionResult) {}

    #[test]
    fn fifo_order_is_preserved() {
        let a = Box::new(Completion::timeout(std::ptr::null_mut(), noop_callback, 0));
        let b = Box::new(Completion::timeout(std::ptr::null_mut(), noop_callback, 0));
        let c = Box::new(Completion::timeout(std::ptr::null_mut(), noop_callback, 0));

        let a_ptr = NonNull::from(Box::leak(a));
        let b_ptr = NonNull::from(Box::leak(b));
        let c_ptr = NonNull::from(Box::leak(c));

        let mut queue = CompletionQueue::new();
        unsafe {
            queue.push_back(a_ptr);
            queue.push_back(b_ptr);
            queue.push_back(c_ptr);
        }

        assert_eq!(queue.pop_front(), Some(a_ptr));
        assert_eq!(queue.pop_front(), Some(b_ptr));
        assert_eq!(queue.pop_front(), Some(c_ptr));
        assert_eq!(queue.pop_front(), None);

        unsafe {
            drop(Box::from_raw(a_ptr.as_ptr()));
            drop(Box::from_raw(b_ptr.as_ptr()));
            drop(Box::from_raw(c_ptr.as_ptr()));
        }
    }

    #[test]
    fn take_leaves_source_empty() {
        let a = Box::new(Completion::timeout(std::ptr::null_mut(), noop_callback, 0));
        let a_ptr = NonNull::from(Box::leak(a));

        let mut queue = CompletionQueue::new();
        unsafe { queue.push_back(a_ptr) };

        let mut snapshot = queue.take();
        assert!(queue.is_empty());
        assert_eq!(snapshot.pop_front(), Some(a_ptr));

        unsafe { drop(Box::from_raw(a_ptr.as_ptr())) };
    }
}
