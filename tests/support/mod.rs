//! Shared scaffolding for the scenario tests in this directory: a generic
//! single-slot result holder plus a `tick`-until-ready loop, since a
//! `Reactor` only ever delivers results through callbacks.

#![cfg(windows)]

use std::cell::Cell;
use std::ffi::c_void;
use std::sync::Once;
use std::time::{Duration, Instant};

use wiocp::Reactor;

/// Initializes `env_logger` once per test binary, so `log::trace!`/`debug!`
/// output from the reactor (flush cycles, IOCP harvests, `ConnectEx`
/// resolution) is visible when a test is run with `RUST_LOG` set.
pub fn init_logger() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

/// Stores at most one callback result, written from inside an `unsafe fn`
/// callback and read back by the test after draining the reactor.
pub struct Slot<T> {
    value: Cell<Option<T>>,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            value: Cell::new(None),
        }
    }

    pub fn ctx(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }

    pub fn is_set(&self) -> bool {
        // SAFETY: single-threaded; no concurrent writer while this read happens.
        unsafe { &*self.value.as_ptr() }.is_some()
    }

    pub fn take(&self) -> T {
        self.value.take().expect("slot read before its callback fired")
    }

    /// # Safety
    /// `ctx` must be a pointer obtained from this same `Slot<T>`'s [`Slot::ctx`].
    pub unsafe fn fill(ctx: *mut c_void, value: T) {
        let slot = unsafe { &*(ctx as *const Self) };
        slot.value.set(Some(value));
    }
}

/// Ticks `reactor` until `done` reports true or `timeout` elapses.
pub fn drain_until(reactor: &Reactor, done: impl Fn() -> bool, timeout: Duration) {
    let start = Instant::now();
    while !done() {
        reactor.tick().expect("reactor tick failed");
        assert!(
            start.elapsed() < timeout,
            "timed out waiting for a completion to fire"
        );
        std::thread::yield_now();
    }
}
