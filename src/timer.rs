//! The timer wheel: a FIFO of outstanding `timeout` completions, scanned linearly
//! on every flush. See `SPEC_FULL.md` §4.2 — this is deliberately O(n) per flush;
//! `n` is the count of outstanding timers, expected small for this engine's
//! workloads, so a real wheel/heap was not worth the complexity.

use std::ptr::NonNull;

use crate::completion::{Completion, CompletionQueue, Operation};

pub(crate) struct TimerList {
    queue: CompletionQueue,
}

impl TimerList {
    pub(crate) const fn new() -> Self {
        Self {
            queue: CompletionQueue::new(),
        }
    }

    /// # Safety
    /// `completion` must hold a `Timeout` operation and must not be linked into any
    /// other queue.
    pub(crate) unsafe fn insert(&mut self, completion: NonNull<Completion>) {
        unsafe { self.queue.push_back(completion) };
    }

    /// Walks every outstanding timer once. Expired entries are unlinked and
    /// appended to `completed` in scan order (i.e. submission order among timers
    /// that share a flush); survivors are relinked preserving their relative order.
    /// Returns the minimum remaining duration among survivors, or `None` if the
    /// timer list is empty after the scan.
    pub(crate) fn flush(&mut self, now_ns: u64, completed: &mut CompletionQueue) -> Option<u64> {
        let mut survivors = CompletionQueue::new();
        let mut min_remaining: Option<u64> = None;

        while let Some(node) = self.queue.pop_front() {
            let deadline_ns = match unsafe { &(*node.as_ptr()).operation } {
                Operation::Timeout { deadline_ns } => *deadline_ns,
                _ => unreachable!("only Timeout completions are ever linked into TimerList"),
            };

            if now_ns >= deadline_ns {
                unsafe { completed.push_back(node) };
            } else {
                let remaining = deadline_ns - now_ns;
                min_remaining = Some(min_remaining.map_or(remaining, |m| m.min(remaining)));
                unsafe { survivors.push_back(node) };
            }
        }

        self.queue = survivors;
        min_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_void;
    use crate::completion::CompletionResult;

    unsafe fn noop_callback(_ctx: *mut c_void, _result: CompletionResult) {}

    fn leak_timeout(deadline_ns: u64) -> NonNull<Completion> {
        let boxed = Box::new(Completion::timeout(std::ptr::null_mut(), noop_callback, deadline_ns));
        NonNull::from(Box::leak(boxed))
    }

    #[test]
    fn expired_timers_move_to_completed_in_scan_order() {
        let mut timers = TimerList::new();
        let t1 = leak_timeout(5);
        let t2 = leak_timeout(1);
        let t3 = leak_timeout(3);

        unsafe {
            timers.insert(t1);
            timers.insert(t2);
            timers.insert(t3);
        }

        let mut completed = CompletionQueue::new();
        let remaining = timers.flush(10, &mut completed);
        assert_eq!(remaining, None);

        assert_eq!(completed.pop_front(), Some(t1));
        assert_eq!(completed.pop_front(), Some(t2));
        assert_eq!(completed.pop_front(), Some(t3));

        unsafe {
            drop(Box::from_raw(t1.as_ptr()));
            drop(Box::from_raw(t2.as_ptr()));
            drop(Box::from_raw(t3.as_ptr()));
        }
    }

    #[test]
    fn survivors_report_minimum_remaining() {
        let mut timers = TimerList::new();
        let t1 = leak_timeout(10);
        let t2 = leak_timeout(3);

        unsafe {
            timers.insert(t1);
            timers.insert(t2);
        }

        let mut completed = CompletionQueue::new();
        let remaining = timers.flush(0, &mut completed);
        assert_eq!(remaining, Some(3));
        assert!(completed.is_empty());

        unsafe {
            drop(Box::from_raw(t1.as_ptr()));
            drop(Box::from_raw(t2.as_ptr()));
        }
    }
}
