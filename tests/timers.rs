//! (S2) timer firing order, (S3) zero-duration timers within one tick, and
//! (S4) `run_for_ns`'s lower bound.

#![cfg(windows)]

mod support;

use std::cell::RefCell;
use std::ffi::c_void;
use std::time::{Duration, Instant};

use wiocp::{Completion, CompletionResult, Reactor};

struct Recorder(RefCell<Vec<&'static str>>);

struct Tag<'a> {
    name: &'static str,
    recorder: &'a Recorder,
}

unsafe fn on_timer(ctx: *mut c_void, result: CompletionResult) {
    let CompletionResult::Timeout(res) = result else {
        unreachable!("on_timer invoked with a non-Timeout result");
    };
    res.expect("timer delivered an error");
    // SAFETY: `ctx` always points at a `Tag` kept alive for the duration of
    // the submission it tags.
    let tag = unsafe { &*(ctx as *const Tag) };
    tag.recorder.0.borrow_mut().push(tag.name);
}

#[test]
fn timers_fire_in_deadline_order() {
    support::init_logger();
    let reactor = Reactor::init(0, 0).expect("reactor init");
    let recorder = Recorder(RefCell::new(Vec::new()));

    let tag_t1 = Tag { name: "T1", recorder: &recorder };
    let tag_t2 = Tag { name: "T2", recorder: &recorder };
    let tag_t3 = Tag { name: "T3", recorder: &recorder };

    let now = reactor.now_ns();
    let t1 = Completion::timeout(&tag_t1 as *const Tag as *mut c_void, on_timer, now + 5_000_000);
    let t2 = Completion::timeout(&tag_t2 as *const Tag as *mut c_void, on_timer, now + 1_000_000);
    let t3 = Completion::timeout(&tag_t3 as *const Tag as *mut c_void, on_timer, now + 3_000_000);

    // Submission order deliberately does not match deadline order.
    reactor.submit(&t1);
    reactor.submit(&t2);
    reactor.submit(&t3);

    let start = Instant::now();
    while recorder.0.borrow().len() < 3 {
        reactor.tick().expect("tick");
        assert!(start.elapsed() < Duration::from_secs(2), "timers never all fired");
        std::thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(*recorder.0.borrow(), vec!["T2", "T3", "T1"]);
    assert!(start.elapsed() >= Duration::from_millis(5));

    reactor.deinit();
}

#[test]
fn zero_duration_timers_fire_in_submission_order_within_one_tick() {
    support::init_logger();
    let reactor = Reactor::init(0, 0).expect("reactor init");
    let recorder = Recorder(RefCell::new(Vec::new()));

    let tag_a = Tag { name: "A", recorder: &recorder };
    let tag_b = Tag { name: "B", recorder: &recorder };

    let a = Completion::timeout(&tag_a as *const Tag as *mut c_void, on_timer, reactor.now_ns());
    let b = Completion::timeout(&tag_b as *const Tag as *mut c_void, on_timer, reactor.now_ns());

    reactor.submit(&a);
    reactor.submit(&b);

    reactor.tick().expect("tick");

    assert_eq!(*recorder.0.borrow(), vec!["A", "B"]);

    reactor.deinit();
}

#[test]
fn run_for_ns_blocks_for_at_least_the_requested_duration() {
    support::init_logger();
    let reactor = Reactor::init(0, 0).expect("reactor init");

    let start = Instant::now();
    reactor.run_for_ns(10_000_000).expect("run_for_ns");
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(10), "returned too early: {elapsed:?}");
    // One millisecond of rounding slack plus generous scheduling slack.
    assert!(elapsed <= Duration::from_millis(10) + Duration::from_millis(250), "returned too late: {elapsed:?}");

    reactor.deinit();
}
