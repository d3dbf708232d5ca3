//! Per-operation state machines: submit → start → poll → classify.
//!
//! Each module here implements one operation's `drive` function, called by the
//! reactor both on the operation's first attempt (from `flush`'s snapshot loop) and
//! again once the kernel has reported a result for it. `drive` never invokes the
//! user's callback itself — it only classifies the current attempt as still
//! pending or finally done; the reactor owns firing the callback exactly once.

mod accept;
mod close;
mod connect;
mod read;
mod recv;
mod send;
mod write;

use crate::completion::{Completion, CompletionResult, Operation};
use crate::reactor::Reactor;

/// Outcome of one `drive` attempt.
pub(crate) enum Outcome {
    /// The operation is now kernel-pending; the reactor must not fire the
    /// callback and must track it via `io_pending` until the IOCP reports it.
    Pending,
    /// The operation is finished, successfully or not; fire the callback with
    /// this result.
    Done(CompletionResult),
}

/// Dispatches to the operation-specific state machine named by `completion`'s
/// active variant. This is the "closed set of variants plus a dispatch function
/// parameterized by the tag" alternative from `SPEC_FULL.md` §9 — a `match` here
/// compiles to the same jump table a stored per-completion function pointer would.
pub(crate) fn drive(reactor: &Reactor, completion: &Completion) -> Outcome {
    match &completion.operation {
        Operation::Accept { .. } => accept::drive(reactor, completion),
        Operation::Connect { .. } => connect::drive(reactor, completion),
        Operation::Send { .. } => send::drive(completion),
        Operation::Recv { .. } => recv::drive(completion),
        Operation::Read { .. } => read::drive(completion),
        Operation::Write { .. } => write::drive(completion),
        Operation::Close { .. } => close::drive(completion),
        Operation::Timeout { .. } => {
            Outcome::Done(CompletionResult::Timeout(Ok(())))
        }
    }
}
