//! The engine's position and phase within a module.
//!
//! Tracks a `(block, beat, phase)` triple the way a bytecode VM tracks a
//! program counter, plus the LIFO stack of host queries still pending.

use crate::value::{MethodCall, SimpleValue};

/// The four phases a beat passes through, in order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Conditional,
    Resolution,
    Presentation,
    Execution,
}

/// A query still waiting on a host answer; the scheduler's resolution
/// stack is strictly LIFO, so the top entry is always the currently-blocking
/// query. The call is kept unresolved (its arguments
/// as written, not yet stringified) because an argument may itself be a
/// method call still earlier on the stack — its answer is only known once
/// that entry is popped, so argument resolution happens lazily, right
/// before this query is surfaced to the host.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingQuery {
    pub call: MethodCall,
    pub expects_response: bool,
    pub line_number: u32,
}

/// A queued `GO path [-> tag]` operation, emitted as a response on the next
/// `next()` iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedGo {
    pub module_path: String,
    pub start_tag: String,
}

#[derive(Clone, Debug, Default)]
pub struct Cursor {
    pub block_index: usize,
    /// `-1` sentinel means "before the first beat of `block_index`"; the
    /// subsequent increment lands on 0.
    pub beat_index: isize,
    pub phase: Phase,
    pub resolution_stack: Vec<PendingQuery>,
    pub queued_transition: Option<String>,
    pub queued_go: Option<QueuedGo>,
    pub queued_exit: Option<Option<SimpleValue>>,
    /// Signed so an out-of-range negative choice index survives to the
    /// bounds check instead of being rejected by an unsigned cast beforehand.
    pub choice_selection: Option<i64>,
    pub did_last_condition_pass: bool,
    /// Set once a queued `Exit` has been emitted, or once the cursor runs
    /// past the last beat of the last block; the following `next()` call
    /// then returns `End`.
    pub exited: bool,
    /// True once the current phase has pushed its calls onto
    /// `resolution_stack` at least once. Distinguishes "this phase has no
    /// calls to make" from "this phase's calls just drained" so a beat
    /// with zero method calls doesn't re-enqueue (and thus re-apply its
    /// operations) on every scheduler tick. Reset whenever the phase
    /// changes.
    pub queries_seeded: bool,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Conditional
    }
}

impl Cursor {
    /// A fresh cursor positioned just before `block_index`'s first beat,
    /// as used by `start()` (block 0) and `start_at(tag)` (looked-up
    /// block).
    pub fn at_block_start(block_index: usize) -> Self {
        Cursor {
            block_index,
            beat_index: -1,
            phase: Phase::Conditional,
            resolution_stack: Vec::new(),
            queued_transition: None,
            queued_go: None,
            queued_exit: None,
            choice_selection: None,
            did_last_condition_pass: true,
            exited: false,
            queries_seeded: false,
        }
    }

    /// Moves to `phase`, clearing the seeded flag so the new phase enqueues
    /// its own calls fresh.
    pub fn enter_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.queries_seeded = false;
    }

    /// The currently-blocking query, if any (resolution stack top).
    pub fn pending_query(&self) -> Option<&PendingQuery> {
        self.resolution_stack.last()
    }

    pub fn push_query(&mut self, query: PendingQuery) {
        self.resolution_stack.push(query);
    }

    pub fn pop_query(&mut self) -> Option<PendingQuery> {
        self.resolution_stack.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> MethodCall {
        MethodCall::new(name, vec![])
    }

    #[test]
    fn fresh_cursor_is_before_first_beat() {
        let cursor = Cursor::at_block_start(2);
        assert_eq!(cursor.block_index, 2);
        assert_eq!(cursor.beat_index, -1);
        assert_eq!(cursor.phase, Phase::Conditional);
    }

    #[test]
    fn resolution_stack_is_lifo() {
        let mut cursor = Cursor::at_block_start(0);
        cursor.push_query(PendingQuery {
            call: call("a"),
            expects_response: true,
            line_number: 1,
        });
        cursor.push_query(PendingQuery {
            call: call("b"),
            expects_response: true,
            line_number: 2,
        });
        assert_eq!(cursor.pending_query().unwrap().call.name.as_ref(), "b");
        assert_eq!(cursor.pop_query().unwrap().call.name.as_ref(), "b");
        assert_eq!(cursor.pending_query().unwrap().call.name.as_ref(), "a");
    }
}
