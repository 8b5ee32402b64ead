//! Operation state machine driver
//!
//! The manager runs the handler's steps in order until a step leaves join
//! units outstanding, then returns. Whoever releases the last unit re-enters
//! the manager, so each operation is driven by exactly one task at a time.
//! An error delivered on entry to a step is handed to the handler as an
//! unwind of that step; the first such error is the operation's outcome.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::StripesetError;
use crate::fop::Fop;
use crate::join::Completion;
use crate::observability::fop_span;
use crate::types::NodeRequest;

/// State of an operation's state machine
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct State(pub u32);

impl State {
    pub const START: State = State(0);
    pub const INIT: State = State(1);
    pub const LOCK: State = State(2);
    pub const GET_SIZE_AND_VERSION: State = State(3);
    pub const DISPATCH: State = State(4);
    pub const PREPARE_ANSWER: State = State(5);
    pub const REPORT: State = State(6);
    pub const LOCK_REUSE: State = State(7);
    pub const UNLOCK: State = State(8);
    pub const END: State = State(u32::MAX);

    fn label(self) -> Option<&'static str> {
        Some(match self {
            State::START => "START",
            State::INIT => "INIT",
            State::LOCK => "LOCK",
            State::GET_SIZE_AND_VERSION => "GET_SIZE_AND_VERSION",
            State::DISPATCH => "DISPATCH",
            State::PREPARE_ANSWER => "PREPARE_ANSWER",
            State::REPORT => "REPORT",
            State::LOCK_REUSE => "LOCK_REUSE",
            State::UNLOCK => "UNLOCK",
            State::END => "END",
            _ => return None,
        })
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => f.write_str(label),
            None => write!(f, "{}", self.0),
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "State({})", self)
    }
}

/// What the handler is asked to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Run(State),
    /// An error arrived on entry to this state
    Unwind(State),
}

impl Step {
    pub fn state(self) -> State {
        match self {
            Step::Run(state) | Step::Unwind(state) => state,
        }
    }

    pub fn is_unwind(self) -> bool {
        matches!(self, Step::Unwind(_))
    }
}

/// Behavior of one operation type
pub trait FopHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Execute one step and return the next state
    fn manage(&self, fop: &Arc<Fop>, step: Step) -> State;

    /// Build the request sent to `node`
    fn wind(&self, fop: &Fop, node: usize) -> NodeRequest;
}

pub(crate) fn start(fop: &Arc<Fop>) {
    {
        let mut st = fop.lock_state();
        if st.state == State::START {
            st.state = State::INIT;
        }
    }
    run(fop, None);
}

/// Drive the operation until it parks or ends
pub(crate) fn run(fop: &Arc<Fop>, mut error: Option<StripesetError>) {
    let span = fop_span(fop.id(), fop.name());
    let _enter = span.enter();

    loop {
        let step = {
            let mut st = fop.lock_state();
            match error.take() {
                Some(e) => {
                    if st.error.is_none() {
                        st.error = Some(e);
                    }
                    Step::Unwind(st.state)
                }
                None => Step::Run(st.state),
            }
        };
        span.record("state", tracing::field::display(step.state()));
        trace!(fop = fop.id(), step = ?step, "MANAGER");

        if step.state() == State::END {
            finish(fop);
            return;
        }

        let next = fop.handler().manage(fop, step);

        let mut st = fop.lock_state();
        st.state = next;
        match st.join.check() {
            Completion::Parked => {
                trace!(fop = fop.id(), jobs = st.join.jobs(), "WAIT");
                return;
            }
            Completion::Ready(pending) => error = pending,
        }
    }
}

/// Release one join unit; the last one re-enters a parked manager
pub(crate) fn resume(fop: &Arc<Fop>, error: Option<StripesetError>) {
    let resumed = fop.lock_state().join.release(error);
    if let Some(error) = resumed {
        trace!(fop = fop.id(), error = ?error, "RESUME");
        run(fop, error);
    }
}

fn finish(fop: &Arc<Fop>) {
    let outcome = fop.outcome();
    match &outcome {
        Ok(answer) => debug!(
            fop = fop.id(),
            name = fop.name(),
            good = %answer.good,
            bad = %answer.bad,
            "Operation finished"
        ),
        Err(e) => debug!(fop = fop.id(), name = fop.name(), error = %e, "Operation failed"),
    }

    if let Some(done) = fop.take_done() {
        // The caller may have dropped its handle
        let _ = done.send(outcome.clone());
    }
    if let Some(parent) = fop.parent() {
        parent.resume(outcome.err());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(State::LOCK_REUSE.to_string(), "LOCK_REUSE");
        assert_eq!(State(42).to_string(), "42");
        assert_eq!(format!("{:?}", State::END), "State(END)");
    }

    #[test]
    fn test_step_state() {
        assert_eq!(Step::Unwind(State::DISPATCH).state(), State::DISPATCH);
        assert!(Step::Unwind(State::INIT).is_unwind());
        assert!(!Step::Run(State::INIT).is_unwind());
    }
}
