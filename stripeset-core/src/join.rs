//! Join counter gating state-machine resumption
//!
//! Every unit of asynchronous work (a dispatch wave, a lock wait, a network
//! lock, a metadata call, a child operation) adds one unit before it is
//! issued and releases it once its outcome is known. The manager parks when
//! units are outstanding; whoever releases the last unit while the manager
//! is parked resumes it. Lives inside the operation's exclusive section.

use crate::error::StripesetError;

#[derive(Debug, Default)]
pub(crate) struct Join {
    jobs: u32,
    parked: bool,
    error: Option<StripesetError>,
}

/// Result of checking for completion after a step
#[derive(Debug)]
pub(crate) enum Completion {
    /// Units are outstanding; the manager must return
    Parked,
    /// Nothing outstanding; continue with the pending error, if any
    Ready(Option<StripesetError>),
}

impl Join {
    pub fn add(&mut self) {
        self.jobs += 1;
    }

    pub fn jobs(&self) -> u32 {
        self.jobs
    }

    /// Record an error for the next step; the first one wins
    pub fn fail(&mut self, error: StripesetError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Park the manager when units are outstanding, otherwise hand back the
    /// pending error.
    pub fn check(&mut self) -> Completion {
        debug_assert!(!self.parked, "manager parked twice");
        if self.jobs != 0 {
            self.parked = true;
            Completion::Parked
        } else {
            Completion::Ready(self.error.take())
        }
    }

    /// Release one unit. Returns the error to resume with when this was the
    /// last unit and the manager is parked.
    pub fn release(&mut self, error: Option<StripesetError>) -> Option<Option<StripesetError>> {
        if let Some(error) = error {
            self.fail(error);
        }
        debug_assert!(self.jobs > 0, "join counter released below zero");
        self.jobs = self.jobs.saturating_sub(1);
        if self.jobs == 0 && self.parked {
            self.parked = false;
            Some(self.error.take())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_without_jobs() {
        let mut join = Join::default();
        assert!(matches!(join.check(), Completion::Ready(None)));
    }

    #[test]
    fn test_last_release_resumes_once() {
        let mut join = Join::default();
        join.add();
        join.add();
        assert!(matches!(join.check(), Completion::Parked));

        assert!(join.release(None).is_none());
        assert!(matches!(join.release(None), Some(None)));
        assert_eq!(join.jobs(), 0);
    }

    #[test]
    fn test_release_before_park_does_not_resume() {
        let mut join = Join::default();
        join.add();
        assert!(join.release(None).is_none());
        assert!(matches!(join.check(), Completion::Ready(None)));
    }

    #[test]
    fn test_first_error_wins() {
        let mut join = Join::default();
        join.add();
        join.add();
        assert!(matches!(join.check(), Completion::Parked));
        join.release(Some(StripesetError::internal("first")));
        let resumed = join.release(Some(StripesetError::internal("second")));
        assert_eq!(resumed, Some(Some(StripesetError::internal("first"))));
    }
}
