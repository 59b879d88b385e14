use super::options::RetryPolicy;
use std::thread;

/// Outcome of a bounded poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polled {
    /// The condition held after this many checks.
    Settled(u32),
    /// Every attempt ran without the condition holding.
    Exhausted,
}

impl Polled {
    pub fn settled(self) -> bool {
        matches!(self, Polled::Settled(_))
    }
}

/// Checks `done` up to `policy.attempts` times, sleeping between checks.
///
/// The check runs before the first sleep, so an already satisfied condition
/// returns immediately. There is no cancellation: the caller proceeds
/// best-effort once the budget is spent.
pub fn poll_until(policy: &RetryPolicy, mut done: impl FnMut() -> bool) -> Polled {
    for attempt in 0..policy.attempts {
        if done() {
            return Polled::Settled(attempt + 1);
        }
        if attempt + 1 < policy.attempts {
            thread::sleep(policy.delay_for(attempt));
        }
    }
    Polled::Exhausted
}

/// Like `poll_until`, but sleeps before every check. Used after issuing a
/// stop, where the first read would almost always still report running.
pub fn sleep_then_poll(policy: &RetryPolicy, mut done: impl FnMut() -> bool) -> Polled {
    for attempt in 0..policy.attempts {
        thread::sleep(policy.delay_for(attempt));
        if done() {
            return Polled::Settled(attempt + 1);
        }
    }
    Polled::Exhausted
}
