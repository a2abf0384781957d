// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Sleep and timer signals.
//!
//! `sleep` is the task-level pause; `after` is the signal form, usable
//! inside selections; `timeout` races any signal against a timer.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::claim::{ClaimRef, ClaimState};
use crate::signal::{choose, Choose, Deliver, Signal, SignalExt};
use crate::task::{self, Step, Task};

/// Resume no earlier than `duration` from now, passing control meanwhile.
pub fn sleep(duration: Duration) -> Task<()> {
    Task::from_fn(move || Ok(Step::Wait(duration, Task::done(()))))
}

/// Signal that fires once `duration` has elapsed. The deadline starts
/// counting the first time the signal is used, not when it is built.
pub fn after(duration: Duration) -> Timer {
    Timer {
        duration,
        deadline: OnceLock::new(),
    }
}

/// See [`after`].
pub struct Timer {
    duration: Duration,
    deadline: OnceLock<Instant>,
}

impl Timer {
    fn deadline(&self) -> Instant {
        *self
            .deadline
            .get_or_init(|| Instant::now() + self.duration)
    }
}

impl Signal for Timer {
    type Output = ();

    fn poll(&self) -> bool {
        Instant::now() >= self.deadline()
    }

    fn commit(&self) -> Task<Option<()>> {
        let deadline = self.deadline();
        Task::delay(move || {
            Task::done(if Instant::now() >= deadline {
                Some(())
            } else {
                None
            })
        })
    }

    fn block(&self, claim: ClaimRef, deliver: Deliver<()>) -> Task<()> {
        let deadline = self.deadline();
        task::fork(Task::delay(move || {
            sleep(deadline.saturating_duration_since(Instant::now()))
                .and_then(move |_| expire(claim, deliver))
        }))
    }
}

fn expire(claim: ClaimRef, deliver: Deliver<()>) -> Task<()> {
    Task::delay(move || match claim.transition(ClaimState::Waiting, ClaimState::Synced) {
        Ok(()) => {
            deliver.call(());
            Task::done(())
        }
        Err(ClaimState::Claimed) => task::yield_now().and_then(move |_| expire(claim, deliver)),
        // another arm already fired; nothing to deliver
        Err(_) => Task::done(()),
    })
}

/// Race `signal` against a timer: `Some(value)` if the signal fires
/// within `duration`, `None` on expiry.
pub fn timeout<S>(duration: Duration, signal: S) -> Choose<Option<S::Output>>
where
    S: Signal,
{
    choose(
        signal.map(Some).boxed(),
        after(duration).map(|_| None).boxed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use crate::exec::coop;
    use crate::signal::sync;

    #[test]
    fn sleep_passes_at_least_the_duration() {
        let start = Instant::now();
        coop::run(sleep(Duration::from_millis(10))).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn timer_polls_ready_after_expiry() {
        let timer = after(Duration::from_millis(5));
        assert!(!timer.poll());
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.poll());
    }

    #[test]
    fn elapsed_timer_commits_on_the_fast_path() {
        let timer = after(Duration::from_millis(1));
        let _ = timer.deadline();
        std::thread::sleep(Duration::from_millis(5));
        coop::run(sync(timer)).unwrap();
    }

    #[test]
    fn timeout_yields_none_without_a_counterparty() {
        let start = Instant::now();
        let task = channel::<i32>().and_then(|chan| {
            sync(timeout(Duration::from_millis(20), chan.receive()))
        });
        assert_eq!(coop::run(task).unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn timeout_yields_the_value_when_it_arrives_first() {
        let task = channel::<i32>().and_then(|chan| {
            let tx = chan.clone();
            // the losing timer arm keeps its waiter alive until expiry, so
            // keep the race short
            task::fork(sync(tx.send(5)))
                .and_then(move |_| sync(timeout(Duration::from_millis(100), chan.receive())))
        });
        assert_eq!(coop::run(task).unwrap(), Some(5));
    }
}
