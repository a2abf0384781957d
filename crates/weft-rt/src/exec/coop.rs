// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative single-threaded driver.
//!
//! A FIFO ready-queue of continuations; each tick pops the front task
//! and steps it once. Fork pushes the parent's continuation to the
//! front and the fresh child to the back: the forker keeps going, new
//! work lines up behind everything already pending. This ordering is
//! part of the public contract.

use std::collections::VecDeque;
use std::sync;
use std::sync::Arc;
use std::time::Instant;

use super::clock::{Clock, MonotonicClock};
use crate::fault::Fault;
use crate::mutex::Mutex;
use crate::task::{yield_now, Step, Task};

/// Drive `task` and everything it forks to completion on this thread.
/// An uncaught fault from any task aborts the run.
pub fn run<A: Send + 'static>(task: Task<A>) -> Result<A, Fault> {
    run_with_clock(task, Arc::new(MonotonicClock))
}

/// As [`run`], with an injected time source for wait resolution.
pub fn run_with_clock<A: Send + 'static>(
    task: Task<A>,
    clock: Arc<dyn Clock>,
) -> Result<A, Fault> {
    let outcome: Arc<sync::Mutex<Option<A>>> = Arc::new(sync::Mutex::new(None));
    let root = {
        let outcome = outcome.clone();
        task.and_then(move |value| {
            *outcome.lock().unwrap() = Some(value);
            Task::done(())
        })
    };

    let mut ready: VecDeque<Task<()>> = VecDeque::new();
    ready.push_back(root);

    while let Some(current) = ready.pop_front() {
        match current.step()? {
            Step::Done(()) => {}
            Step::Fork(child, next) => {
                ready.push_front(next);
                ready.push_back(child);
            }
            Step::Yield(next) => ready.push_back(next),
            Step::Wait(duration, next) => {
                let deadline = clock.now() + duration;
                ready.push_back(wait_until(clock.clone(), deadline, next));
            }
            Step::Lock(grant) => ready.push_front(grant(Mutex::fifo())),
        }
    }

    let value = outcome
        .lock()
        .unwrap()
        .take()
        .expect("ready-queue drained but the root produced no value");
    Ok(value)
}

/// Poll the clock, yielding until the deadline passes, then continue.
fn wait_until(clock: Arc<dyn Clock>, deadline: Instant, next: Task<()>) -> Task<()> {
    Task::delay(move || {
        if clock.now() >= deadline {
            next
        } else {
            yield_now().and_then(move |_| wait_until(clock, deadline, next))
        }
    })
}
