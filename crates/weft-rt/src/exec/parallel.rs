// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Parallel driver.
//!
//! Maps the same step semantics onto OS threads: a fork spawns the
//! child on its own thread and the parent awaits joint completion;
//! yields become thread yields, waits become real sleeps, and mutexes
//! park the acquiring thread instead of spinning through the scheduler.

use std::thread;

use crate::fault::Fault;
use crate::mutex::Mutex;
use crate::task::{Step, Task};

/// Drive `task` to completion, spawning one OS thread per forked
/// lineage. Returns once every descendant has finished. Faults surface
/// from either side of a fork, the parent's first.
pub fn run<A: Send + 'static>(task: Task<A>) -> Result<A, Fault> {
    drive(task)
}

fn drive<A: Send + 'static>(task: Task<A>) -> Result<A, Fault> {
    let mut current = task;
    let mut children = Vec::new();
    let mut outcome = loop {
        match current.step() {
            Err(fault) => break Err(fault),
            Ok(Step::Done(value)) => break Ok(value),
            Ok(Step::Fork(child, next)) => {
                children.push(thread::spawn(move || drive(child)));
                current = next;
            }
            Ok(Step::Yield(next)) => {
                thread::yield_now();
                current = next;
            }
            Ok(Step::Wait(duration, next)) => {
                thread::sleep(duration);
                current = next;
            }
            Ok(Step::Lock(grant)) => current = grant(Mutex::blocking()),
        }
    };
    for child in children {
        match child.join() {
            Ok(Ok(())) => {}
            Ok(Err(fault)) => {
                if outcome.is_ok() {
                    outcome = Err(fault);
                }
            }
            Err(_) => {
                if outcome.is_ok() {
                    outcome = Err(Fault::new("forked task panicked"));
                }
            }
        }
    }
    outcome
}
