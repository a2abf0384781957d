// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task-level FIFO mutex.
//!
//! A queue of opaque tokens: acquiring enqueues a fresh token and waits
//! for it to reach the head, releasing pops it. The waiting discipline
//! depends on which driver constructed the mutex: the cooperative core
//! yields between polls of the head, the blocking core parks the OS
//! thread on a condvar. Acquire and release are both tasks.

use std::collections::VecDeque;
use std::sync;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar};

use crate::fault::Fault;
use crate::scope::Release;
use crate::task::{yield_now, Task};

struct Core {
    queue: sync::Mutex<VecDeque<u64>>,
    granted: Condvar,
    next_token: AtomicU64,
    /// Blocking cores park the acquiring thread; cooperative cores spin
    /// through task yields instead.
    blocking: bool,
}

/// Handle to a task-level mutex. Cloning shares the underlying queue.
#[derive(Clone)]
pub struct Mutex {
    core: Arc<Core>,
}

impl Mutex {
    fn with_core(blocking: bool) -> Self {
        Self {
            core: Arc::new(Core {
                queue: sync::Mutex::new(VecDeque::new()),
                granted: Condvar::new(),
                next_token: AtomicU64::new(0),
                blocking,
            }),
        }
    }

    /// Cooperative core: acquirers yield until their token is at the head.
    pub(crate) fn fifo() -> Self {
        Self::with_core(false)
    }

    /// Blocking core: acquirers park the OS thread until granted.
    pub(crate) fn blocking() -> Self {
        Self::with_core(true)
    }

    /// Task that completes once this caller holds the mutex. Requests are
    /// granted in the order their acquire step ran.
    pub fn acquire(&self) -> Task<MutexGuard> {
        let core = self.core.clone();
        Task::delay(move || {
            let token = core.next_token.fetch_add(1, Ordering::Relaxed);
            core.queue.lock().unwrap().push_back(token);
            if core.blocking {
                let mut queue = core.queue.lock().unwrap();
                while queue.front() != Some(&token) {
                    queue = core.granted.wait(queue).unwrap();
                }
                drop(queue);
                Task::done(MutexGuard { core, token })
            } else {
                poll_head(core, token)
            }
        })
    }

}

fn poll_head(core: Arc<Core>, token: u64) -> Task<MutexGuard> {
    Task::delay(move || {
        if core.queue.lock().unwrap().front() == Some(&token) {
            Task::done(MutexGuard { core, token })
        } else {
            yield_now().and_then(move |_| poll_head(core, token))
        }
    })
}

/// Proof of holding the mutex. Inert on drop: the lock is given back
/// only by running the `release` task, which `task::using` does on every
/// exit path.
pub struct MutexGuard {
    core: Arc<Core>,
    token: u64,
}

impl Release for MutexGuard {
    fn release(&self) -> Task<()> {
        let core = self.core.clone();
        let token = self.token;
        Task::delay(move || {
            let mut queue = core.queue.lock().unwrap();
            if queue.front() == Some(&token) {
                queue.pop_front();
                core.granted.notify_all();
                Task::done(())
            } else {
                Task::fail(Fault::new("mutex released twice or by a non-holder"))
            }
        })
    }
}
