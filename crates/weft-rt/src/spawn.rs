// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Fork with a join handle.
//!
//! `fork` alone is fire-and-forget. `spawn` additionally hands back a
//! handle whose `join` signal fires with the child's value over a
//! one-shot rendezvous, so it composes with selections and timeouts
//! like any other signal.

use crate::channel::{channel, Channel, ReceiveSignal};
use crate::signal::sync;
use crate::task::{self, Task};

/// Handle to a spawned task. `join` must be synced exactly once; an
/// unjoined child stays suspended in its final send.
pub struct JoinHandle<A> {
    outcome: Channel<A>,
}

impl<A: Send + 'static> JoinHandle<A> {
    /// Signal that fires with the child's value.
    pub fn join(&self) -> ReceiveSignal<A> {
        self.outcome.receive()
    }
}

/// Fork `child` as a sibling and return a handle to its value.
pub fn spawn<A: Send + 'static>(child: Task<A>) -> Task<JoinHandle<A>> {
    channel().and_then(move |outcome: Channel<A>| {
        let publish = outcome.clone();
        let wrapped = child.and_then(move |value| sync(publish.send(value)));
        task::fork(wrapped).map(move |_| JoinHandle { outcome })
    })
}
