// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Rendezvous channels.
//!
//! Capacity zero: a send and a receive complete in one coordinated step.
//! The channel holds two subscription queues behind a task-level mutex;
//! `send`/`receive` hand out single-use signals whose commit and block
//! scans run entirely under that mutex. Matching a queued counterparty
//! goes through its claim cell, so a subscription installed by a
//! selection fires for at most one of its arms.

use std::collections::VecDeque;
use std::sync;
use std::sync::Arc;

use crate::claim::{ClaimRef, ClaimState};
use crate::mutex::Mutex;
use crate::signal::{Deliver, Signal};
use crate::task::{self, Task};

type ValueSlot<A> = Arc<sync::Mutex<Option<A>>>;

struct SendEntry<A> {
    claim: ClaimRef,
    notify: Deliver<()>,
    value: ValueSlot<A>,
}

struct RecvEntry<A> {
    claim: ClaimRef,
    deliver: Deliver<A>,
}

struct Queues<A> {
    senders: VecDeque<SendEntry<A>>,
    receivers: VecDeque<RecvEntry<A>>,
}

struct Shared<A> {
    /// Serializes every commit and block scan. Held across the whole
    /// scan, including yields in the handshake retry loop.
    lock: Mutex,
    /// The std mutex only provides interior mutability; it is never held
    /// across a scheduling point.
    queues: sync::Mutex<Queues<A>>,
}

/// A rendezvous point. Cloning shares the queues.
pub struct Channel<A> {
    shared: Arc<Shared<A>>,
}

impl<A> Clone for Channel<A> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Create a channel. A task, because the channel's mutex comes from the
/// driver and must match its scheduling flavor.
pub fn channel<A: Send + 'static>() -> Task<Channel<A>> {
    task::request_lock().map(|lock| Channel {
        shared: Arc::new(Shared {
            lock,
            queues: sync::Mutex::new(Queues {
                senders: VecDeque::new(),
                receivers: VecDeque::new(),
            }),
        }),
    })
}

impl<A: Send + 'static> Channel<A> {
    /// Signal that fires when `value` has been handed to a receiver.
    /// Single-use: sync it once.
    pub fn send(&self, value: A) -> SendSignal<A> {
        SendSignal {
            shared: self.shared.clone(),
            value: Arc::new(sync::Mutex::new(Some(value))),
        }
    }

    /// Signal that fires with the value of a matched sender.
    /// Single-use: sync it once.
    pub fn receive(&self) -> ReceiveSignal<A> {
        ReceiveSignal {
            shared: self.shared.clone(),
        }
    }
}

/// See [`Channel::send`].
pub struct SendSignal<A> {
    shared: Arc<Shared<A>>,
    value: ValueSlot<A>,
}

impl<A: Send + 'static> Signal for SendSignal<A> {
    type Output = ();

    fn poll(&self) -> bool {
        let queues = self.shared.queues.lock().unwrap();
        queues
            .receivers
            .iter()
            .any(|entry| entry.claim.state() != ClaimState::Synced)
    }

    fn commit(&self) -> Task<Option<()>> {
        let shared = self.shared.clone();
        let value = self.value.clone();
        let acquire = shared.lock.acquire();
        task::using(acquire, move |_guard| commit_send(shared, value))
    }

    fn block(&self, claim: ClaimRef, notify: Deliver<()>) -> Task<()> {
        let shared = self.shared.clone();
        let value = self.value.clone();
        let acquire = shared.lock.acquire();
        task::using(acquire, move |_guard| block_send(shared, value, claim, notify))
    }
}

/// Walk the receiver queue front-to-back, firing the first claimable
/// subscription. Runs with the channel mutex held.
fn commit_send<A: Send + 'static>(shared: Arc<Shared<A>>, value: ValueSlot<A>) -> Task<Option<()>> {
    Task::delay(move || {
        let mut queues = shared.queues.lock().unwrap();
        loop {
            let Some(entry) = queues.receivers.front() else {
                return Task::done(None);
            };
            match entry.claim.transition(ClaimState::Waiting, ClaimState::Synced) {
                Ok(()) => {
                    let entry = queues.receivers.pop_front().expect("front entry vanished");
                    drop(queues);
                    let value = take_value(&value);
                    entry.deliver.call(value);
                    return Task::done(Some(()));
                }
                Err(ClaimState::Synced) => {
                    // already fired for another arm of its selection
                    queues.receivers.pop_front();
                }
                Err(_) => {
                    // counterparty mid-handshake elsewhere; let it settle
                    drop(queues);
                    return task::yield_now().and_then(move |_| commit_send(shared, value));
                }
            }
        }
    })
}

/// Try to pair with a queued receiver through the double-CAS handshake;
/// enqueue a subscription if no viable counterparty exists. Runs with
/// the channel mutex held.
fn block_send<A: Send + 'static>(
    shared: Arc<Shared<A>>,
    value: ValueSlot<A>,
    claim: ClaimRef,
    notify: Deliver<()>,
) -> Task<()> {
    Task::delay(move || {
        let mut queues = shared.queues.lock().unwrap();
        let mut index = 0;
        loop {
            let Some(entry) = queues.receivers.get(index) else {
                queues.senders.push_back(SendEntry {
                    claim,
                    notify,
                    value,
                });
                return Task::done(());
            };
            // a selection may put both ends of one channel under the same
            // claim; it must not rendezvous with itself
            if Arc::ptr_eq(&entry.claim, &claim) {
                index += 1;
                continue;
            }
            if claim
                .transition(ClaimState::Waiting, ClaimState::Claimed)
                .is_err()
            {
                // this sync already fired through another subscription
                return Task::done(());
            }
            match entry.claim.transition(ClaimState::Waiting, ClaimState::Synced) {
                Ok(()) => {
                    claim
                        .transition(ClaimState::Claimed, ClaimState::Synced)
                        .expect("claim moved while held");
                    let entry = queues.receivers.remove(index).expect("candidate vanished");
                    drop(queues);
                    let value = take_value(&value);
                    notify.call(());
                    entry.deliver.call(value);
                    return Task::done(());
                }
                Err(ClaimState::Synced) => {
                    claim
                        .transition(ClaimState::Claimed, ClaimState::Waiting)
                        .expect("claim moved while held");
                    queues.receivers.remove(index);
                }
                Err(_) => {
                    claim
                        .transition(ClaimState::Claimed, ClaimState::Waiting)
                        .expect("claim moved while held");
                    drop(queues);
                    return task::yield_now()
                        .and_then(move |_| block_send(shared, value, claim, notify));
                }
            }
        }
    })
}

/// See [`Channel::receive`].
pub struct ReceiveSignal<A> {
    shared: Arc<Shared<A>>,
}

impl<A: Send + 'static> Signal for ReceiveSignal<A> {
    type Output = A;

    fn poll(&self) -> bool {
        let queues = self.shared.queues.lock().unwrap();
        queues
            .senders
            .iter()
            .any(|entry| entry.claim.state() != ClaimState::Synced)
    }

    fn commit(&self) -> Task<Option<A>> {
        let shared = self.shared.clone();
        let acquire = shared.lock.acquire();
        task::using(acquire, move |_guard| commit_receive(shared))
    }

    fn block(&self, claim: ClaimRef, deliver: Deliver<A>) -> Task<()> {
        let shared = self.shared.clone();
        let acquire = shared.lock.acquire();
        task::using(acquire, move |_guard| block_receive(shared, claim, deliver))
    }
}

/// Mirror of [`commit_send`] over the sender queue.
fn commit_receive<A: Send + 'static>(shared: Arc<Shared<A>>) -> Task<Option<A>> {
    Task::delay(move || {
        let mut queues = shared.queues.lock().unwrap();
        loop {
            let Some(entry) = queues.senders.front() else {
                return Task::done(None);
            };
            match entry.claim.transition(ClaimState::Waiting, ClaimState::Synced) {
                Ok(()) => {
                    let entry = queues.senders.pop_front().expect("front entry vanished");
                    drop(queues);
                    let value = take_value(&entry.value);
                    entry.notify.call(());
                    return Task::done(Some(value));
                }
                Err(ClaimState::Synced) => {
                    queues.senders.pop_front();
                }
                Err(_) => {
                    drop(queues);
                    return task::yield_now().and_then(move |_| commit_receive(shared));
                }
            }
        }
    })
}

/// Mirror of [`block_send`] over the sender queue.
fn block_receive<A: Send + 'static>(
    shared: Arc<Shared<A>>,
    claim: ClaimRef,
    deliver: Deliver<A>,
) -> Task<()> {
    Task::delay(move || {
        let mut queues = shared.queues.lock().unwrap();
        let mut index = 0;
        loop {
            let Some(entry) = queues.senders.get(index) else {
                queues.receivers.push_back(RecvEntry { claim, deliver });
                return Task::done(());
            };
            if Arc::ptr_eq(&entry.claim, &claim) {
                index += 1;
                continue;
            }
            if claim
                .transition(ClaimState::Waiting, ClaimState::Claimed)
                .is_err()
            {
                return Task::done(());
            }
            match entry.claim.transition(ClaimState::Waiting, ClaimState::Synced) {
                Ok(()) => {
                    claim
                        .transition(ClaimState::Claimed, ClaimState::Synced)
                        .expect("claim moved while held");
                    let entry = queues.senders.remove(index).expect("candidate vanished");
                    drop(queues);
                    let value = take_value(&entry.value);
                    entry.notify.call(());
                    deliver.call(value);
                    return Task::done(());
                }
                Err(ClaimState::Synced) => {
                    claim
                        .transition(ClaimState::Claimed, ClaimState::Waiting)
                        .expect("claim moved while held");
                    queues.senders.remove(index);
                }
                Err(_) => {
                    claim
                        .transition(ClaimState::Claimed, ClaimState::Waiting)
                        .expect("claim moved while held");
                    drop(queues);
                    return task::yield_now()
                        .and_then(move |_| block_receive(shared, claim, deliver));
                }
            }
        }
    })
}

fn take_value<A>(slot: &ValueSlot<A>) -> A {
    slot.lock()
        .unwrap()
        .take()
        .expect("send signal synced twice")
}
