// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative concurrency runtime with first-class synchronous events.
//!
//! Tasks are pure descriptions of effects, stepped by a driver. Signals
//! are composable synchronous events that can be combined
//! non-deterministically before being committed to. Channels are
//! rendezvous points in the CSP tradition: a send and a receive complete
//! in a single coordinated step.
//!
//! Components:
//! - task — suspendable effect descriptions + combinators
//! - signal — always/never/map/choose/select and the sync protocol
//! - channel — capacity-zero rendezvous send/receive
//! - mutex — task-level FIFO lock, handed out by the drivers
//! - timeout — sleep, timer signals, signal races
//! - spawn — fork with a joinable handle
//! - exec — cooperative and parallel drivers

pub mod channel;
pub mod claim;
pub mod exec;
pub mod fault;
pub mod mutex;
pub mod scope;
pub mod signal;
pub mod spawn;
pub mod task;
pub mod timeout;
