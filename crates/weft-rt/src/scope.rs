// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scoped-release contract.
//!
//! A releasable resource gives itself back through a task, so release
//! participates in scheduling like any other effect. `task::using` runs
//! that task exactly once on both the success and failure paths.

use crate::task::Task;

/// A resource whose release is itself a task.
pub trait Release: Send {
    /// Task whose sole effect is to give the resource back.
    ///
    /// Must tolerate running on a different scheduler tick than the
    /// acquisition that produced the resource.
    fn release(&self) -> Task<()>;
}
