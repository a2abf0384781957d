// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Failure value for task bodies.
//!
//! A fault travels up the continuation chain until a `recover` intercepts
//! it; an unintercepted fault aborts the whole run.

use thiserror::Error;

/// Failure raised inside a task body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Fault {
    message: String,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
