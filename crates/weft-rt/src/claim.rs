// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Claim cells.
//!
//! A claim is the shared cell that decides which subscription of a
//! selection actually fires. State machine driven by compare-and-swap;
//! the owning sync frame and any queue entries referencing it all hold
//! the same `Arc`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Claim lifecycle states.
///
/// `Claimed` is a transient hold taken by the owner mid-handshake; it is
/// always released back to `Waiting` or forwarded to `Synced`. `Synced`
/// is terminal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// No subscription has fired yet.
    Waiting = 0,
    /// The owner is mid-handshake with a counterparty.
    Claimed = 1,
    /// A subscription fired; the value was (or is being) delivered.
    Synced = 2,
}

impl ClaimState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Waiting,
            1 => Self::Claimed,
            _ => Self::Synced,
        }
    }
}

/// Shared atomically-updatable claim cell. Starts out `Waiting`.
#[derive(Debug)]
pub struct Claim {
    state: AtomicU8,
}

/// Handle shared between a sync frame and the queue entries it installed.
pub type ClaimRef = Arc<Claim>;

impl Claim {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ClaimState::Waiting as u8),
        }
    }

    pub fn state(&self) -> ClaimState {
        ClaimState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Compare-and-swap `from` to `to`. On failure returns the state
    /// actually observed.
    ///
    /// Seq-cst throughout: a handshake CASes claims owned by syncs
    /// suspended on two different channels, so acquire/release pairs on a
    /// single cell are not enough.
    pub fn transition(&self, from: ClaimState, to: ClaimState) -> Result<(), ClaimState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ClaimState::from_u8)
    }
}

impl Default for Claim {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_waiting() {
        assert_eq!(Claim::new().state(), ClaimState::Waiting);
    }

    #[test]
    fn fast_path_sync() {
        let claim = Claim::new();
        assert!(claim.transition(ClaimState::Waiting, ClaimState::Synced).is_ok());
        assert_eq!(claim.state(), ClaimState::Synced);
    }

    #[test]
    fn claimed_is_reversible() {
        let claim = Claim::new();
        claim.transition(ClaimState::Waiting, ClaimState::Claimed).unwrap();
        claim.transition(ClaimState::Claimed, ClaimState::Waiting).unwrap();
        assert_eq!(claim.state(), ClaimState::Waiting);
    }

    #[test]
    fn failed_transition_reports_observed_state() {
        let claim = Claim::new();
        claim.transition(ClaimState::Waiting, ClaimState::Synced).unwrap();
        assert_eq!(
            claim.transition(ClaimState::Waiting, ClaimState::Claimed),
            Err(ClaimState::Synced)
        );
    }

    #[test]
    fn synced_is_terminal() {
        let claim = Claim::new();
        claim.transition(ClaimState::Waiting, ClaimState::Synced).unwrap();
        assert!(claim.transition(ClaimState::Synced, ClaimState::Waiting).is_err());
    }

    #[test]
    fn only_one_of_many_wins() {
        let claim = Arc::new(Claim::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let claim = claim.clone();
            handles.push(std::thread::spawn(move || {
                claim.transition(ClaimState::Waiting, ClaimState::Synced).is_ok()
            }));
        }
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1);
    }
}
