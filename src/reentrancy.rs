// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Grantpool Protocol Foundation

use std::sync::atomic::{AtomicBool, Ordering};

/// Single-entry guard for value-moving operations.
///
/// A ledger transfer can hand control to untrusted code; any operation
/// that moves value sets this guard before touching the ledger and
/// rejects recursive entry while it is held.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    in_flight: AtomicBool,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard. Returns `None` when an operation is already in
    /// flight; the returned token releases the guard on drop, on every
    /// exit path.
    pub fn enter(&self) -> Option<GuardToken<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardToken { guard: self })
    }
}

pub struct GuardToken<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_recursive_entry() {
        let guard = ReentrancyGuard::new();
        let token = guard.enter().expect("first entry");
        assert!(guard.enter().is_none());
        drop(token);
        assert!(guard.enter().is_some());
    }
}
