// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Grantpool Protocol Foundation

use serde::{Deserialize, Serialize};

/// Classification of a failed operation.
///
/// Every component error maps onto exactly one kind via its `kind()`
/// accessor; callers branch on the kind, operators read the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input: zero or duplicate identifiers, empty sets,
    /// invalid time ranges, non-positive amounts.
    Validation,
    /// Caller is not the designated orchestrator, administrator, or
    /// authorized updater.
    Authorization,
    /// The target is missing or in the wrong lifecycle phase, or a
    /// one-shot flag was already consumed.
    State,
    /// A limit was not met: stake below minimum, time outside the
    /// voting window, amount exceeding an available balance.
    Resource,
    /// The underlying value ledger reported a transfer failure.
    Transfer,
    /// A cross-component consistency check failed; never caused by
    /// user input.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Authorization => write!(f, "authorization"),
            ErrorKind::State => write!(f, "state"),
            ErrorKind::Resource => write!(f, "resource"),
            ErrorKind::Transfer => write!(f, "transfer"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}
