use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorKind;

/// Ledger error types
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("the null identity is not a valid ledger account")]
    NullIdentity,

    #[error("insufficient balance: {account} holds {available}, needs {required}")]
    InsufficientBalance {
        account: String,
        available: u64,
        required: u64,
    },

    #[error("insufficient allowance: {spender} may move {available} of {owner}'s funds, needs {required}")]
    InsufficientAllowance {
        owner: String,
        spender: String,
        available: u64,
        required: u64,
    },

    #[error("caller {0} is not on the minter allow-list")]
    NotMinter(String),

    #[error("caller {0} is not the ledger administrator")]
    NotAdmin(String),

    #[error("unknown snapshot id: {0}")]
    UnknownSnapshot(u64),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NullIdentity | LedgerError::UnknownSnapshot(_) => ErrorKind::Validation,
            LedgerError::InsufficientBalance { .. } | LedgerError::InsufficientAllowance { .. } => {
                ErrorKind::Resource
            }
            LedgerError::NotMinter(_) | LedgerError::NotAdmin(_) => ErrorKind::Authorization,
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Fungible value accounting consumed by the voting engine and the
/// custody pool. Implementations must be safe to call re-entrantly
/// only through their own API; the consumers guard themselves.
pub trait ValueLedger: Send + Sync {
    /// Move `amount` from the caller's account to `to`.
    fn transfer(&self, caller: &str, to: &str, amount: u64) -> LedgerResult<()>;

    /// Move `amount` from `from` to `to` on the caller's authority,
    /// consuming the caller's allowance from `from`.
    fn transfer_from(&self, caller: &str, from: &str, to: &str, amount: u64) -> LedgerResult<()>;

    /// Current balance of an identity. Unknown identities hold zero.
    fn balance_of(&self, identity: &str) -> u64;
}

/// Balance recorded as of a snapshot id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Checkpoint {
    snapshot_id: u64,
    value: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<String, u64>,
    allowances: HashMap<(String, String), u64>,
    minters: HashSet<String>,
    total_supply: u64,
    current_snapshot_id: u64,
    account_checkpoints: HashMap<String, Vec<Checkpoint>>,
    supply_checkpoints: Vec<Checkpoint>,
}

/// In-memory fungible ledger with a minter allow-list and historical
/// balance checkpoints for off-chain vote-weight analysis.
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
    admin: String,
}

impl InMemoryLedger {
    pub fn new(admin: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            admin: admin.into(),
        }
    }

    /// Set the spending allowance `spender` may move out of the
    /// caller's account.
    pub fn approve(&self, caller: &str, spender: &str, amount: u64) -> LedgerResult<()> {
        if caller.is_empty() || spender.is_empty() {
            return Err(LedgerError::NullIdentity);
        }
        let mut state = self.state.write();
        state
            .allowances
            .insert((caller.to_string(), spender.to_string()), amount);
        Ok(())
    }

    pub fn allowance(&self, owner: &str, spender: &str) -> u64 {
        let state = self.state.read();
        state
            .allowances
            .get(&(owner.to_string(), spender.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Create new value in `to`'s account. Restricted to identities on
    /// the minter allow-list.
    pub fn mint(&self, caller: &str, to: &str, amount: u64) -> LedgerResult<()> {
        if to.is_empty() {
            return Err(LedgerError::NullIdentity);
        }
        let mut state = self.state.write();
        if !state.minters.contains(caller) {
            return Err(LedgerError::NotMinter(caller.to_string()));
        }

        let snapshot_id = state.current_snapshot_id;
        let balance = state.balances.get(to).copied().unwrap_or(0);
        record_checkpoint(
            state.account_checkpoints.entry(to.to_string()).or_default(),
            snapshot_id,
            balance,
        );
        let supply = state.total_supply;
        record_checkpoint(&mut state.supply_checkpoints, snapshot_id, supply);

        *state.balances.entry(to.to_string()).or_insert(0) += amount;
        state.total_supply += amount;
        debug!(to, amount, "minted value");
        Ok(())
    }

    pub fn set_minter(&self, caller: &str, identity: &str, enabled: bool) -> LedgerResult<()> {
        if caller != self.admin {
            return Err(LedgerError::NotAdmin(caller.to_string()));
        }
        if identity.is_empty() {
            return Err(LedgerError::NullIdentity);
        }
        let mut state = self.state.write();
        if enabled {
            state.minters.insert(identity.to_string());
        } else {
            state.minters.remove(identity);
        }
        Ok(())
    }

    pub fn total_supply(&self) -> u64 {
        self.state.read().total_supply
    }

    /// Freeze the current balances under a new snapshot id.
    pub fn snapshot(&self, caller: &str) -> LedgerResult<u64> {
        if caller != self.admin {
            return Err(LedgerError::NotAdmin(caller.to_string()));
        }
        let mut state = self.state.write();
        state.current_snapshot_id += 1;
        Ok(state.current_snapshot_id)
    }

    /// Balance of `identity` at the moment snapshot `id` was taken.
    pub fn balance_at(&self, identity: &str, id: u64) -> LedgerResult<u64> {
        let state = self.state.read();
        if id == 0 || id > state.current_snapshot_id {
            return Err(LedgerError::UnknownSnapshot(id));
        }
        let current = state.balances.get(identity).copied().unwrap_or(0);
        let checkpoints = state
            .account_checkpoints
            .get(identity)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        Ok(lookup_checkpoint(checkpoints, id, current))
    }

    /// Total supply at the moment snapshot `id` was taken.
    pub fn supply_at(&self, id: u64) -> LedgerResult<u64> {
        let state = self.state.read();
        if id == 0 || id > state.current_snapshot_id {
            return Err(LedgerError::UnknownSnapshot(id));
        }
        Ok(lookup_checkpoint(
            &state.supply_checkpoints,
            id,
            state.total_supply,
        ))
    }

    fn move_value(
        state: &mut LedgerState,
        from: &str,
        to: &str,
        amount: u64,
    ) -> LedgerResult<()> {
        if from.is_empty() || to.is_empty() {
            return Err(LedgerError::NullIdentity);
        }
        let available = state.balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from.to_string(),
                available,
                required: amount,
            });
        }

        let snapshot_id = state.current_snapshot_id;
        record_checkpoint(
            state
                .account_checkpoints
                .entry(from.to_string())
                .or_default(),
            snapshot_id,
            available,
        );
        let to_balance = state.balances.get(to).copied().unwrap_or(0);
        record_checkpoint(
            state.account_checkpoints.entry(to.to_string()).or_default(),
            snapshot_id,
            to_balance,
        );

        *state.balances.entry(from.to_string()).or_insert(0) -= amount;
        *state.balances.entry(to.to_string()).or_insert(0) += amount;
        Ok(())
    }
}

impl ValueLedger for InMemoryLedger {
    fn transfer(&self, caller: &str, to: &str, amount: u64) -> LedgerResult<()> {
        let mut state = self.state.write();
        Self::move_value(&mut state, caller, to, amount)?;
        debug!(from = caller, to, amount, "transfer");
        Ok(())
    }

    fn transfer_from(&self, caller: &str, from: &str, to: &str, amount: u64) -> LedgerResult<()> {
        if caller.is_empty() {
            return Err(LedgerError::NullIdentity);
        }
        let mut state = self.state.write();
        let key = (from.to_string(), caller.to_string());
        let allowed = state.allowances.get(&key).copied().unwrap_or(0);
        if allowed < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: from.to_string(),
                spender: caller.to_string(),
                available: allowed,
                required: amount,
            });
        }
        Self::move_value(&mut state, from, to, amount)?;
        state.allowances.insert(key, allowed - amount);
        debug!(spender = caller, from, to, amount, "transfer on behalf");
        Ok(())
    }

    fn balance_of(&self, identity: &str) -> u64 {
        self.state.read().balances.get(identity).copied().unwrap_or(0)
    }
}

/// Record the pre-change value for the current snapshot era, once.
fn record_checkpoint(checkpoints: &mut Vec<Checkpoint>, current_id: u64, value: u64) {
    if current_id == 0 {
        return;
    }
    let last = checkpoints.last().map(|c| c.snapshot_id).unwrap_or(0);
    if last < current_id {
        checkpoints.push(Checkpoint {
            snapshot_id: current_id,
            value,
        });
    }
}

/// First checkpoint at or after `id` holds the value as of `id`; with
/// none recorded the value has not changed since.
fn lookup_checkpoint(checkpoints: &[Checkpoint], id: u64, current: u64) -> u64 {
    let idx = checkpoints.partition_point(|c| c.snapshot_id < id);
    checkpoints.get(idx).map(|c| c.value).unwrap_or(current)
}
