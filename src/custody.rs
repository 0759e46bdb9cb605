// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Grantpool Protocol Foundation

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::ErrorKind;
use crate::events::{EventBus, GrantEvent};
use crate::ledger::{LedgerError, ValueLedger};
use crate::reentrancy::ReentrancyGuard;
use crate::registry::{ProposalRegistry, RegistryError};

/// Custody pool error types
#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("caller {0} is not the round orchestrator")]
    NotOrchestrator(String),

    #[error("caller {0} is not the administrator")]
    NotAdmin(String),

    #[error("the null identity cannot take part in a custody operation")]
    NullIdentity,

    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("round {0} has already been distributed")]
    AlreadyDistributed(u64),

    #[error("requested {requested} exceeds the tracked pool total {available}")]
    ExceedsPoolBalance { requested: u64, available: u64 },

    #[error("the configured payout resolves to zero for the current pool")]
    EmptyPayout,

    #[error("proposal {0} resolves to a null author")]
    NullRecipient(u64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("another custody operation is already in flight")]
    OperationInFlight,

    #[error("author lookup failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("value transfer failed: {0}")]
    Transfer(#[from] LedgerError),
}

impl CustodyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CustodyError::NotOrchestrator(_) | CustodyError::NotAdmin(_) => {
                ErrorKind::Authorization
            }
            CustodyError::NullIdentity
            | CustodyError::NonPositiveAmount
            | CustodyError::EmptyPayout
            | CustodyError::NullRecipient(_)
            | CustodyError::InvalidConfig(_) => ErrorKind::Validation,
            CustodyError::AlreadyDistributed(_) | CustodyError::OperationInFlight => {
                ErrorKind::State
            }
            CustodyError::ExceedsPoolBalance { .. } => ErrorKind::Resource,
            CustodyError::Registry(e) => e.kind(),
            CustodyError::Transfer(_) => ErrorKind::Transfer,
        }
    }
}

/// Result type for custody operations
pub type CustodyResult<T> = Result<T, CustodyError>;

/// Distribution policy: a fixed share of the current pool total,
/// computed at call time. One policy per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyConfig {
    /// Payout share in basis points of the tracked pool total.
    pub payout_bps: u32,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self { payout_bps: 1_000 }
    }
}

/// Append-only record of a completed payout, at most one per round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub round_id: u64,
    pub proposal_id: u64,
    pub recipient: String,
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Tracked bookkeeping total; never exceeds the ledger balance
    /// held on the pool account's behalf.
    total: u64,
    donors: HashMap<String, u64>,
    distributions: HashMap<u64, Distribution>,
}

/// Holds pooled value and pays a resolved author exactly once per
/// round, under single-use authorization from the orchestrator.
pub struct CustodyPool {
    state: RwLock<PoolState>,
    config: RwLock<CustodyConfig>,
    guard: ReentrancyGuard,
    orchestrator: String,
    admin: String,
    /// Ledger account the pooled value sits in.
    pool_account: String,
    ledger: Arc<dyn ValueLedger>,
    registry: Arc<dyn ProposalRegistry>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl CustodyPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: impl Into<String>,
        admin: impl Into<String>,
        pool_account: impl Into<String>,
        ledger: Arc<dyn ValueLedger>,
        registry: Arc<dyn ProposalRegistry>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self::with_config(
            CustodyConfig::default(),
            orchestrator,
            admin,
            pool_account,
            ledger,
            registry,
            clock,
            events,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_config(
        config: CustodyConfig,
        orchestrator: impl Into<String>,
        admin: impl Into<String>,
        pool_account: impl Into<String>,
        ledger: Arc<dyn ValueLedger>,
        registry: Arc<dyn ProposalRegistry>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            state: RwLock::new(PoolState::default()),
            config: RwLock::new(config),
            guard: ReentrancyGuard::new(),
            orchestrator: orchestrator.into(),
            admin: admin.into(),
            pool_account: pool_account.into(),
            ledger,
            registry,
            clock,
            events,
        }
    }

    /// Pull a donation into the pool. The donor's ledger transfer must
    /// succeed before any bookkeeping moves.
    pub fn deposit(&self, donor: &str, amount: u64) -> CustodyResult<()> {
        if donor.is_empty() {
            return Err(CustodyError::NullIdentity);
        }
        if amount == 0 {
            return Err(CustodyError::NonPositiveAmount);
        }
        let _token = self.guard.enter().ok_or(CustodyError::OperationInFlight)?;

        self.ledger
            .transfer_from(&self.pool_account, donor, &self.pool_account, amount)?;

        let (balance, donor_total) = {
            let mut state = self.state.write();
            state.total += amount;
            let donor_total = {
                let entry = state.donors.entry(donor.to_string()).or_insert(0);
                *entry += amount;
                *entry
            };
            (state.total, donor_total)
        };

        info!(donor, amount, balance, "deposit received");
        self.events.publish(GrantEvent::DepositReceived {
            donor: donor.to_string(),
            amount,
            donor_total,
        });
        self.events.publish(GrantEvent::PoolBalanceChanged {
            balance,
            change: amount as i64,
        });
        Ok(())
    }

    /// Administrative drain of pooled value. The bookkeeping debit
    /// lands before the outbound transfer and is restored if the
    /// transfer fails.
    pub fn withdraw(&self, caller: &str, to: &str, amount: u64) -> CustodyResult<()> {
        if caller != self.admin {
            return Err(CustodyError::NotAdmin(caller.to_string()));
        }
        if to.is_empty() {
            return Err(CustodyError::NullIdentity);
        }
        if amount == 0 {
            return Err(CustodyError::NonPositiveAmount);
        }
        let _token = self.guard.enter().ok_or(CustodyError::OperationInFlight)?;

        {
            let mut state = self.state.write();
            if amount > state.total {
                return Err(CustodyError::ExceedsPoolBalance {
                    requested: amount,
                    available: state.total,
                });
            }
            state.total -= amount;
        }

        if let Err(e) = self.ledger.transfer(&self.pool_account, to, amount) {
            self.state.write().total += amount;
            warn!(to, amount, error = %e, "withdrawal aborted");
            return Err(CustodyError::Transfer(e));
        }

        let balance = self.state.read().total;
        info!(to, amount, balance, "pool withdrawal");
        self.events.publish(GrantEvent::PoolBalanceChanged {
            balance,
            change: -(amount as i64),
        });
        Ok(())
    }

    /// Pay the winning proposal's author their share of the pool.
    /// Restricted to the orchestrator; at most once per round. The
    /// debit and the distribution record land before the outbound
    /// transfer so a re-entrant observer never sees a stale total.
    pub fn distribute_funds(
        &self,
        caller: &str,
        round_id: u64,
        proposal_id: u64,
    ) -> CustodyResult<Distribution> {
        if caller != self.orchestrator {
            return Err(CustodyError::NotOrchestrator(caller.to_string()));
        }
        let _token = self.guard.enter().ok_or(CustodyError::OperationInFlight)?;

        let recipient = self.registry.get_author(proposal_id)?;
        if recipient.is_empty() {
            return Err(CustodyError::NullRecipient(proposal_id));
        }
        let payout_bps = self.config.read().payout_bps;

        let record = {
            let mut state = self.state.write();
            if state.distributions.contains_key(&round_id) {
                return Err(CustodyError::AlreadyDistributed(round_id));
            }
            let amount = (state.total as u128 * payout_bps as u128 / 10_000) as u64;
            if amount == 0 {
                return Err(CustodyError::EmptyPayout);
            }
            if amount > state.total {
                return Err(CustodyError::ExceedsPoolBalance {
                    requested: amount,
                    available: state.total,
                });
            }
            state.total -= amount;
            let record = Distribution {
                round_id,
                proposal_id,
                recipient: recipient.clone(),
                amount,
                timestamp: self.clock.now(),
            };
            state.distributions.insert(round_id, record.clone());
            record
        };

        if let Err(e) = self.ledger.transfer(&self.pool_account, &recipient, record.amount) {
            let mut state = self.state.write();
            state.total += record.amount;
            state.distributions.remove(&round_id);
            warn!(round_id, proposal_id, error = %e, "distribution aborted");
            return Err(CustodyError::Transfer(e));
        }

        let balance = self.state.read().total;
        info!(
            round_id,
            proposal_id,
            recipient = %record.recipient,
            amount = record.amount,
            balance,
            "funds distributed"
        );
        self.events.publish(GrantEvent::FundsDistributed {
            round_id,
            proposal_id,
            recipient: record.recipient.clone(),
            amount: record.amount,
        });
        self.events.publish(GrantEvent::PoolBalanceChanged {
            balance,
            change: -(record.amount as i64),
        });
        Ok(record)
    }

    pub fn pool_total(&self) -> u64 {
        self.state.read().total
    }

    pub fn donor_balance(&self, donor: &str) -> u64 {
        self.state.read().donors.get(donor).copied().unwrap_or(0)
    }

    pub fn distribution(&self, round_id: u64) -> Option<Distribution> {
        self.state.read().distributions.get(&round_id).cloned()
    }

    pub fn config(&self) -> CustodyConfig {
        self.config.read().clone()
    }

    pub fn set_payout_bps(&self, caller: &str, payout_bps: u32) -> CustodyResult<()> {
        if caller != self.admin {
            return Err(CustodyError::NotAdmin(caller.to_string()));
        }
        if payout_bps == 0 || payout_bps > 10_000 {
            return Err(CustodyError::InvalidConfig(format!(
                "payout must lie in 1..=10000 basis points, got {payout_bps}"
            )));
        }
        self.config.write().payout_bps = payout_bps;
        info!(payout_bps, "payout share updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::ledger::{InMemoryLedger, LedgerResult};
    use crate::registry::InMemoryProposalRegistry;

    const ORCHESTRATOR: &str = "orchestrator";
    const ADMIN: &str = "admin";
    const POOL_ACCOUNT: &str = "custody-pool";

    struct Fixture {
        pool: Arc<CustodyPool>,
        ledger: Arc<InMemoryLedger>,
        registry: Arc<InMemoryProposalRegistry>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(SystemClock);
        let ledger = Arc::new(InMemoryLedger::new(ADMIN));
        ledger.set_minter(ADMIN, ADMIN, true).unwrap();
        let registry = Arc::new(InMemoryProposalRegistry::new(
            ORCHESTRATOR,
            ADMIN,
            clock.clone(),
        ));
        let pool = Arc::new(CustodyPool::new(
            ORCHESTRATOR,
            ADMIN,
            POOL_ACCOUNT,
            ledger.clone(),
            registry.clone(),
            clock,
            EventBus::new(64),
        ));
        Fixture {
            pool,
            ledger,
            registry,
        }
    }

    fn fund_donor(f: &Fixture, donor: &str, amount: u64) {
        f.ledger.mint(ADMIN, donor, amount).unwrap();
        f.ledger.approve(donor, POOL_ACCOUNT, amount).unwrap();
    }

    #[test]
    fn deposit_credits_bookkeeping_and_moves_value() {
        let f = fixture();
        fund_donor(&f, "dana", 1_000);
        f.pool.deposit("dana", 1_000).unwrap();

        assert_eq!(f.pool.pool_total(), 1_000);
        assert_eq!(f.pool.donor_balance("dana"), 1_000);
        assert_eq!(f.ledger.balance_of(POOL_ACCOUNT), 1_000);
        assert_eq!(f.ledger.balance_of("dana"), 0);
    }

    #[test]
    fn deposit_rejects_zero_amount() {
        let f = fixture();
        let err = f.pool.deposit("dana", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn failed_deposit_transfer_changes_nothing() {
        let f = fixture();
        // No approval given: the pull fails.
        f.ledger.mint(ADMIN, "dana", 1_000).unwrap();
        let err = f.pool.deposit("dana", 1_000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert_eq!(f.pool.pool_total(), 0);
        assert_eq!(f.pool.donor_balance("dana"), 0);
    }

    #[test]
    fn withdraw_is_admin_only_and_bounded() {
        let f = fixture();
        fund_donor(&f, "dana", 1_000);
        f.pool.deposit("dana", 1_000).unwrap();

        let err = f.pool.withdraw("mallory", "mallory", 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(matches!(
            f.pool.withdraw(ADMIN, "", 10).unwrap_err(),
            CustodyError::NullIdentity
        ));
        assert!(matches!(
            f.pool.withdraw(ADMIN, "ops", 1_001).unwrap_err(),
            CustodyError::ExceedsPoolBalance { .. }
        ));

        f.pool.withdraw(ADMIN, "ops", 400).unwrap();
        assert_eq!(f.pool.pool_total(), 600);
        assert_eq!(f.ledger.balance_of("ops"), 400);
    }

    // Scenario: 1000 in the pool, a 10% payout pays 100 and leaves
    // 900; the second call for the same round fails and moves nothing.
    #[test]
    fn percentage_payout_distributes_exactly_once() {
        let f = fixture();
        let proposal = f.registry.create("carol", "Bike racks", "", "").unwrap();
        fund_donor(&f, "dana", 1_000);
        f.pool.deposit("dana", 1_000).unwrap();

        let record = f.pool.distribute_funds(ORCHESTRATOR, 7, proposal).unwrap();
        assert_eq!(record.amount, 100);
        assert_eq!(record.recipient, "carol");
        assert_eq!(f.pool.pool_total(), 900);
        assert_eq!(f.ledger.balance_of("carol"), 100);

        let err = f.pool.distribute_funds(ORCHESTRATOR, 7, proposal).unwrap_err();
        assert!(matches!(err, CustodyError::AlreadyDistributed(7)));
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(f.pool.pool_total(), 900);
        assert_eq!(f.ledger.balance_of("carol"), 100);
    }

    #[test]
    fn distribution_requires_orchestrator() {
        let f = fixture();
        let err = f.pool.distribute_funds("mallory", 1, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn empty_pool_has_nothing_to_distribute() {
        let f = fixture();
        let proposal = f.registry.create("carol", "Bike racks", "", "").unwrap();
        let err = f.pool.distribute_funds(ORCHESTRATOR, 1, proposal).unwrap_err();
        assert!(matches!(err, CustodyError::EmptyPayout));
    }

    #[test]
    fn unknown_proposal_fails_author_resolution() {
        let f = fixture();
        fund_donor(&f, "dana", 1_000);
        f.pool.deposit("dana", 1_000).unwrap();
        let err = f.pool.distribute_funds(ORCHESTRATOR, 1, 99).unwrap_err();
        assert!(matches!(
            err,
            CustodyError::Registry(RegistryError::UnknownProposal(99))
        ));
        assert_eq!(f.pool.pool_total(), 1_000);
    }

    /// Ledger double whose outbound transfers always fail.
    struct RefusingLedger {
        inner: InMemoryLedger,
    }

    impl ValueLedger for RefusingLedger {
        fn transfer(&self, caller: &str, _to: &str, amount: u64) -> LedgerResult<()> {
            Err(LedgerError::InsufficientBalance {
                account: caller.to_string(),
                available: 0,
                required: amount,
            })
        }

        fn transfer_from(
            &self,
            caller: &str,
            from: &str,
            to: &str,
            amount: u64,
        ) -> LedgerResult<()> {
            self.inner.transfer_from(caller, from, to, amount)
        }

        fn balance_of(&self, identity: &str) -> u64 {
            self.inner.balance_of(identity)
        }
    }

    #[test]
    fn failed_outbound_transfer_rolls_back_distribution() {
        let clock = Arc::new(SystemClock);
        let inner = InMemoryLedger::new(ADMIN);
        inner.set_minter(ADMIN, ADMIN, true).unwrap();
        inner.mint(ADMIN, "dana", 1_000).unwrap();
        inner.approve("dana", POOL_ACCOUNT, 1_000).unwrap();
        let ledger = Arc::new(RefusingLedger { inner });
        let registry = Arc::new(InMemoryProposalRegistry::new(
            ORCHESTRATOR,
            ADMIN,
            clock.clone(),
        ));
        let proposal = registry.create("carol", "Bike racks", "", "").unwrap();
        let pool = CustodyPool::new(
            ORCHESTRATOR,
            ADMIN,
            POOL_ACCOUNT,
            ledger,
            registry,
            clock,
            EventBus::new(64),
        );
        pool.deposit("dana", 1_000).unwrap();

        let err = pool.distribute_funds(ORCHESTRATOR, 1, proposal).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert_eq!(pool.pool_total(), 1_000);
        assert!(pool.distribution(1).is_none());

        let err = pool.withdraw(ADMIN, "ops", 500).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert_eq!(pool.pool_total(), 1_000);
    }

    /// Ledger double that re-enters the pool during the outbound
    /// transfer, the way an adversarial token hands control back.
    struct ReentrantLedger {
        inner: InMemoryLedger,
        pool: RwLock<Option<Arc<CustodyPool>>>,
        observed: RwLock<Option<CustodyError>>,
    }

    impl ValueLedger for ReentrantLedger {
        fn transfer(&self, caller: &str, to: &str, amount: u64) -> LedgerResult<()> {
            if let Some(pool) = self.pool.read().clone() {
                let err = pool
                    .distribute_funds(ORCHESTRATOR, 2, 1)
                    .expect_err("re-entrant distribution must be rejected");
                *self.observed.write() = Some(err);
            }
            self.inner.transfer(caller, to, amount)
        }

        fn transfer_from(
            &self,
            caller: &str,
            from: &str,
            to: &str,
            amount: u64,
        ) -> LedgerResult<()> {
            self.inner.transfer_from(caller, from, to, amount)
        }

        fn balance_of(&self, identity: &str) -> u64 {
            self.inner.balance_of(identity)
        }
    }

    #[test]
    fn reentrant_distribution_is_rejected() {
        let clock = Arc::new(SystemClock);
        let inner = InMemoryLedger::new(ADMIN);
        inner.set_minter(ADMIN, ADMIN, true).unwrap();
        inner.mint(ADMIN, "dana", 1_000).unwrap();
        inner.approve("dana", POOL_ACCOUNT, 1_000).unwrap();
        let ledger = Arc::new(ReentrantLedger {
            inner,
            pool: RwLock::new(None),
            observed: RwLock::new(None),
        });
        let registry = Arc::new(InMemoryProposalRegistry::new(
            ORCHESTRATOR,
            ADMIN,
            clock.clone(),
        ));
        let proposal = registry.create("carol", "Bike racks", "", "").unwrap();
        let pool = Arc::new(CustodyPool::new(
            ORCHESTRATOR,
            ADMIN,
            POOL_ACCOUNT,
            ledger.clone(),
            registry,
            clock,
            EventBus::new(64),
        ));
        pool.deposit("dana", 1_000).unwrap();
        *ledger.pool.write() = Some(pool.clone());

        let record = pool.distribute_funds(ORCHESTRATOR, 1, proposal).unwrap();
        assert_eq!(record.amount, 100);
        assert!(matches!(
            ledger.observed.read().as_ref(),
            Some(CustodyError::OperationInFlight)
        ));
        assert_eq!(pool.pool_total(), 900);
        assert!(pool.distribution(1).is_some());
        assert!(pool.distribution(2).is_none());
    }

    #[test]
    fn payout_share_is_admin_configurable() {
        let f = fixture();
        assert!(matches!(
            f.pool.set_payout_bps("mallory", 500).unwrap_err(),
            CustodyError::NotAdmin(_)
        ));
        assert!(matches!(
            f.pool.set_payout_bps(ADMIN, 10_001).unwrap_err(),
            CustodyError::InvalidConfig(_)
        ));
        f.pool.set_payout_bps(ADMIN, 2_500).unwrap();
        assert_eq!(f.pool.config().payout_bps, 2_500);
    }

    #[test]
    fn distribution_notifications_are_published() {
        let f = fixture();
        let proposal = f.registry.create("carol", "Bike racks", "", "").unwrap();
        fund_donor(&f, "dana", 1_000);
        let mut rx = f.pool.events.subscribe();

        f.pool.deposit("dana", 1_000).unwrap();
        f.pool.distribute_funds(ORCHESTRATOR, 1, proposal).unwrap();

        let deposit = rx.try_recv().unwrap();
        assert!(matches!(deposit.event, GrantEvent::DepositReceived { .. }));
        let credited = rx.try_recv().unwrap();
        assert_eq!(
            credited.event,
            GrantEvent::PoolBalanceChanged {
                balance: 1_000,
                change: 1_000,
            }
        );
        let distributed = rx.try_recv().unwrap();
        assert_eq!(
            distributed.event,
            GrantEvent::FundsDistributed {
                round_id: 1,
                proposal_id: proposal,
                recipient: "carol".to_string(),
                amount: 100,
            }
        );
        let debited = rx.try_recv().unwrap();
        assert_eq!(
            debited.event,
            GrantEvent::PoolBalanceChanged {
                balance: 900,
                change: -100,
            }
        );
    }
}
