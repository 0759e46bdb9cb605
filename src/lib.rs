// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Grantpool Protocol Foundation
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

pub mod clock;
pub mod custody;
pub mod error;
pub mod events;
pub mod ledger;
pub mod orchestrator;
pub mod reentrancy;
pub mod registry;
pub mod voting;

// Re-export common types
pub use clock::{Clock, ManualClock, SystemClock};
pub use custody::{CustodyConfig, CustodyError, CustodyPool, CustodyResult, Distribution};
pub use error::ErrorKind;
pub use events::{EventBus, GrantEvent, GrantNotification};
pub use ledger::{InMemoryLedger, LedgerError, LedgerResult, ValueLedger};
pub use orchestrator::{GrantOrchestrator, GrantRound, OrchestratorError, OrchestratorResult};
pub use registry::{
    InMemoryProposalRegistry, ProposalRecord, ProposalRegistry, ProposalStatus, RegistryError,
    RegistryResult,
};
pub use voting::{RoundMeta, RoundResults, VotingConfig, VotingEngine, VotingError, VotingResult};

use std::sync::Arc;

/// A fully wired in-memory deployment of the funding workflow.
pub struct GrantSystem {
    pub orchestrator: Arc<GrantOrchestrator>,
    pub voting: Arc<VotingEngine>,
    pub custody: Arc<CustodyPool>,
    pub registry: Arc<InMemoryProposalRegistry>,
    pub ledger: Arc<InMemoryLedger>,
    pub events: EventBus,
}

/// Create an event bus with the default fan-out capacity.
pub fn create_event_bus() -> EventBus {
    EventBus::default()
}

/// Create an in-memory value ledger administered by `admin`.
pub fn create_in_memory_ledger(admin: &str) -> Arc<InMemoryLedger> {
    Arc::new(InMemoryLedger::new(admin))
}

/// Create an in-memory proposal registry.
pub fn create_proposal_registry(
    orchestrator: &str,
    admin: &str,
    clock: Arc<dyn Clock>,
) -> Arc<InMemoryProposalRegistry> {
    Arc::new(InMemoryProposalRegistry::new(orchestrator, admin, clock))
}

/// Wire every component of the funding workflow against a shared
/// in-memory ledger and registry.
///
/// `orchestrator_id` is the identity the orchestrator presents to its
/// collaborators; `stake_account` and `pool_account` are the ledger
/// accounts holding staked and pooled value.
pub fn create_grant_system(
    orchestrator_id: &str,
    admin_id: &str,
    stake_account: &str,
    pool_account: &str,
    voting_config: VotingConfig,
    custody_config: CustodyConfig,
    clock: Arc<dyn Clock>,
) -> GrantSystem {
    let events = EventBus::default();
    let ledger = create_in_memory_ledger(admin_id);
    let registry = create_proposal_registry(orchestrator_id, admin_id, clock.clone());

    let voting = Arc::new(VotingEngine::with_config(
        voting_config,
        orchestrator_id,
        admin_id,
        stake_account,
        ledger.clone(),
        clock.clone(),
        events.clone(),
    ));
    let custody = Arc::new(CustodyPool::with_config(
        custody_config,
        orchestrator_id,
        admin_id,
        pool_account,
        ledger.clone(),
        registry.clone(),
        clock.clone(),
        events.clone(),
    ));
    let orchestrator = Arc::new(GrantOrchestrator::new(
        orchestrator_id,
        admin_id,
        registry.clone(),
        voting.clone(),
        custody.clone(),
        clock,
        events.clone(),
    ));

    GrantSystem {
        orchestrator,
        voting,
        custody,
        registry,
        ledger,
        events,
    }
}
