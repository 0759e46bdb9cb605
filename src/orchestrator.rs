// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Grantpool Protocol Foundation

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::clock::Clock;
use crate::custody::{CustodyError, CustodyPool, Distribution};
use crate::error::ErrorKind;
use crate::events::{EventBus, GrantEvent};
use crate::registry::{ProposalRegistry, ProposalStatus, RegistryError};
use crate::voting::{VotingEngine, VotingError};

/// Orchestrator error types
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("caller {0} is not the administrator")]
    NotAdmin(String),

    #[error("round {0} does not exist")]
    RoundNotFound(u64),

    #[error("a round must end after it starts")]
    InvalidTimeRange,

    #[error("a round needs at least one proposal")]
    EmptyProposalSet,

    #[error("proposal id 0 cannot join a round")]
    ZeroProposalId,

    #[error("proposal {0} appears more than once in the round")]
    DuplicateProposalId(u64),

    #[error("voting already started for round {0}")]
    VotingAlreadyStarted(u64),

    #[error("voting never started for round {0}")]
    VotingNotStarted(u64),

    #[error("voting already ended for round {0}")]
    VotingAlreadyEnded(u64),

    #[error("voting has not ended for round {0}")]
    VotingNotEnded(u64),

    #[error("round {0} has not reached its start time")]
    BeforeRoundStart(u64),

    #[error("round {0} is past its end time")]
    AfterRoundEnd(u64),

    #[error("round {0}'s voting window has not elapsed")]
    WindowNotElapsed(u64),

    #[error("round {0} is already finalized")]
    AlreadyFinalized(u64),

    #[error("round {0} is not finalized")]
    NotFinalized(u64),

    #[error("round {0} closed without a winner")]
    NoWinner(u64),

    #[error("round {0} is already funded")]
    AlreadyFunded(u64),

    #[error("registry operation failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("voting operation failed: {0}")]
    Voting(#[from] VotingError),

    #[error("custody operation failed: {0}")]
    Custody(#[from] CustodyError),

    #[error("internal consistency failure: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::NotAdmin(_) => ErrorKind::Authorization,
            OrchestratorError::InvalidTimeRange
            | OrchestratorError::EmptyProposalSet
            | OrchestratorError::ZeroProposalId
            | OrchestratorError::DuplicateProposalId(_) => ErrorKind::Validation,
            OrchestratorError::RoundNotFound(_)
            | OrchestratorError::VotingAlreadyStarted(_)
            | OrchestratorError::VotingNotStarted(_)
            | OrchestratorError::VotingAlreadyEnded(_)
            | OrchestratorError::VotingNotEnded(_)
            | OrchestratorError::AlreadyFinalized(_)
            | OrchestratorError::NotFinalized(_)
            | OrchestratorError::NoWinner(_)
            | OrchestratorError::AlreadyFunded(_) => ErrorKind::State,
            OrchestratorError::BeforeRoundStart(_)
            | OrchestratorError::AfterRoundEnd(_)
            | OrchestratorError::WindowNotElapsed(_) => ErrorKind::Resource,
            OrchestratorError::Registry(e) => e.kind(),
            OrchestratorError::Voting(e) => e.kind(),
            OrchestratorError::Custody(e) => e.kind(),
            OrchestratorError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// A grant round and its monotonic phase flags. Phases only advance:
/// Created -> VotingStarted -> VotingEnded -> Finalized -> Funded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRound {
    pub id: u64,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub proposal_ids: Vec<u64>,
    pub winner: u64,
    pub total_votes: u64,
    pub voting_started: bool,
    pub voting_ended: bool,
    pub finalized: bool,
    pub funded: bool,
    pub distributed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct OrchestratorState {
    rounds: HashMap<u64, GrantRound>,
    next_round_id: u64,
}

/// Owns round records and drives phase transitions, calling into the
/// voting engine, the custody pool, and the proposal registry in
/// strict order. All operations are restricted to the administrative
/// identity; the orchestrator authenticates to its collaborators with
/// its own identity.
pub struct GrantOrchestrator {
    state: RwLock<OrchestratorState>,
    /// Identity this component presents to its collaborators.
    identity: String,
    admin: String,
    registry: RwLock<Arc<dyn ProposalRegistry>>,
    voting: RwLock<Arc<VotingEngine>>,
    custody: RwLock<Arc<CustodyPool>>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl GrantOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: impl Into<String>,
        admin: impl Into<String>,
        registry: Arc<dyn ProposalRegistry>,
        voting: Arc<VotingEngine>,
        custody: Arc<CustodyPool>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            state: RwLock::new(OrchestratorState {
                rounds: HashMap::new(),
                next_round_id: 1,
            }),
            identity: identity.into(),
            admin: admin.into(),
            registry: RwLock::new(registry),
            voting: RwLock::new(voting),
            custody: RwLock::new(custody),
            clock,
            events,
        }
    }

    fn check_admin(&self, caller: &str) -> OrchestratorResult<()> {
        if caller == self.admin {
            Ok(())
        } else {
            Err(OrchestratorError::NotAdmin(caller.to_string()))
        }
    }

    fn registry_handle(&self) -> Arc<dyn ProposalRegistry> {
        self.registry.read().clone()
    }

    fn voting_handle(&self) -> Arc<VotingEngine> {
        self.voting.read().clone()
    }

    fn custody_handle(&self) -> Arc<CustodyPool> {
        self.custody.read().clone()
    }

    /// Store a new round in phase Created and return its sequential id.
    pub fn create_round(
        &self,
        caller: &str,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        proposal_ids: Vec<u64>,
    ) -> OrchestratorResult<u64> {
        self.check_admin(caller)?;
        if end <= start {
            return Err(OrchestratorError::InvalidTimeRange);
        }
        if proposal_ids.is_empty() {
            return Err(OrchestratorError::EmptyProposalSet);
        }
        let mut seen = HashSet::new();
        for &id in &proposal_ids {
            if id == 0 {
                return Err(OrchestratorError::ZeroProposalId);
            }
            if !seen.insert(id) {
                return Err(OrchestratorError::DuplicateProposalId(id));
            }
        }
        let registry = self.registry_handle();
        for &id in &proposal_ids {
            registry.get_record(id)?;
        }

        let mut state = self.state.write();
        let round_id = state.next_round_id;
        state.next_round_id += 1;
        state.rounds.insert(
            round_id,
            GrantRound {
                id: round_id,
                name: name.to_string(),
                start,
                end,
                proposal_ids,
                winner: 0,
                total_votes: 0,
                voting_started: false,
                voting_ended: false,
                finalized: false,
                funded: false,
                distributed_at: None,
            },
        );
        drop(state);

        info!(round_id, name, "grant round created");
        Ok(round_id)
    }

    /// Open voting for a created round: marks every member proposal as
    /// Voting and delegates the round to the voting engine.
    pub fn start_voting(&self, caller: &str, round_id: u64) -> OrchestratorResult<()> {
        self.check_admin(caller)?;

        let proposal_ids = {
            let state = self.state.read();
            let round = state
                .rounds
                .get(&round_id)
                .ok_or(OrchestratorError::RoundNotFound(round_id))?;
            if round.voting_started {
                return Err(OrchestratorError::VotingAlreadyStarted(round_id));
            }
            let now = self.clock.now();
            if now < round.start {
                return Err(OrchestratorError::BeforeRoundStart(round_id));
            }
            if now > round.end {
                return Err(OrchestratorError::AfterRoundEnd(round_id));
            }
            round.proposal_ids.clone()
        };

        let registry = self.registry_handle();
        for &id in &proposal_ids {
            registry.get_record(id)?;
        }
        self.voting_handle()
            .open_round(&self.identity, round_id, proposal_ids.clone())?;
        for &id in &proposal_ids {
            registry.update_status(&self.identity, id, ProposalStatus::Voting)?;
        }

        let mut state = self.state.write();
        if let Some(round) = state.rounds.get_mut(&round_id) {
            round.voting_started = true;
        }
        drop(state);

        info!(round_id, "voting started");
        Ok(())
    }

    /// Close the vote, cross-check the engine's resolved winner, and
    /// record it. A mismatch between the close result and the engine's
    /// own results accessor is an internal failure, never user error.
    pub fn end_voting(&self, caller: &str, round_id: u64) -> OrchestratorResult<u64> {
        self.check_admin(caller)?;

        {
            let state = self.state.read();
            let round = state
                .rounds
                .get(&round_id)
                .ok_or(OrchestratorError::RoundNotFound(round_id))?;
            if !round.voting_started {
                return Err(OrchestratorError::VotingNotStarted(round_id));
            }
            if round.voting_ended {
                return Err(OrchestratorError::VotingAlreadyEnded(round_id));
            }
            if self.clock.now() <= round.end {
                return Err(OrchestratorError::WindowNotElapsed(round_id));
            }
        }

        let voting = self.voting_handle();
        let winner = voting.close_round(&self.identity, round_id)?;
        let results = voting.results(round_id)?;
        if results.winner != winner {
            error!(
                round_id,
                winner,
                reported = results.winner,
                "winner cross-check mismatch"
            );
            return Err(OrchestratorError::Internal(format!(
                "round {round_id}: close_round returned winner {winner} but results report {}",
                results.winner
            )));
        }
        if winner != 0 {
            self.registry_handle()
                .update_status(&self.identity, winner, ProposalStatus::WonVoting)?;
        }

        let mut state = self.state.write();
        if let Some(round) = state.rounds.get_mut(&round_id) {
            round.winner = winner;
            round.total_votes = results.total_votes;
            round.voting_ended = true;
        }
        drop(state);

        info!(round_id, winner, total_votes = results.total_votes, "voting ended");
        Ok(winner)
    }

    /// Lock in the winner for distribution.
    pub fn finalize_round(&self, caller: &str, round_id: u64) -> OrchestratorResult<()> {
        self.check_admin(caller)?;

        let now = self.clock.now();
        let winner = {
            let mut state = self.state.write();
            let round = state
                .rounds
                .get_mut(&round_id)
                .ok_or(OrchestratorError::RoundNotFound(round_id))?;
            if !round.voting_ended {
                return Err(OrchestratorError::VotingNotEnded(round_id));
            }
            if round.finalized {
                return Err(OrchestratorError::AlreadyFinalized(round_id));
            }
            if round.winner == 0 {
                return Err(OrchestratorError::NoWinner(round_id));
            }
            round.finalized = true;
            round.distributed_at = Some(now);
            round.winner
        };

        info!(round_id, winner, "round finalized");
        self.events.publish(GrantEvent::RoundFinalized {
            round_id,
            winner,
            finalized_at: now,
        });
        Ok(())
    }

    /// Trigger the custody payout for a finalized round and mark the
    /// winning proposal Funded.
    pub fn distribute_funds(&self, caller: &str, round_id: u64) -> OrchestratorResult<Distribution> {
        self.check_admin(caller)?;

        let winner = {
            let state = self.state.read();
            let round = state
                .rounds
                .get(&round_id)
                .ok_or(OrchestratorError::RoundNotFound(round_id))?;
            if !round.finalized {
                return Err(OrchestratorError::NotFinalized(round_id));
            }
            if round.funded {
                return Err(OrchestratorError::AlreadyFunded(round_id));
            }
            round.winner
        };

        let record = self
            .custody_handle()
            .distribute_funds(&self.identity, round_id, winner)?;
        self.registry_handle()
            .update_status(&self.identity, winner, ProposalStatus::Funded)?;

        let mut state = self.state.write();
        if let Some(round) = state.rounds.get_mut(&round_id) {
            round.funded = true;
        }
        drop(state);

        info!(round_id, winner, amount = record.amount, "round funded");
        Ok(record)
    }

    pub fn round(&self, round_id: u64) -> OrchestratorResult<GrantRound> {
        self.state
            .read()
            .rounds
            .get(&round_id)
            .cloned()
            .ok_or(OrchestratorError::RoundNotFound(round_id))
    }

    pub fn round_count(&self) -> usize {
        self.state.read().rounds.len()
    }

    // Administrative surface. Component-owned parameters forward the
    // caller so the owning component enforces its own authority.

    pub fn set_voting_duration(&self, caller: &str, duration_secs: i64) -> OrchestratorResult<()> {
        self.voting_handle()
            .set_voting_duration(caller, duration_secs)?;
        Ok(())
    }

    pub fn set_min_stake(&self, caller: &str, min_stake: u64) -> OrchestratorResult<()> {
        self.voting_handle().set_min_stake(caller, min_stake)?;
        Ok(())
    }

    pub fn set_payout_bps(&self, caller: &str, payout_bps: u32) -> OrchestratorResult<()> {
        self.custody_handle().set_payout_bps(caller, payout_bps)?;
        Ok(())
    }

    pub fn set_registry(
        &self,
        caller: &str,
        registry: Arc<dyn ProposalRegistry>,
    ) -> OrchestratorResult<()> {
        self.check_admin(caller)?;
        *self.registry.write() = registry;
        info!("proposal registry rotated");
        Ok(())
    }

    pub fn set_voting_engine(
        &self,
        caller: &str,
        voting: Arc<VotingEngine>,
    ) -> OrchestratorResult<()> {
        self.check_admin(caller)?;
        *self.voting.write() = voting;
        info!("voting engine rotated");
        Ok(())
    }

    pub fn set_custody_pool(
        &self,
        caller: &str,
        custody: Arc<CustodyPool>,
    ) -> OrchestratorResult<()> {
        self.check_admin(caller)?;
        *self.custody.write() = custody;
        info!("custody pool rotated");
        Ok(())
    }
}
