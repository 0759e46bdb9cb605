// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Grantpool Protocol Foundation

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::ErrorKind;
use crate::events::{EventBus, GrantEvent};
use crate::ledger::{LedgerError, ValueLedger};
use crate::reentrancy::ReentrancyGuard;

/// Voting engine error types
#[derive(Debug, Error)]
pub enum VotingError {
    #[error("caller {0} is not the round orchestrator")]
    NotOrchestrator(String),

    #[error("caller {0} is not the administrator")]
    NotAdmin(String),

    #[error("round {0} already exists")]
    RoundExists(u64),

    #[error("round {0} does not exist")]
    RoundNotFound(u64),

    #[error("a round needs at least one proposal")]
    EmptyProposalSet,

    #[error("proposal id 0 cannot join a round")]
    ZeroProposalId,

    #[error("proposal {0} appears more than once in the round")]
    DuplicateProposalId(u64),

    #[error("round {0} is not active")]
    RoundInactive(u64),

    #[error("round {0} has already ended")]
    RoundEnded(u64),

    #[error("round {0} has not ended")]
    RoundNotEnded(u64),

    #[error("current time is outside round {0}'s voting window")]
    OutsideVotingWindow(u64),

    #[error("round {0}'s voting window has not elapsed")]
    WindowNotElapsed(u64),

    #[error("voter {voter} has already voted in round {round_id}")]
    AlreadyVoted { round_id: u64, voter: String },

    #[error("stake {amount} is below the minimum stake {minimum}")]
    StakeBelowMinimum { amount: u64, minimum: u64 },

    #[error("proposal {proposal_id} is not a member of round {round_id}")]
    NotARoundMember { round_id: u64, proposal_id: u64 },

    #[error("another staking operation is already in flight")]
    OperationInFlight,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("stake transfer failed: {0}")]
    Transfer(#[from] LedgerError),
}

impl VotingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VotingError::NotOrchestrator(_) | VotingError::NotAdmin(_) => ErrorKind::Authorization,
            VotingError::EmptyProposalSet
            | VotingError::ZeroProposalId
            | VotingError::DuplicateProposalId(_)
            | VotingError::NotARoundMember { .. }
            | VotingError::InvalidConfig(_) => ErrorKind::Validation,
            VotingError::RoundExists(_)
            | VotingError::RoundNotFound(_)
            | VotingError::RoundInactive(_)
            | VotingError::RoundEnded(_)
            | VotingError::RoundNotEnded(_)
            | VotingError::AlreadyVoted { .. }
            | VotingError::OperationInFlight => ErrorKind::State,
            VotingError::OutsideVotingWindow(_)
            | VotingError::WindowNotElapsed(_)
            | VotingError::StakeBelowMinimum { .. } => ErrorKind::Resource,
            VotingError::Transfer(_) => ErrorKind::Transfer,
        }
    }
}

/// Result type for voting operations
pub type VotingResult<T> = Result<T, VotingError>;

/// Tunable voting parameters, administrator-settable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingConfig {
    /// Length of a round's voting window in seconds.
    pub voting_duration_secs: i64,
    /// Smallest stake a single vote may carry.
    pub min_stake: u64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            voting_duration_secs: 7 * 24 * 3_600,
            min_stake: 100,
        }
    }
}

/// Public projection of a round's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundMeta {
    pub id: u64,
    pub proposal_ids: Vec<u64>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub active: bool,
    pub ended: bool,
    pub total_votes: u64,
    pub winner: u64,
    pub winner_votes: u64,
}

/// Outcome of an ended round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResults {
    /// Winning proposal id; 0 when no stake was cast.
    pub winner: u64,
    pub total_votes: u64,
}

#[derive(Debug, Clone)]
struct VotingRound {
    id: u64,
    /// Order-preserving member list fixed at creation; ties resolve to
    /// the earliest entry.
    proposal_ids: Vec<u64>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    active: bool,
    ended: bool,
    tallies: HashMap<u64, u64>,
    voters: HashSet<String>,
    total_votes: u64,
    winner: u64,
    winner_votes: u64,
}

impl VotingRound {
    fn meta(&self) -> RoundMeta {
        RoundMeta {
            id: self.id,
            proposal_ids: self.proposal_ids.clone(),
            start: self.start,
            end: self.end,
            active: self.active,
            ended: self.ended,
            total_votes: self.total_votes,
            winner: self.winner,
            winner_votes: self.winner_votes,
        }
    }
}

/// Owns per-round voting state: accepts staked votes and resolves the
/// winner when the orchestrator closes a round.
pub struct VotingEngine {
    rounds: RwLock<HashMap<u64, VotingRound>>,
    config: RwLock<VotingConfig>,
    guard: ReentrancyGuard,
    orchestrator: String,
    admin: String,
    /// Account that holds staked value.
    stake_account: String,
    ledger: Arc<dyn ValueLedger>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl VotingEngine {
    pub fn new(
        orchestrator: impl Into<String>,
        admin: impl Into<String>,
        stake_account: impl Into<String>,
        ledger: Arc<dyn ValueLedger>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self::with_config(
            VotingConfig::default(),
            orchestrator,
            admin,
            stake_account,
            ledger,
            clock,
            events,
        )
    }

    pub fn with_config(
        config: VotingConfig,
        orchestrator: impl Into<String>,
        admin: impl Into<String>,
        stake_account: impl Into<String>,
        ledger: Arc<dyn ValueLedger>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            rounds: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
            guard: ReentrancyGuard::new(),
            orchestrator: orchestrator.into(),
            admin: admin.into(),
            stake_account: stake_account.into(),
            ledger,
            clock,
            events,
        }
    }

    fn check_orchestrator(&self, caller: &str) -> VotingResult<()> {
        if caller == self.orchestrator {
            Ok(())
        } else {
            Err(VotingError::NotOrchestrator(caller.to_string()))
        }
    }

    /// Open a round over a fixed, ordered proposal set. Restricted to
    /// the orchestrator.
    pub fn open_round(
        &self,
        caller: &str,
        round_id: u64,
        proposal_ids: Vec<u64>,
    ) -> VotingResult<()> {
        self.check_orchestrator(caller)?;
        if proposal_ids.is_empty() {
            return Err(VotingError::EmptyProposalSet);
        }
        let mut seen = HashSet::new();
        for &id in &proposal_ids {
            if id == 0 {
                return Err(VotingError::ZeroProposalId);
            }
            if !seen.insert(id) {
                return Err(VotingError::DuplicateProposalId(id));
            }
        }

        let now = self.clock.now();
        let end = now + Duration::seconds(self.config.read().voting_duration_secs);

        let mut rounds = self.rounds.write();
        if rounds.contains_key(&round_id) {
            return Err(VotingError::RoundExists(round_id));
        }
        rounds.insert(
            round_id,
            VotingRound {
                id: round_id,
                proposal_ids: proposal_ids.clone(),
                start: now,
                end,
                active: true,
                ended: false,
                tallies: HashMap::new(),
                voters: HashSet::new(),
                total_votes: 0,
                winner: 0,
                winner_votes: 0,
            },
        );
        drop(rounds);

        info!(round_id, proposals = proposal_ids.len(), "voting round opened");
        self.events.publish(GrantEvent::RoundOpened {
            round_id,
            proposal_ids,
            start: now,
            end,
        });
        Ok(())
    }

    /// Stake `amount` on a member proposal. Open to any voter exactly
    /// once per round; the stake is debited from the voter before any
    /// tally moves.
    pub fn cast_vote(
        &self,
        voter: &str,
        round_id: u64,
        proposal_id: u64,
        amount: u64,
    ) -> VotingResult<()> {
        let _token = self.guard.enter().ok_or(VotingError::OperationInFlight)?;

        {
            let rounds = self.rounds.read();
            let round = rounds
                .get(&round_id)
                .ok_or(VotingError::RoundNotFound(round_id))?;
            if !round.active {
                return Err(VotingError::RoundInactive(round_id));
            }
            let now = self.clock.now();
            if now < round.start || now > round.end {
                return Err(VotingError::OutsideVotingWindow(round_id));
            }
            if round.voters.contains(voter) {
                return Err(VotingError::AlreadyVoted {
                    round_id,
                    voter: voter.to_string(),
                });
            }
            let minimum = self.config.read().min_stake;
            if amount < minimum {
                return Err(VotingError::StakeBelowMinimum { amount, minimum });
            }
            if !round.proposal_ids.contains(&proposal_id) {
                return Err(VotingError::NotARoundMember {
                    round_id,
                    proposal_id,
                });
            }
        }

        // The debit must land before any tally moves; a failure here
        // aborts with no state change.
        self.ledger
            .transfer_from(&self.stake_account, voter, &self.stake_account, amount)?;

        let mut rounds = self.rounds.write();
        let round = rounds
            .get_mut(&round_id)
            .ok_or(VotingError::RoundNotFound(round_id))?;
        *round.tallies.entry(proposal_id).or_insert(0) += amount;
        round.total_votes += amount;
        round.voters.insert(voter.to_string());
        drop(rounds);

        info!(round_id, proposal_id, voter, amount, "vote cast");
        self.events.publish(GrantEvent::VoteCast {
            round_id,
            proposal_id,
            voter: voter.to_string(),
            amount,
        });
        Ok(())
    }

    /// Close an elapsed round and resolve its winner. Restricted to
    /// the orchestrator. Returns the winner id (0 = no winner).
    pub fn close_round(&self, caller: &str, round_id: u64) -> VotingResult<u64> {
        self.check_orchestrator(caller)?;

        let mut rounds = self.rounds.write();
        let round = rounds
            .get_mut(&round_id)
            .ok_or(VotingError::RoundNotFound(round_id))?;
        if round.ended {
            return Err(VotingError::RoundEnded(round_id));
        }
        if !round.active {
            return Err(VotingError::RoundInactive(round_id));
        }
        if self.clock.now() <= round.end {
            return Err(VotingError::WindowNotElapsed(round_id));
        }

        // Scan in stored order; only a strictly greater tally replaces
        // the leader, so ties resolve to the earliest-listed proposal.
        let mut winner = 0u64;
        let mut winner_votes = 0u64;
        for &proposal_id in &round.proposal_ids {
            let votes = round.tallies.get(&proposal_id).copied().unwrap_or(0);
            if votes > winner_votes {
                winner = proposal_id;
                winner_votes = votes;
            }
        }

        round.active = false;
        round.ended = true;
        round.winner = winner;
        round.winner_votes = winner_votes;
        let total_votes = round.total_votes;
        drop(rounds);

        if winner == 0 {
            warn!(round_id, "round closed without a winner");
        } else {
            info!(round_id, winner, winner_votes, total_votes, "round closed");
        }
        self.events.publish(GrantEvent::RoundClosed {
            round_id,
            winner,
            winner_votes,
            total_votes,
        });
        Ok(winner)
    }

    /// Stake accumulated on one proposal. Non-members of a known round
    /// report zero.
    pub fn votes_for(&self, round_id: u64, proposal_id: u64) -> VotingResult<u64> {
        let rounds = self.rounds.read();
        let round = rounds
            .get(&round_id)
            .ok_or(VotingError::RoundNotFound(round_id))?;
        Ok(round.tallies.get(&proposal_id).copied().unwrap_or(0))
    }

    pub fn round_meta(&self, round_id: u64) -> VotingResult<RoundMeta> {
        let rounds = self.rounds.read();
        rounds
            .get(&round_id)
            .map(VotingRound::meta)
            .ok_or(VotingError::RoundNotFound(round_id))
    }

    /// Winner and total for an ended round; fails while voting is
    /// still open.
    pub fn results(&self, round_id: u64) -> VotingResult<RoundResults> {
        let rounds = self.rounds.read();
        let round = rounds
            .get(&round_id)
            .ok_or(VotingError::RoundNotFound(round_id))?;
        if !round.ended {
            return Err(VotingError::RoundNotEnded(round_id));
        }
        Ok(RoundResults {
            winner: round.winner,
            total_votes: round.total_votes,
        })
    }

    pub fn has_voted(&self, round_id: u64, voter: &str) -> VotingResult<bool> {
        let rounds = self.rounds.read();
        let round = rounds
            .get(&round_id)
            .ok_or(VotingError::RoundNotFound(round_id))?;
        Ok(round.voters.contains(voter))
    }

    pub fn config(&self) -> VotingConfig {
        self.config.read().clone()
    }

    pub fn set_voting_duration(&self, caller: &str, duration_secs: i64) -> VotingResult<()> {
        if caller != self.admin {
            return Err(VotingError::NotAdmin(caller.to_string()));
        }
        if duration_secs <= 0 {
            return Err(VotingError::InvalidConfig(
                "voting duration must be positive".to_string(),
            ));
        }
        self.config.write().voting_duration_secs = duration_secs;
        info!(duration_secs, "voting duration updated");
        Ok(())
    }

    pub fn set_min_stake(&self, caller: &str, min_stake: u64) -> VotingResult<()> {
        if caller != self.admin {
            return Err(VotingError::NotAdmin(caller.to_string()));
        }
        if min_stake == 0 {
            return Err(VotingError::InvalidConfig(
                "minimum stake must be positive".to_string(),
            ));
        }
        self.config.write().min_stake = min_stake;
        info!(min_stake, "minimum stake updated");
        Ok(())
    }
}
