// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Grantpool Protocol Foundation

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::clock::Clock;
use crate::error::ErrorKind;

/// Lifecycle status of a proposal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalStatus {
    /// Submitted, not yet part of a round.
    Pending,
    /// Member of a round with voting in progress.
    Voting,
    /// Won its round's vote, awaiting finalization.
    WonVoting,
    /// Paid out by the custody pool.
    Funded,
    /// Dropped from consideration.
    Rejected,
    /// Work delivered and accepted.
    Completed,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalStatus::Pending => write!(f, "pending"),
            ProposalStatus::Voting => write!(f, "voting"),
            ProposalStatus::WonVoting => write!(f, "won_voting"),
            ProposalStatus::Funded => write!(f, "funded"),
            ProposalStatus::Rejected => write!(f, "rejected"),
            ProposalStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A community proposal as stored by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub id: u64,
    pub author: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
    /// Admin-adjustable counter, independent of round tallies.
    pub vote_count: u64,
    pub status: ProposalStatus,
}

/// Registry error types
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown proposal id: {0}")]
    UnknownProposal(u64),

    #[error("the null identity cannot author a proposal")]
    NullAuthor,

    #[error("caller {0} is not an authorized updater")]
    NotAuthorized(String),

    #[error("caller {0} is not the registry administrator")]
    NotAdmin(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::UnknownProposal(_) | RegistryError::NullAuthor => ErrorKind::Validation,
            RegistryError::NotAuthorized(_) | RegistryError::NotAdmin(_) => {
                ErrorKind::Authorization
            }
        }
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Durable store of proposal records and lifecycle status.
///
/// Ids are positive, monotonically assigned, never reused; records are
/// never deleted. A proposal id is valid iff `0 < id < next_id`.
pub trait ProposalRegistry: Send + Sync {
    /// Store a new proposal authored by the caller, in status
    /// `Pending`, and return its id.
    fn create(&self, caller: &str, title: &str, description: &str, link: &str)
        -> RegistryResult<u64>;

    fn get_record(&self, id: u64) -> RegistryResult<ProposalRecord>;

    fn get_author(&self, id: u64) -> RegistryResult<String>;

    /// Restricted to the designated orchestrator or an authorized
    /// updater.
    fn update_status(&self, caller: &str, id: u64, status: ProposalStatus) -> RegistryResult<()>;

    /// Overwrite the admin-adjustable vote counter. Restricted like
    /// `update_status`.
    fn set_vote_count(&self, caller: &str, id: u64, count: u64) -> RegistryResult<()>;

    /// Grant or revoke updater rights. Administrator only.
    fn authorize_updater(&self, caller: &str, identity: &str, enabled: bool) -> RegistryResult<()>;
}

#[derive(Debug, Default)]
struct RegistryState {
    proposals: HashMap<u64, ProposalRecord>,
    next_id: u64,
    updaters: HashSet<String>,
}

/// In-memory proposal store.
pub struct InMemoryProposalRegistry {
    state: RwLock<RegistryState>,
    orchestrator: String,
    admin: String,
    clock: Arc<dyn Clock>,
}

impl InMemoryProposalRegistry {
    pub fn new(
        orchestrator: impl Into<String>,
        admin: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                proposals: HashMap::new(),
                next_id: 1,
                updaters: HashSet::new(),
            }),
            orchestrator: orchestrator.into(),
            admin: admin.into(),
            clock,
        }
    }

    fn check_updater(&self, state: &RegistryState, caller: &str) -> RegistryResult<()> {
        if caller == self.orchestrator || state.updaters.contains(caller) {
            Ok(())
        } else {
            Err(RegistryError::NotAuthorized(caller.to_string()))
        }
    }
}

impl ProposalRegistry for InMemoryProposalRegistry {
    fn create(
        &self,
        caller: &str,
        title: &str,
        description: &str,
        link: &str,
    ) -> RegistryResult<u64> {
        if caller.is_empty() {
            return Err(RegistryError::NullAuthor);
        }
        let mut state = self.state.write();
        let id = state.next_id;
        state.next_id += 1;
        state.proposals.insert(
            id,
            ProposalRecord {
                id,
                author: caller.to_string(),
                title: title.to_string(),
                description: description.to_string(),
                link: link.to_string(),
                created_at: self.clock.now(),
                vote_count: 0,
                status: ProposalStatus::Pending,
            },
        );
        info!(id, author = caller, "proposal created");
        Ok(id)
    }

    fn get_record(&self, id: u64) -> RegistryResult<ProposalRecord> {
        self.state
            .read()
            .proposals
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnknownProposal(id))
    }

    fn get_author(&self, id: u64) -> RegistryResult<String> {
        self.get_record(id).map(|record| record.author)
    }

    fn update_status(&self, caller: &str, id: u64, status: ProposalStatus) -> RegistryResult<()> {
        let mut state = self.state.write();
        self.check_updater(&state, caller)?;
        let record = state
            .proposals
            .get_mut(&id)
            .ok_or(RegistryError::UnknownProposal(id))?;
        let previous = record.status;
        record.status = status;
        info!(id, %previous, %status, "proposal status updated");
        Ok(())
    }

    fn set_vote_count(&self, caller: &str, id: u64, count: u64) -> RegistryResult<()> {
        let mut state = self.state.write();
        self.check_updater(&state, caller)?;
        let record = state
            .proposals
            .get_mut(&id)
            .ok_or(RegistryError::UnknownProposal(id))?;
        record.vote_count = count;
        Ok(())
    }

    fn authorize_updater(&self, caller: &str, identity: &str, enabled: bool) -> RegistryResult<()> {
        if caller != self.admin {
            return Err(RegistryError::NotAdmin(caller.to_string()));
        }
        let mut state = self.state.write();
        if enabled {
            state.updaters.insert(identity.to_string());
        } else {
            state.updaters.remove(identity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    const ORCHESTRATOR: &str = "orchestrator";
    const ADMIN: &str = "admin";

    fn registry() -> InMemoryProposalRegistry {
        InMemoryProposalRegistry::new(ORCHESTRATOR, ADMIN, Arc::new(SystemClock))
    }

    #[test]
    fn ids_are_monotonic_from_one() {
        let registry = registry();
        let first = registry.create("alice", "Park benches", "", "").unwrap();
        let second = registry.create("bob", "Mural", "", "").unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(registry.get_author(1).unwrap(), "alice");
        assert_eq!(
            registry.get_record(2).unwrap().status,
            ProposalStatus::Pending
        );
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.get_record(1),
            Err(RegistryError::UnknownProposal(1))
        ));
    }

    #[test]
    fn status_updates_require_authorization() {
        let registry = registry();
        let id = registry.create("alice", "Park benches", "", "").unwrap();

        let err = registry
            .update_status("mallory", id, ProposalStatus::Funded)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        registry
            .update_status(ORCHESTRATOR, id, ProposalStatus::Voting)
            .unwrap();
        assert_eq!(
            registry.get_record(id).unwrap().status,
            ProposalStatus::Voting
        );
    }

    #[test]
    fn authorized_updater_can_adjust_vote_count() {
        let registry = registry();
        let id = registry.create("alice", "Park benches", "", "").unwrap();

        registry.authorize_updater(ADMIN, "moderator", true).unwrap();
        registry.set_vote_count("moderator", id, 42).unwrap();
        assert_eq!(registry.get_record(id).unwrap().vote_count, 42);

        registry.authorize_updater(ADMIN, "moderator", false).unwrap();
        assert!(registry.set_vote_count("moderator", id, 0).is_err());
    }

    #[test]
    fn only_admin_grants_updater_rights() {
        let registry = registry();
        let err = registry
            .authorize_updater("mallory", "mallory", true)
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotAdmin(_)));
    }
}
