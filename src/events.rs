// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Grantpool Protocol Foundation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// One notification is published per completed state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GrantEvent {
    /// A voting round was opened with its fixed proposal set.
    RoundOpened {
        round_id: u64,
        proposal_ids: Vec<u64>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// A voter staked on a proposal.
    VoteCast {
        round_id: u64,
        proposal_id: u64,
        voter: String,
        amount: u64,
    },
    /// A round was closed and its winner resolved (0 = no winner).
    RoundClosed {
        round_id: u64,
        winner: u64,
        winner_votes: u64,
        total_votes: u64,
    },
    /// A grant round was locked in for distribution.
    RoundFinalized {
        round_id: u64,
        winner: u64,
        finalized_at: DateTime<Utc>,
    },
    /// The custody pool paid the winning proposal's author.
    FundsDistributed {
        round_id: u64,
        proposal_id: u64,
        recipient: String,
        amount: u64,
    },
    /// A donor deposited into the custody pool.
    DepositReceived {
        donor: String,
        amount: u64,
        donor_total: u64,
    },
    /// The tracked pool balance moved.
    PoolBalanceChanged { balance: u64, change: i64 },
}

/// Envelope carrying an event to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantNotification {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: GrantEvent,
}

/// Broadcast fan-out for lifecycle notifications.
///
/// Publishing never fails: with no subscribers the notification is
/// dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GrantNotification>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GrantNotification> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: GrantEvent) {
        let notification = GrantNotification {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        };
        if self.sender.send(notification).is_err() {
            debug!("notification dropped: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(GrantEvent::PoolBalanceChanged {
            balance: 900,
            change: -100,
        });

        let notification = rx.try_recv().unwrap();
        assert_eq!(
            notification.event,
            GrantEvent::PoolBalanceChanged {
                balance: 900,
                change: -100,
            }
        );
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.publish(GrantEvent::RoundFinalized {
            round_id: 1,
            winner: 2,
            finalized_at: Utc::now(),
        });
    }

    #[test]
    fn notifications_serialize_with_event_payload() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(GrantEvent::VoteCast {
            round_id: 3,
            proposal_id: 7,
            voter: "alice".to_string(),
            amount: 500,
        });

        let notification = rx.try_recv().unwrap();
        let json = serde_json::to_string(&notification).unwrap();
        assert!(json.contains("VoteCast"));
        assert!(json.contains("\"amount\":500"));
    }
}
