//! Ranking Aggregator
//!
//! Turns completed matches into win/loss counters and republishes the
//! leaderboard. Completion facts may arrive more than once; each
//! (match, player) increment is applied at most once per process.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::game::state::{CompletedMatch, MatchId, PlayerId};
use crate::network::fanout::Fanout;
use crate::network::protocol::ServerMessage;
use crate::store::{GameStore, LeaderboardEntry, StoreError};

/// Default number of leaderboard rows.
pub const LEADERBOARD_SIZE: usize = 10;

/// How many applied increments are remembered for deduplication.
const APPLIED_CAPACITY: usize = 8192;

#[derive(Default)]
struct AppliedLog {
    seen: BTreeSet<(MatchId, PlayerId)>,
    order: VecDeque<(MatchId, PlayerId)>,
}

impl AppliedLog {
    fn contains(&self, key: &(MatchId, PlayerId)) -> bool {
        self.seen.contains(key)
    }

    fn insert(&mut self, key: (MatchId, PlayerId)) {
        if self.seen.insert(key) {
            self.order.push_back(key);
            if self.order.len() > APPLIED_CAPACITY {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
    }
}

/// Applies completed matches to player stats.
pub struct RankingAggregator {
    store: Arc<dyn GameStore>,
    fanout: Fanout,
    leaderboard_size: usize,
    applied: Mutex<AppliedLog>,
}

impl RankingAggregator {
    /// Create an aggregator.
    pub fn new(store: Arc<dyn GameStore>, fanout: Fanout, leaderboard_size: usize) -> Self {
        Self {
            store,
            fanout,
            leaderboard_size,
            applied: Mutex::new(AppliedLog::default()),
        }
    }

    /// Apply the stat increments of a completed match.
    ///
    /// Returns how many increments were newly applied. On error the
    /// increments already applied stay recorded, so a retry only redoes the
    /// missing ones. A player without a stats row is skipped.
    pub async fn record(&self, completed: &CompletedMatch) -> Result<usize, StoreError> {
        let mut applied = self.applied.lock().await;
        let mut count = 0;

        for (player_id, won) in completed.stat_updates() {
            let key = (completed.match_id, player_id);
            if applied.contains(&key) {
                debug!("Skipping duplicate stat update for {} in {}", player_id.short(), completed.match_id.short());
                continue;
            }
            match self.store.increment_stats(&player_id, won).await {
                Ok(()) => count += 1,
                Err(StoreError::NotFound(_)) => {
                    warn!("No stats row for {}, skipping match {}", player_id.short(), completed.match_id.short());
                }
                Err(e) => return Err(e),
            }
            applied.insert(key);
        }

        if count > 0 {
            info!(
                "Recorded match {} ({:?}): winner {}",
                completed.match_id.short(),
                completed.reason,
                completed.winner_id.map(|w| w.short()).unwrap_or_else(|| "none".into()),
            );
        }
        Ok(count)
    }

    /// Current leaderboard.
    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, StoreError> {
        self.store.top_users_by_wins(self.leaderboard_size).await
    }

    /// Recompute the leaderboard and push it to every client.
    pub async fn publish_leaderboard(&self) -> Result<(), StoreError> {
        let entries = self.leaderboard().await?;
        self.fanout.publish(ServerMessage::Leaderboard { entries });
        Ok(())
    }
}
