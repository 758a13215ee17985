//! In-Memory Store
//!
//! `GameStore` backed by ordered maps. Used by the binary when no external
//! store is wired in, and by tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::game::state::{MatchId, MatchKind, MatchStatus, PlayerId};
use crate::store::{
    GameStore, LeaderboardEntry, MatchRecord, NewUser, OpenMatchRecord, StoreError, UserRecord,
};

/// In-memory implementation of [`GameStore`].
#[derive(Default)]
pub struct InMemoryStore {
    users: RwLock<BTreeMap<PlayerId, UserRecord>>,
    matches: RwLock<BTreeMap<MatchId, MatchRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unavailable` (or stop doing so).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fetch a match record.
    pub async fn match_record(&self, match_id: &MatchId) -> Option<MatchRecord> {
        self.matches.read().await.get(match_id).cloned()
    }

    /// Number of stored match records.
    pub async fn match_count(&self) -> usize {
        self.matches.read().await.len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GameStore for InMemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        self.check()?;
        let mut users = self.users.write().await;

        if users.contains_key(&user.player_id) {
            return Err(StoreError::Conflict(format!("player {} exists", user.player_id)));
        }
        if users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!("username {} taken", user.username)));
        }

        let record = UserRecord {
            player_id: user.player_id,
            username: user.username,
            games_played: 0,
            games_won: 0,
            created_at: Utc::now(),
        };
        users.insert(record.player_id, record.clone());
        Ok(record)
    }

    async fn find_user(&self, player_id: &PlayerId) -> Result<Option<UserRecord>, StoreError> {
        self.check()?;
        Ok(self.users.read().await.get(player_id).cloned())
    }

    async fn find_user_by_name(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        self.check()?;
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn increment_stats(&self, player_id: &PlayerId, won: bool) -> Result<(), StoreError> {
        self.check()?;
        let mut users = self.users.write().await;
        let user = users
            .get_mut(player_id)
            .ok_or_else(|| StoreError::NotFound(format!("player {}", player_id)))?;

        user.games_played += 1;
        if won {
            user.games_won += 1;
        }
        Ok(())
    }

    async fn top_users_by_wins(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError> {
        self.check()?;
        let users = self.users.read().await;

        let mut ranked: Vec<&UserRecord> = users.values().collect();
        ranked.sort_by(|a, b| {
            b.games_won
                .cmp(&a.games_won)
                .then(a.username.cmp(&b.username))
        });

        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|u| LeaderboardEntry {
                username: u.username.clone(),
                wins: u.games_won,
                games_played: u.games_played,
            })
            .collect())
    }

    async fn create_match_record(&self, record: MatchRecord) -> Result<(), StoreError> {
        self.check()?;
        self.matches
            .write()
            .await
            .entry(record.match_id)
            .or_insert(record);
        Ok(())
    }

    async fn update_match_record(&self, record: MatchRecord) -> Result<(), StoreError> {
        self.check()?;
        self.matches.write().await.insert(record.match_id, record);
        Ok(())
    }

    async fn delete_match_record(&self, match_id: &MatchId) -> Result<(), StoreError> {
        self.check()?;
        self.matches.write().await.remove(match_id);
        Ok(())
    }

    async fn find_open_matches(&self) -> Result<Vec<OpenMatchRecord>, StoreError> {
        self.check()?;
        let matches = self.matches.read().await;
        let users = self.users.read().await;

        let mut open: Vec<OpenMatchRecord> = matches
            .values()
            .filter(|m| m.status == MatchStatus::Waiting && m.kind == MatchKind::HumanVsHuman)
            .map(|m| OpenMatchRecord {
                match_id: m.match_id,
                creator_id: m.player_a,
                creator_username: users
                    .get(&m.player_a)
                    .map(|u| u.username.clone())
                    .unwrap_or_else(|| m.player_a.short()),
                created_at: m.created_at,
            })
            .collect();
        open.sort_by_key(|m| m.created_at);
        Ok(open)
    }
}
