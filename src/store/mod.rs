//! Durable Store Interface
//!
//! Users, their win/loss counters and match records live outside the
//! server. The core talks to them through [`GameStore`] and only ever gets
//! plain records back.
//!
//! Writes issued by the match layer go through the [`writer`] task so that no
//! store call runs while a match is locked.

pub mod memory;
pub mod writer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::state::{Match, MatchId, MatchKind, MatchStatus, PlayerId};

pub use memory::InMemoryStore;
pub use writer::{spawn_record_writer, RecordWriter, RetryPolicy};

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Can the same call succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// A registered player and their counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Unique display name.
    pub username: String,
    /// Finished matches.
    pub games_played: u32,
    /// Won matches.
    pub games_won: u32,
    /// First seen.
    pub created_at: DateTime<Utc>,
}

/// Input for [`GameStore::create_user`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Display name.
    pub username: String,
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Display name.
    pub username: String,
    /// Won matches.
    pub wins: u32,
    /// Finished matches.
    pub games_played: u32,
}

/// Persisted view of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Match identifier.
    pub match_id: MatchId,
    /// Match kind.
    pub kind: MatchKind,
    /// Lifecycle status.
    pub status: MatchStatus,
    /// Creator.
    pub player_a: PlayerId,
    /// Joiner or CPU.
    pub player_b: Option<PlayerId>,
    /// Winner once finished.
    pub winner_id: Option<PlayerId>,
    /// Score of A.
    pub score_a: u32,
    /// Score of B.
    pub score_b: u32,
    /// Current round generation.
    pub round: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Finish time.
    pub finished_at: Option<DateTime<Utc>>,
}

impl MatchRecord {
    /// Snapshot a match.
    pub fn from_match(m: &Match) -> Self {
        let (score_a, score_b) = m.scores();
        Self {
            match_id: m.id(),
            kind: m.kind(),
            status: m.status(),
            player_a: m.participant_a(),
            player_b: m.participant_b(),
            winner_id: m.winner(),
            score_a,
            score_b,
            round: m.round(),
            created_at: m.created_at(),
            finished_at: m.finished_at(),
        }
    }
}

/// A waiting human match joined with its creator's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenMatchRecord {
    /// Match identifier.
    pub match_id: MatchId,
    /// Creator.
    pub creator_id: PlayerId,
    /// Creator display name.
    pub creator_username: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Durable storage for users and match records.
///
/// `create_match_record` is insert-if-absent and `update_match_record` is an
/// upsert, so replaying a write after a lost acknowledgement is harmless.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Register a player. Fails with `Conflict` if the name is taken.
    async fn create_user(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    /// Look a player up by id.
    async fn find_user(&self, player_id: &PlayerId) -> Result<Option<UserRecord>, StoreError>;

    /// Look a player up by display name.
    async fn find_user_by_name(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Count one finished match for a player.
    async fn increment_stats(&self, player_id: &PlayerId, won: bool) -> Result<(), StoreError>;

    /// Players with the most wins, best first.
    async fn top_users_by_wins(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, StoreError>;

    /// Persist a new match.
    async fn create_match_record(&self, record: MatchRecord) -> Result<(), StoreError>;

    /// Overwrite a match record.
    async fn update_match_record(&self, record: MatchRecord) -> Result<(), StoreError>;

    /// Drop a match record.
    async fn delete_match_record(&self, match_id: &MatchId) -> Result<(), StoreError>;

    /// Waiting human matches, oldest first.
    async fn find_open_matches(&self) -> Result<Vec<OpenMatchRecord>, StoreError>;
}
