//! Matchmaking Directory
//!
//! Human matches waiting for a second player, in the order they were opened.
//! Every change republishes the full list through the fan-out while the
//! directory lock is still held, so listeners never receive snapshots out of
//! order.

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::game::state::{MatchId, PlayerId, Rejection};
use crate::network::fanout::Fanout;
use crate::network::protocol::{OpenMatchInfo, ServerMessage};

/// A match open for joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenMatch {
    /// Match identifier.
    pub match_id: MatchId,
    /// Creator.
    pub creator_id: PlayerId,
    /// Creator display name.
    pub creator_name: String,
    /// When the match was opened.
    pub opened_at: DateTime<Utc>,
}

impl OpenMatch {
    fn info(&self) -> OpenMatchInfo {
        OpenMatchInfo {
            match_id: self.match_id,
            creator_id: self.creator_id,
            creator_username: self.creator_name.clone(),
        }
    }
}

/// Directory of open matches.
pub struct MatchDirectory {
    open: RwLock<Vec<OpenMatch>>,
    fanout: Fanout,
}

impl MatchDirectory {
    /// Create an empty directory publishing to `fanout`.
    pub fn new(fanout: Fanout) -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            fanout,
        }
    }

    /// List a match. Registering the same id twice is a no-op.
    pub async fn register(&self, entry: OpenMatch) {
        let mut open = self.open.write().await;
        if open.iter().any(|e| e.match_id == entry.match_id) {
            return;
        }
        debug!("Match {} open by {}", entry.match_id.short(), entry.creator_id.short());
        open.push(entry);
        self.publish(&open);
    }

    /// Remove a match from the listing. Returns whether it was listed.
    pub async fn deregister(&self, match_id: &MatchId) -> bool {
        let mut open = self.open.write().await;
        let before = open.len();
        open.retain(|e| e.match_id != *match_id);

        let removed = open.len() != before;
        if removed {
            self.publish(&open);
        }
        removed
    }

    /// Claim an open match for `joiner`.
    ///
    /// The entry is removed in the same critical section that finds it, so
    /// of several concurrent claims at most one succeeds. A creator claiming
    /// their own match is refused and the entry stays listed.
    pub async fn claim(&self, match_id: &MatchId, joiner: PlayerId) -> Result<OpenMatch, Rejection> {
        let mut open = self.open.write().await;
        let pos = open
            .iter()
            .position(|e| e.match_id == *match_id)
            .ok_or(Rejection::NotWaiting)?;

        if open[pos].creator_id == joiner {
            return Err(Rejection::SelfJoin);
        }

        let entry = open.remove(pos);
        self.publish(&open);
        Ok(entry)
    }

    /// Snapshot of open matches, oldest first.
    pub async fn list_open(&self) -> Vec<OpenMatchInfo> {
        self.open.read().await.iter().map(OpenMatch::info).collect()
    }

    /// Matches opened before `cutoff`.
    pub async fn opened_before(&self, cutoff: DateTime<Utc>) -> Vec<OpenMatch> {
        self.open
            .read()
            .await
            .iter()
            .filter(|e| e.opened_at < cutoff)
            .cloned()
            .collect()
    }

    /// Number of open matches.
    pub async fn len(&self) -> usize {
        self.open.read().await.len()
    }

    /// Is the directory empty.
    pub async fn is_empty(&self) -> bool {
        self.open.read().await.is_empty()
    }

    fn publish(&self, open: &[OpenMatch]) {
        self.fanout.publish(ServerMessage::OpenMatches {
            matches: open.iter().map(OpenMatch::info).collect(),
        });
    }
}
