//! Match Coordinator
//!
//! Entry point for every match operation. Owns the session table, the
//! matchmaking directory and the record writer, and wires them together:
//!
//! - create/join/move/abandon lock only the affected session;
//! - notifications go out under that lock, derived from committed events;
//! - store writes are queued after the lock is released;
//! - finished sessions are torn down and handed to the ranking side.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::game::events::GameEvent;
use crate::game::moves::Move;
use crate::game::state::{
    CompletedMatch, FinishReason, Match, MatchId, MatchKind, PlayerId, Rejection,
};
use crate::network::auth::{AuthError, Identity};
use crate::network::directory::{MatchDirectory, OpenMatch};
use crate::network::fanout::Fanout;
use crate::network::protocol::ServerMessage;
use crate::network::session::{ClientSender, MatchSession, SessionManager};
use crate::ranking::{RankingAggregator, LEADERBOARD_SIZE};
use crate::store::{
    spawn_record_writer, GameStore, MatchRecord, NewUser, RecordWriter, RetryPolicy, StoreError,
};

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Waiting matches older than this are discarded. Zero disables.
    pub waiting_timeout: Duration,
    /// How often the reaper looks for stale waiting matches.
    pub reap_interval: Duration,
    /// Leaderboard rows.
    pub leaderboard_size: usize,
    /// Store write retries.
    pub persist: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            waiting_timeout: Duration::from_secs(600),
            reap_interval: Duration::from_secs(30),
            leaderboard_size: LEADERBOARD_SIZE,
            persist: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            waiting_timeout: env_parse("WAITING_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.waiting_timeout),
            reap_interval: env_parse("REAP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reap_interval),
            leaderboard_size: env_parse("LEADERBOARD_SIZE").unwrap_or(defaults.leaderboard_size),
            persist: RetryPolicy {
                max_attempts: env_parse("PERSIST_MAX_ATTEMPTS").unwrap_or(defaults.persist.max_attempts),
                backoff: env_parse("PERSIST_RETRY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.persist.backoff),
            },
        }
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Why a match operation was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// Unknown match id.
    #[error("match {0} not found")]
    NotFound(MatchId),

    /// The match refused the transition.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The player is already in another active match.
    #[error("player already in match {0}")]
    AlreadyInMatch(MatchId),
}

/// State gathered under the session lock for teardown after it.
struct Finished {
    match_id: MatchId,
    players: Vec<PlayerId>,
    record: MatchRecord,
    completion: Option<CompletedMatch>,
}

impl Finished {
    fn of(game: &Match) -> Option<Self> {
        if !game.is_finished() {
            return None;
        }
        Some(Self {
            match_id: game.id(),
            players: game.human_participants(),
            record: MatchRecord::from_match(game),
            completion: game.completion(),
        })
    }
}

/// Runs every match on the server.
pub struct MatchCoordinator {
    config: CoordinatorConfig,
    sessions: SessionManager,
    directory: MatchDirectory,
    ranking: Arc<RankingAggregator>,
    records: RecordWriter,
    store: Arc<dyn GameStore>,
    fanout: Fanout,
}

impl MatchCoordinator {
    /// Create a coordinator and start its record writer.
    ///
    /// Must be called inside a Tokio runtime. The returned handle completes
    /// once the coordinator is dropped and pending writes are drained.
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn GameStore>,
        fanout: Fanout,
    ) -> (Self, JoinHandle<()>) {
        let ranking = Arc::new(RankingAggregator::new(
            store.clone(),
            fanout.clone(),
            config.leaderboard_size,
        ));
        let (records, writer) = spawn_record_writer(store.clone(), ranking.clone(), config.persist);

        let coordinator = Self {
            config,
            sessions: SessionManager::new(),
            directory: MatchDirectory::new(fanout.clone()),
            ranking,
            records,
            store,
            fanout,
        };
        (coordinator, writer)
    }

    /// Broadcast channel for all-clients snapshots.
    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    /// The matchmaking directory.
    pub fn directory(&self) -> &MatchDirectory {
        &self.directory
    }

    /// Number of matches in memory.
    pub async fn active_matches(&self) -> usize {
        self.sessions.session_count().await
    }

    /// Active match of a player.
    pub async fn player_match(&self, player: &PlayerId) -> Option<MatchId> {
        self.sessions.player_match(player).await
    }

    /// Wait for queued store writes to land.
    pub async fn flush(&self) {
        self.records.flush().await;
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Make sure the authenticated player has a stats row.
    ///
    /// A name held by another player is an authentication failure, including
    /// when another connection registers it first. Store outages are logged
    /// and the player is let in without a stats row.
    pub async fn admit(&self, identity: &Identity) -> Result<(), AuthError> {
        let name = &identity.display_name;
        match self.store.find_user_by_name(name).await {
            Ok(Some(user)) if user.player_id != identity.player_id => {
                Err(AuthError::NameTaken(name.clone()))
            }
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                let new_user = NewUser {
                    player_id: identity.player_id,
                    username: name.clone(),
                };
                match self.store.create_user(new_user).await {
                    Ok(_) => {
                        info!("Registered player {} as {}", identity.player_id.short(), name);
                        Ok(())
                    }
                    Err(StoreError::Conflict(_)) => self.recheck_name(identity).await,
                    Err(e) => {
                        warn!("Could not register {}: {}", identity.player_id.short(), e);
                        Ok(())
                    }
                }
            }
            Err(e) => {
                warn!("User lookup for {} failed: {}", identity.player_id.short(), e);
                Ok(())
            }
        }
    }

    /// Registration hit a unique constraint: find out whose name it is.
    async fn recheck_name(&self, identity: &Identity) -> Result<(), AuthError> {
        let name = &identity.display_name;
        match self.store.find_user_by_name(name).await {
            Ok(Some(user)) if user.player_id != identity.player_id => {
                Err(AuthError::NameTaken(name.clone()))
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("User lookup for {} failed: {}", identity.player_id.short(), e);
                Err(AuthError::NameTaken(name.clone()))
            }
        }
    }

    /// Snapshots a freshly authenticated connection starts with.
    pub async fn welcome(&self) -> Vec<ServerMessage> {
        let matches = self.directory.list_open().await;
        let entries = match self.ranking.leaderboard().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Leaderboard unavailable: {}", e);
                Vec::new()
            }
        };
        vec![
            ServerMessage::OpenMatches { matches },
            ServerMessage::Leaderboard { entries },
        ]
    }

    /// Route a player's active match notifications to a new connection.
    pub async fn attach(&self, player: PlayerId, sender: &ClientSender) {
        let Some(match_id) = self.sessions.player_match(&player).await else {
            return;
        };
        if let Some(shared) = self.sessions.get(&match_id).await {
            let mut session = shared.lock().await;
            if session.bind_sender(player, sender.clone()) {
                debug!("Reattached {} to match {}", player.short(), match_id.short());
            }
        }
    }

    /// A connection went away. If it is the one bound to the player's match,
    /// the player abandons that match.
    pub async fn disconnect(&self, player: PlayerId, sender: &ClientSender) {
        let Some(match_id) = self.sessions.player_match(&player).await else {
            return;
        };
        let Some(shared) = self.sessions.get(&match_id).await else {
            return;
        };

        let finished = {
            let mut session = shared.lock().await;
            if !session.is_bound_to(&player, sender) {
                return;
            }
            match session.game_mut().abandon(player) {
                Ok(events) => self.commit(&mut session, &events).await,
                Err(e) => {
                    debug!("Disconnect of {} left {} untouched: {}", player.short(), match_id.short(), e);
                    None
                }
            }
        };

        if let Some(finished) = finished {
            info!("Player {} disconnected from match {}", player.short(), match_id.short());
            self.teardown(finished).await;
        }
    }

    // =========================================================================
    // Match operations
    // =========================================================================

    /// Open a match for `creator`.
    #[instrument(skip_all, fields(player = %creator.short(), kind = ?kind))]
    pub async fn create_match(
        &self,
        creator: PlayerId,
        creator_name: &str,
        kind: MatchKind,
        sender: &ClientSender,
    ) -> Result<MatchId, MatchError> {
        let (game, events) = Match::create(kind, creator);
        let match_id = game.id();

        self.sessions
            .bind_player(creator, match_id)
            .await
            .map_err(MatchError::AlreadyInMatch)?;

        let mut session = MatchSession::new(game);
        session.bind_sender(creator, sender.clone());
        session.publish(&events);

        let record = MatchRecord::from_match(session.game());
        let opened_at = session.game().created_at();
        self.sessions.insert(session).await;
        self.records.create(record);

        if kind == MatchKind::HumanVsHuman {
            self.directory
                .register(OpenMatch {
                    match_id,
                    creator_id: creator,
                    creator_name: creator_name.to_string(),
                    opened_at,
                })
                .await;
        }

        info!("Match {} created ({:?})", match_id.short(), kind);
        Ok(match_id)
    }

    /// Take the second seat of a waiting match.
    #[instrument(skip_all, fields(player = %joiner.short(), game = %match_id.short()))]
    pub async fn join_match(
        &self,
        joiner: PlayerId,
        match_id: MatchId,
        sender: &ClientSender,
    ) -> Result<(), MatchError> {
        let newly_bound = self
            .sessions
            .bind_player(joiner, match_id)
            .await
            .map_err(MatchError::AlreadyInMatch)?;

        let result = self.seat_joiner(joiner, match_id, sender).await;
        if result.is_err() && newly_bound {
            self.sessions.unbind_player(&joiner, &match_id).await;
        }
        result
    }

    async fn seat_joiner(
        &self,
        joiner: PlayerId,
        match_id: MatchId,
        sender: &ClientSender,
    ) -> Result<(), MatchError> {
        self.directory.claim(&match_id, joiner).await?;

        let shared = self
            .sessions
            .get(&match_id)
            .await
            .ok_or(MatchError::NotFound(match_id))?;

        let record = {
            let mut session = shared.lock().await;
            let events = session.game_mut().join(joiner)?;
            session.bind_sender(joiner, sender.clone());
            session.publish(&events);
            MatchRecord::from_match(session.game())
        };
        self.records.update(record);

        info!("Match {} started", match_id.short());
        Ok(())
    }

    /// Play a move.
    pub async fn submit_move(
        &self,
        player: PlayerId,
        match_id: MatchId,
        mv: Move,
        round: Option<u32>,
    ) -> Result<(), MatchError> {
        let shared = self
            .sessions
            .get(&match_id)
            .await
            .ok_or(MatchError::NotFound(match_id))?;

        let finished = {
            let mut session = shared.lock().await;
            let (game, rng) = session.game_and_rng();
            let events = game.submit_move(player, mv, round, rng)?;
            self.commit(&mut session, &events).await
        };

        if let Some(finished) = finished {
            self.teardown(finished).await;
        }
        Ok(())
    }

    /// Leave a match.
    pub async fn abandon_match(&self, player: PlayerId, match_id: MatchId) -> Result<(), MatchError> {
        let shared = self
            .sessions
            .get(&match_id)
            .await
            .ok_or(MatchError::NotFound(match_id))?;

        let finished = {
            let mut session = shared.lock().await;
            let events = session.game_mut().abandon(player)?;
            self.commit(&mut session, &events).await
        };

        if let Some(finished) = finished {
            info!("Player {} left match {}", player.short(), match_id.short());
            self.teardown(finished).await;
        }
        Ok(())
    }

    // =========================================================================
    // Waiting match upkeep
    // =========================================================================

    /// Discard waiting matches older than the configured timeout.
    pub async fn reap_waiting(&self) -> usize {
        if self.config.waiting_timeout.is_zero() {
            return 0;
        }
        let Ok(timeout) = chrono::Duration::from_std(self.config.waiting_timeout) else {
            return 0;
        };
        let cutoff = Utc::now() - timeout;

        let mut reaped = 0;
        for open in self.directory.opened_before(cutoff).await {
            let Some(shared) = self.sessions.get(&open.match_id).await else {
                self.directory.deregister(&open.match_id).await;
                continue;
            };

            let finished = {
                let mut session = shared.lock().await;
                match session.game_mut().expire() {
                    Ok(events) => self.commit(&mut session, &events).await,
                    Err(_) => None,
                }
            };

            if let Some(finished) = finished {
                info!("Match {} expired without opponent", open.match_id.short());
                self.teardown(finished).await;
                reaped += 1;
            }
        }
        reaped
    }

    /// Periodically reap stale waiting matches until shutdown.
    pub async fn run_reaper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.reap_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reaped = self.reap_waiting().await;
                    if reaped > 0 {
                        debug!("Reaped {} waiting matches", reaped);
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Reaper stopping");
                    break;
                }
            }
        }
    }

    /// Rebuild waiting matches from the store after a restart.
    pub async fn restore_open_matches(&self) -> Result<usize, StoreError> {
        let stored = self.store.find_open_matches().await?;

        let mut restored = 0;
        for open in stored {
            if self.sessions.get(&open.match_id).await.is_some() {
                continue;
            }
            if self.sessions.bind_player(open.creator_id, open.match_id).await.is_err() {
                warn!("Skipping stored match {}: creator busy", open.match_id.short());
                continue;
            }

            let game = Match::restore_waiting(open.match_id, open.creator_id, open.created_at);
            self.sessions.insert(MatchSession::new(game)).await;
            self.directory
                .register(OpenMatch {
                    match_id: open.match_id,
                    creator_id: open.creator_id,
                    creator_name: open.creator_username,
                    opened_at: open.created_at,
                })
                .await;
            restored += 1;
        }

        if restored > 0 {
            info!("Restored {} open matches", restored);
        }
        Ok(restored)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Push notifications for committed events. Runs under the session lock.
    ///
    /// Returns the teardown state when these events finished the match.
    async fn commit(&self, session: &mut MatchSession, events: &[GameEvent]) -> Option<Finished> {
        if events.is_empty() {
            return None;
        }
        session.publish(events);

        let finished = Finished::of(session.game())?;
        if session.game().finish_reason() == Some(FinishReason::Discarded) {
            self.directory.deregister(&finished.match_id).await;
        }
        Some(finished)
    }

    async fn teardown(&self, finished: Finished) {
        self.sessions.remove(&finished.match_id).await;
        for player in &finished.players {
            self.sessions.unbind_player(player, &finished.match_id).await;
        }

        match finished.completion {
            Some(completion) => self.records.completed(finished.record, completion),
            None => self.records.delete(finished.match_id),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
