//! Match Session Management
//!
//! One [`MatchSession`] per active match: the authoritative [`Match`], the
//! outbound channels of its human participants and the RNG used for CPU
//! moves. Sessions sit behind their own mutex so different matches never
//! contend; notifications are pushed while that mutex is held, which keeps
//! per-match delivery in commit order. Match channels are unbounded; only the
//! all-clients snapshots are best-effort.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::game::events::{GameEvent, GameEventData};
use crate::game::state::{Match, MatchId, PlayerId};
use crate::network::protocol::{RoundResult, ServerMessage};

/// Outbound channel of one connection for match notifications and replies.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// A match and the connections watching it.
pub struct MatchSession {
    game: Match,
    /// Human participants currently reachable.
    senders: BTreeMap<PlayerId, ClientSender>,
    rng: StdRng,
}

impl MatchSession {
    /// Wrap a match, seeding the CPU from OS entropy.
    pub fn new(game: Match) -> Self {
        Self::with_rng(game, StdRng::from_entropy())
    }

    /// Wrap a match with an explicit RNG.
    pub fn with_rng(game: Match, rng: StdRng) -> Self {
        Self {
            game,
            senders: BTreeMap::new(),
            rng,
        }
    }

    /// The match.
    pub fn game(&self) -> &Match {
        &self.game
    }

    /// The match and the CPU RNG, for transitions.
    pub fn game_and_rng(&mut self) -> (&mut Match, &mut StdRng) {
        (&mut self.game, &mut self.rng)
    }

    /// Mutable access to the match.
    pub fn game_mut(&mut self) -> &mut Match {
        &mut self.game
    }

    /// Route notifications for `player` to `sender`, replacing any previous
    /// channel. The CPU and non-participants are ignored.
    pub fn bind_sender(&mut self, player: PlayerId, sender: ClientSender) -> bool {
        if self.game.human_side_of(&player).is_none() {
            return false;
        }
        self.senders.insert(player, sender);
        true
    }

    /// Is `sender` the channel currently bound for `player`.
    pub fn is_bound_to(&self, player: &PlayerId, sender: &ClientSender) -> bool {
        self.senders
            .get(player)
            .map(|bound| bound.same_channel(sender))
            .unwrap_or(false)
    }

    /// Send to one participant.
    pub fn notify(&self, player: &PlayerId, message: ServerMessage) {
        let Some(sender) = self.senders.get(player) else {
            debug!("Player {} offline, dropping notification", player.short());
            return;
        };
        if sender.send(message).is_err() {
            warn!("Connection of {} closed, dropping notification for {}", player.short(), self.game.id().short());
        }
    }

    /// Send to every human participant.
    pub fn broadcast(&self, message: ServerMessage) {
        for player in self.game.human_participants() {
            self.notify(&player, message.clone());
        }
    }

    /// Turn committed events into notifications.
    pub fn publish(&self, events: &[GameEvent]) {
        for event in events {
            match &event.data {
                GameEventData::MatchCreated { kind, creator_id } => {
                    self.notify(creator_id, ServerMessage::MatchCreated {
                        match_id: event.match_id,
                        kind: *kind,
                    });
                }
                GameEventData::MatchStarted { participant_a, participant_b } => {
                    self.broadcast(ServerMessage::MatchStarted {
                        match_id: event.match_id,
                        kind: self.game.kind(),
                        participants: vec![*participant_a, *participant_b],
                    });
                }
                GameEventData::MoveAccepted { .. } => {}
                GameEventData::RoundResolved { move_a, move_b, outcome, score_a, score_b } => {
                    self.broadcast(ServerMessage::RoundResult(RoundResult {
                        match_id: event.match_id,
                        round: event.round,
                        p1_move: *move_a,
                        p2_move: *move_b,
                        score_a: *score_a,
                        score_b: *score_b,
                        round_winner: *outcome,
                    }));
                }
                GameEventData::MatchFinished { winner_id, reason } => {
                    self.broadcast(ServerMessage::MatchFinished {
                        match_id: event.match_id,
                        winner_id: *winner_id,
                        reason: *reason,
                    });
                }
            }
        }
    }
}

/// Shared handle to a session.
pub type SharedSession = Arc<Mutex<MatchSession>>;

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Manages all active sessions.
pub struct SessionManager {
    /// Active sessions.
    sessions: RwLock<BTreeMap<MatchId, SharedSession>>,
    /// Player to active match mapping.
    player_matches: RwLock<BTreeMap<PlayerId, MatchId>>,
}

impl SessionManager {
    /// Create new session manager.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            player_matches: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert a session and return its shared handle.
    pub async fn insert(&self, session: MatchSession) -> SharedSession {
        let id = session.game().id();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, shared.clone());
        shared
    }

    /// Get a session by match id.
    pub async fn get(&self, id: &MatchId) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Active match of a player.
    pub async fn player_match(&self, player_id: &PlayerId) -> Option<MatchId> {
        self.player_matches.read().await.get(player_id).copied()
    }

    /// Bind a player to a match. Returns whether the binding is new; fails
    /// with the current match if the player is bound elsewhere.
    pub async fn bind_player(&self, player_id: PlayerId, match_id: MatchId) -> Result<bool, MatchId> {
        let mut player_matches = self.player_matches.write().await;
        match player_matches.get(&player_id) {
            Some(current) if *current == match_id => Ok(false),
            Some(current) => Err(*current),
            None => {
                player_matches.insert(player_id, match_id);
                Ok(true)
            }
        }
    }

    /// Unbind a player, but only from `match_id`.
    pub async fn unbind_player(&self, player_id: &PlayerId, match_id: &MatchId) {
        let mut player_matches = self.player_matches.write().await;
        if player_matches.get(player_id) == Some(match_id) {
            player_matches.remove(player_id);
        }
    }

    /// Remove a session.
    pub async fn remove(&self, id: &MatchId) -> Option<SharedSession> {
        self.sessions.write().await.remove(id)
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
