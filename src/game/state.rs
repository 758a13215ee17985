//! Match State
//!
//! The authoritative record of one match and its transition rules.
//! Every mutation goes through a method here and returns the events it
//! produced; a rejected call leaves the match untouched.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};
use thiserror::Error;

use crate::WIN_THRESHOLD;
use crate::game::events::GameEvent;
use crate::game::moves::{resolve, Move, RoundOutcome};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique player identifier (UUID as bytes).
///
/// On the wire and in records it is rendered as a UUID string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Synthetic identity of the CPU opponent.
    pub const BOT: PlayerId = PlayerId(*b"rps-arena:cpu-01");

    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Derive a stable id from an auth subject.
    pub fn from_subject(subject: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"rps-arena-player:");
        hasher.update(subject.as_bytes());
        let hash = hasher.finalize();

        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        Self(id)
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Short hex prefix for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Is this the CPU opponent.
    pub fn is_bot(&self) -> bool {
        *self == Self::BOT
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uuid_string())
    }
}

impl From<PlayerId> for String {
    fn from(id: PlayerId) -> Self {
        id.to_uuid_string()
    }
}

impl TryFrom<String> for PlayerId {
    type Error = uuid::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        uuid::Uuid::parse_str(&s).map(|u| Self(*u.as_bytes()))
    }
}

/// Unique match identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub uuid::Uuid);

impl MatchId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse from UUID string.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }

    /// Short hex prefix for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// MATCH ENUMS
// =============================================================================

/// Who the creator plays against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchKind {
    /// Two humans; waits for a second player.
    #[serde(rename = "HUMAN")]
    HumanVsHuman,
    /// Human against the CPU; starts immediately.
    #[serde(rename = "CPU")]
    HumanVsBot,
}

/// Match lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    /// Created, waiting for the second participant.
    Waiting,
    /// Both sides bound, rounds in progress.
    Playing,
    /// Terminal.
    Finished,
}

/// Why a match reached `Finished`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// One side reached the win threshold.
    ThresholdReached,
    /// A participant left a running match.
    Abandoned,
    /// Dropped while still waiting for an opponent.
    Discarded,
}

/// Side of the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The creator.
    A,
    /// The joiner (or the CPU).
    B,
}

/// A transition the match refused. The match is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Join on a match that is not waiting.
    #[error("match is not open for joining")]
    NotWaiting,

    /// Creator tried to join their own match.
    #[error("cannot join own match")]
    SelfJoin,

    /// Move outside of the round loop.
    #[error("match is not in progress")]
    NotPlaying,

    /// Identity is not bound to this match.
    #[error("not a participant")]
    NotParticipant,

    /// Second move for the same round; the first one stands.
    #[error("move already submitted for round {0}")]
    AlreadySubmitted(u32),

    /// Move tagged with another round generation.
    #[error("stale move for round {got}, current round is {current}")]
    StaleRound {
        /// Round the client answered.
        got: u32,
        /// Round the match is in.
        current: u32,
    },
}

// =============================================================================
// MATCH
// =============================================================================

/// One match between two sides.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Match {
    id: MatchId,
    kind: MatchKind,
    status: MatchStatus,
    participant_a: PlayerId,
    participant_b: Option<PlayerId>,
    score_a: u32,
    score_b: u32,
    pending_a: Option<Move>,
    pending_b: Option<Move>,
    /// Round generation, starts at 1 and advances on every resolution.
    round: u32,
    winner: Option<PlayerId>,
    /// Who ended the match by leaving (if anyone).
    abandoned_by: Option<PlayerId>,
    finish_reason: Option<FinishReason>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Match {
    /// Create a match for `creator`.
    ///
    /// Human matches start out waiting; CPU matches bind the bot and start
    /// playing right away.
    pub fn create(kind: MatchKind, creator: PlayerId) -> (Self, Vec<GameEvent>) {
        let mut m = Self::waiting(MatchId::generate(), creator, Utc::now());
        m.kind = kind;

        let mut events = vec![GameEvent::match_created(m.id, kind, creator)];
        if kind == MatchKind::HumanVsBot {
            m.participant_b = Some(PlayerId::BOT);
            m.status = MatchStatus::Playing;
            events.push(GameEvent::match_started(m.id, creator, PlayerId::BOT));
        }

        (m, events)
    }

    /// Rebuild a waiting human match from a stored record.
    pub fn restore_waiting(id: MatchId, creator: PlayerId, created_at: DateTime<Utc>) -> Self {
        Self::waiting(id, creator, created_at)
    }

    fn waiting(id: MatchId, creator: PlayerId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: MatchKind::HumanVsHuman,
            status: MatchStatus::Waiting,
            participant_a: creator,
            participant_b: None,
            score_a: 0,
            score_b: 0,
            pending_a: None,
            pending_b: None,
            round: 1,
            winner: None,
            abandoned_by: None,
            finish_reason: None,
            created_at,
            finished_at: None,
        }
    }

    /// Bind the second participant.
    pub fn join(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, Rejection> {
        if self.status != MatchStatus::Waiting {
            return Err(Rejection::NotWaiting);
        }
        if player == self.participant_a {
            return Err(Rejection::SelfJoin);
        }
        if player.is_bot() {
            return Err(Rejection::NotParticipant);
        }

        self.participant_b = Some(player);
        self.status = MatchStatus::Playing;

        Ok(vec![GameEvent::match_started(self.id, self.participant_a, player)])
    }

    /// Store a move for the caller's side and resolve the round once both
    /// sides have moved.
    ///
    /// `round`, when given, must equal the current round generation. A second
    /// move from the same side in one round is refused and the first one kept.
    pub fn submit_move<R: Rng + ?Sized>(
        &mut self,
        player: PlayerId,
        mv: Move,
        round: Option<u32>,
        rng: &mut R,
    ) -> Result<Vec<GameEvent>, Rejection> {
        if self.status != MatchStatus::Playing {
            return Err(Rejection::NotPlaying);
        }
        let side = self.human_side_of(&player).ok_or(Rejection::NotParticipant)?;
        if let Some(got) = round {
            if got != self.round {
                return Err(Rejection::StaleRound { got, current: self.round });
            }
        }

        let slot = match side {
            Side::A => &mut self.pending_a,
            Side::B => &mut self.pending_b,
        };
        if slot.is_some() {
            return Err(Rejection::AlreadySubmitted(self.round));
        }
        *slot = Some(mv);

        let mut events = vec![GameEvent::move_accepted(self.id, self.round, player)];

        if self.kind == MatchKind::HumanVsBot && self.pending_b.is_none() {
            self.pending_b = Some(Move::random(rng));
        }

        if let (Some(move_a), Some(move_b)) = (self.pending_a, self.pending_b) {
            self.resolve_round(move_a, move_b, &mut events);
        }

        Ok(events)
    }

    fn resolve_round(&mut self, move_a: Move, move_b: Move, events: &mut Vec<GameEvent>) {
        let round = self.round;
        let outcome = resolve(move_a, move_b);
        match outcome {
            RoundOutcome::AWins => self.score_a += 1,
            RoundOutcome::BWins => self.score_b += 1,
            RoundOutcome::Draw => {}
        }

        self.pending_a = None;
        self.pending_b = None;
        self.round += 1;

        events.push(GameEvent::round_resolved(
            self.id, round, move_a, move_b, outcome, self.score_a, self.score_b,
        ));

        let a_won = self.score_a >= WIN_THRESHOLD;
        if a_won || self.score_b >= WIN_THRESHOLD {
            // a CPU win has no winner identity
            let winner = if a_won {
                Some(self.participant_a)
            } else {
                self.participant_b.filter(|b| !b.is_bot())
            };
            self.finish(winner, FinishReason::ThresholdReached);
            events.push(GameEvent::match_finished(
                self.id, round, winner, FinishReason::ThresholdReached,
            ));
        }
    }

    /// Leave the match.
    ///
    /// Waiting: the match is discarded with no winner. Playing: the other side
    /// wins (no winner against the CPU). Finished: nothing happens.
    pub fn abandon(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, Rejection> {
        match self.status {
            MatchStatus::Finished => Ok(Vec::new()),
            MatchStatus::Waiting => {
                if player != self.participant_a {
                    return Err(Rejection::NotParticipant);
                }
                Ok(self.discard())
            }
            MatchStatus::Playing => {
                let side = self.human_side_of(&player).ok_or(Rejection::NotParticipant)?;
                let winner = match side {
                    Side::A => self.participant_b.filter(|b| !b.is_bot()),
                    Side::B => Some(self.participant_a),
                };

                self.pending_a = None;
                self.pending_b = None;
                self.abandoned_by = Some(player);
                self.finish(winner, FinishReason::Abandoned);

                Ok(vec![GameEvent::match_finished(
                    self.id, self.round, winner, FinishReason::Abandoned,
                )])
            }
        }
    }

    /// Drop a match nobody joined in time.
    pub fn expire(&mut self) -> Result<Vec<GameEvent>, Rejection> {
        if self.status != MatchStatus::Waiting {
            return Err(Rejection::NotWaiting);
        }
        Ok(self.discard())
    }

    fn discard(&mut self) -> Vec<GameEvent> {
        self.finish(None, FinishReason::Discarded);
        vec![GameEvent::match_finished(self.id, self.round, None, FinishReason::Discarded)]
    }

    fn finish(&mut self, winner: Option<PlayerId>, reason: FinishReason) {
        self.status = MatchStatus::Finished;
        self.winner = winner;
        self.finish_reason = Some(reason);
        self.finished_at = Some(Utc::now());
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Match id.
    pub fn id(&self) -> MatchId {
        self.id
    }

    /// Match kind.
    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    /// Lifecycle status.
    pub fn status(&self) -> MatchStatus {
        self.status
    }

    /// Creator.
    pub fn participant_a(&self) -> PlayerId {
        self.participant_a
    }

    /// Joiner or CPU.
    pub fn participant_b(&self) -> Option<PlayerId> {
        self.participant_b
    }

    /// Scores as (A, B).
    pub fn scores(&self) -> (u32, u32) {
        (self.score_a, self.score_b)
    }

    /// Current round generation.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Pending moves as (A, B).
    pub fn pending(&self) -> (Option<Move>, Option<Move>) {
        (self.pending_a, self.pending_b)
    }

    /// Winner, once finished.
    pub fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    /// Why the match finished.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Finish time.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Is the match terminal.
    pub fn is_finished(&self) -> bool {
        self.status == MatchStatus::Finished
    }

    /// Side bound to `player`, ignoring the CPU.
    pub fn human_side_of(&self, player: &PlayerId) -> Option<Side> {
        if player.is_bot() {
            None
        } else if *player == self.participant_a {
            Some(Side::A)
        } else if self.participant_b == Some(*player) {
            Some(Side::B)
        } else {
            None
        }
    }

    /// Human participants, creator first.
    pub fn human_participants(&self) -> Vec<PlayerId> {
        std::iter::once(self.participant_a)
            .chain(self.participant_b.filter(|b| !b.is_bot()))
            .collect()
    }

    /// The completed-match fact, for finished matches that were actually
    /// played. Discarded matches yield `None`.
    pub fn completion(&self) -> Option<CompletedMatch> {
        let reason = self.finish_reason?;
        if reason == FinishReason::Discarded {
            return None;
        }
        let participant_b = self.participant_b?;

        let loser = match reason {
            FinishReason::Abandoned => self.abandoned_by,
            _ if self.score_a >= WIN_THRESHOLD => Some(participant_b),
            _ => Some(self.participant_a),
        };

        Some(CompletedMatch {
            match_id: self.id,
            kind: self.kind,
            participant_a: self.participant_a,
            participant_b,
            winner_id: self.winner,
            loser_id: loser,
            score_a: self.score_a,
            score_b: self.score_b,
            rounds_played: self.round - 1,
            reason,
            finished_at: self.finished_at.unwrap_or(self.created_at),
        })
    }
}

// =============================================================================
// COMPLETED MATCH
// =============================================================================

/// Immutable record of a finished match, handed to the stats side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedMatch {
    /// Match identifier.
    pub match_id: MatchId,
    /// Match kind.
    pub kind: MatchKind,
    /// Creator.
    pub participant_a: PlayerId,
    /// Joiner or CPU.
    pub participant_b: PlayerId,
    /// Winner. None when the CPU won or nobody did.
    pub winner_id: Option<PlayerId>,
    /// Loser.
    pub loser_id: Option<PlayerId>,
    /// Final score of A.
    pub score_a: u32,
    /// Final score of B.
    pub score_b: u32,
    /// Number of resolved rounds.
    pub rounds_played: u32,
    /// Why it ended.
    pub reason: FinishReason,
    /// When it ended.
    pub finished_at: DateTime<Utc>,
}

impl CompletedMatch {
    /// Per-player stat increments as (player, won). The CPU is never listed.
    pub fn stat_updates(&self) -> Vec<(PlayerId, bool)> {
        let mut updates = Vec::with_capacity(2);
        if let Some(winner) = self.winner_id.filter(|w| !w.is_bot()) {
            updates.push((winner, true));
        }
        if let Some(loser) = self.loser_id.filter(|l| !l.is_bot()) {
            updates.push((loser, false));
        }
        updates
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::GameEventData;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn alice() -> PlayerId {
        PlayerId::new([1; 16])
    }

    fn bob() -> PlayerId {
        PlayerId::new([2; 16])
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn playing_match() -> Match {
        let (mut m, _) = Match::create(MatchKind::HumanVsHuman, alice());
        m.join(bob()).unwrap();
        m
    }

    fn play_round(m: &mut Match, a: Move, b: Move) -> Vec<GameEvent> {
        let mut rng = rng();
        let mut events = m.submit_move(alice(), a, None, &mut rng).unwrap();
        events.extend(m.submit_move(bob(), b, None, &mut rng).unwrap());
        events
    }

    #[test]
    fn test_player_id_derivation() {
        let id1 = PlayerId::from_subject("user123");
        let id2 = PlayerId::from_subject("user123");
        let id3 = PlayerId::from_subject("user456");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
        assert!(!id1.is_bot());
    }

    #[test]
    fn test_player_id_serializes_as_uuid() {
        let id = PlayerId::new([0xab; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abababab-abab-abab-abab-abababababab\"");

        let parsed: PlayerId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
        assert!(serde_json::from_str::<PlayerId>("\"nope\"").is_err());
    }

    #[test]
    fn test_create_human_match_waits() {
        let (m, events) = Match::create(MatchKind::HumanVsHuman, alice());

        assert_eq!(m.status(), MatchStatus::Waiting);
        assert_eq!(m.participant_b(), None);
        assert_eq!(m.round(), 1);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].data, GameEventData::MatchCreated { .. }));
    }

    #[test]
    fn test_create_cpu_match_starts_immediately() {
        let (m, events) = Match::create(MatchKind::HumanVsBot, alice());

        assert_eq!(m.status(), MatchStatus::Playing);
        assert_eq!(m.participant_b(), Some(PlayerId::BOT));
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1].data, GameEventData::MatchStarted { .. }));
    }

    #[test]
    fn test_join_binds_second_player() {
        let (mut m, _) = Match::create(MatchKind::HumanVsHuman, alice());
        let events = m.join(bob()).unwrap();

        assert_eq!(m.status(), MatchStatus::Playing);
        assert_eq!(m.participant_b(), Some(bob()));
        assert_eq!(
            events[0].data,
            GameEventData::MatchStarted { participant_a: alice(), participant_b: bob() }
        );
    }

    #[test]
    fn test_self_join_rejected() {
        let (mut m, _) = Match::create(MatchKind::HumanVsHuman, alice());
        assert_eq!(m.join(alice()), Err(Rejection::SelfJoin));
        assert_eq!(m.status(), MatchStatus::Waiting);
    }

    #[test]
    fn test_join_playing_match_rejected() {
        let mut m = playing_match();
        let carol = PlayerId::new([3; 16]);
        assert_eq!(m.join(carol), Err(Rejection::NotWaiting));
        assert_eq!(m.participant_b(), Some(bob()));
    }

    #[test]
    fn test_move_before_join_rejected() {
        let (mut m, _) = Match::create(MatchKind::HumanVsHuman, alice());
        let result = m.submit_move(alice(), Move::Rock, None, &mut rng());
        assert_eq!(result, Err(Rejection::NotPlaying));
    }

    #[test]
    fn test_move_from_stranger_rejected() {
        let mut m = playing_match();
        let carol = PlayerId::new([3; 16]);
        let result = m.submit_move(carol, Move::Rock, None, &mut rng());
        assert_eq!(result, Err(Rejection::NotParticipant));
        assert_eq!(m.pending(), (None, None));
    }

    #[test]
    fn test_bot_identity_cannot_move() {
        let (mut m, _) = Match::create(MatchKind::HumanVsBot, alice());
        let result = m.submit_move(PlayerId::BOT, Move::Rock, None, &mut rng());
        assert_eq!(result, Err(Rejection::NotParticipant));
    }

    #[test]
    fn test_resubmission_keeps_first_move() {
        let mut m = playing_match();
        let mut rng = rng();
        m.submit_move(alice(), Move::Rock, None, &mut rng).unwrap();

        let second = m.submit_move(alice(), Move::Paper, None, &mut rng);
        assert_eq!(second, Err(Rejection::AlreadySubmitted(1)));
        assert_eq!(m.pending(), (Some(Move::Rock), None));
    }

    #[test]
    fn test_round_waits_for_both_moves() {
        let mut m = playing_match();
        let events = m.submit_move(bob(), Move::Paper, None, &mut rng()).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(m.pending(), (None, Some(Move::Paper)));
        assert_eq!(m.round(), 1);
    }

    #[test]
    fn test_round_resolution_scores_and_clears() {
        let mut m = playing_match();
        let events = play_round(&mut m, Move::Rock, Move::Scissors);

        assert_eq!(m.scores(), (1, 0));
        assert_eq!(m.pending(), (None, None));
        assert_eq!(m.round(), 2);
        let resolved = events.iter().find(|e| matches!(e.data, GameEventData::RoundResolved { .. }));
        assert_eq!(
            resolved.unwrap().data,
            GameEventData::RoundResolved {
                move_a: Move::Rock,
                move_b: Move::Scissors,
                outcome: RoundOutcome::AWins,
                score_a: 1,
                score_b: 0,
            }
        );
    }

    #[test]
    fn test_draw_scores_nobody() {
        let mut m = playing_match();
        play_round(&mut m, Move::Paper, Move::Paper);
        assert_eq!(m.scores(), (0, 0));
        assert_eq!(m.round(), 2);
    }

    #[test]
    fn test_stale_round_discarded() {
        let mut m = playing_match();
        play_round(&mut m, Move::Rock, Move::Rock);

        let result = m.submit_move(alice(), Move::Paper, Some(1), &mut rng());
        assert_eq!(result, Err(Rejection::StaleRound { got: 1, current: 2 }));
        assert_eq!(m.pending(), (None, None));

        assert!(m.submit_move(alice(), Move::Paper, Some(2), &mut rng()).is_ok());
    }

    #[test]
    fn test_first_to_three_wins() {
        let mut m = playing_match();
        play_round(&mut m, Move::Rock, Move::Scissors);
        play_round(&mut m, Move::Rock, Move::Scissors);
        assert_eq!(m.status(), MatchStatus::Playing);

        let events = play_round(&mut m, Move::Rock, Move::Scissors);
        assert_eq!(m.status(), MatchStatus::Finished);
        assert_eq!(m.winner(), Some(alice()));
        assert_eq!(m.scores(), (3, 0));
        assert!(events.last().unwrap().is_terminal());

        let done = m.completion().unwrap();
        assert_eq!(done.loser_id, Some(bob()));
        assert_eq!(done.rounds_played, 3);
        assert_eq!(done.stat_updates(), vec![(alice(), true), (bob(), false)]);
    }

    #[test]
    fn test_moves_after_finish_rejected() {
        let mut m = playing_match();
        for _ in 0..3 {
            play_round(&mut m, Move::Scissors, Move::Paper);
        }
        let result = m.submit_move(bob(), Move::Rock, None, &mut rng());
        assert_eq!(result, Err(Rejection::NotPlaying));
        assert_eq!(m.scores(), (3, 0));
    }

    #[test]
    fn test_cpu_round_resolves_on_human_move() {
        let (mut m, _) = Match::create(MatchKind::HumanVsBot, alice());
        let events = m.submit_move(alice(), Move::Paper, None, &mut rng()).unwrap();

        let resolved = events.iter().find_map(|e| match e.data {
            GameEventData::RoundResolved { move_a, move_b, outcome, .. } => Some((move_a, move_b, outcome)),
            _ => None,
        });
        let (move_a, move_b, outcome) = resolved.expect("round should resolve");
        assert_eq!(move_a, Move::Paper);
        assert!(Move::ALL.contains(&move_b));
        assert_eq!(outcome, resolve(Move::Paper, move_b));
        assert_eq!(m.pending(), (None, None));
    }

    #[test]
    fn test_cpu_match_can_be_lost() {
        let (mut m, _) = Match::create(MatchKind::HumanVsBot, alice());
        let mut rng = rng();
        while !m.is_finished() {
            m.submit_move(alice(), Move::Rock, None, &mut rng).unwrap();
        }
        let done = m.completion().unwrap();
        let updates = done.stat_updates();

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, alice());
        assert_eq!(updates[0].1, m.winner() == Some(alice()));
    }

    #[test]
    fn test_cpu_win_has_no_winner_id() {
        let lost = (0..64u64).find_map(|seed| {
            let (mut m, _) = Match::create(MatchKind::HumanVsBot, alice());
            let mut rng = StdRng::seed_from_u64(seed);
            let mut last = Vec::new();
            while !m.is_finished() {
                last = m.submit_move(alice(), Move::Rock, None, &mut rng).unwrap();
            }
            (m.scores().1 == WIN_THRESHOLD).then_some((m, last))
        });
        let (m, events) = lost.expect("the CPU should win at least one of 64 seeded matches");

        assert_eq!(m.winner(), None);
        assert_eq!(m.finish_reason(), Some(FinishReason::ThresholdReached));
        assert_eq!(
            events.last().unwrap().data,
            GameEventData::MatchFinished { winner_id: None, reason: FinishReason::ThresholdReached }
        );

        let done = m.completion().unwrap();
        assert_eq!(done.winner_id, None);
        assert_eq!(done.loser_id, Some(alice()));
        assert_eq!(done.stat_updates(), vec![(alice(), false)]);
    }

    #[test]
    fn test_abandon_waiting_discards() {
        let (mut m, _) = Match::create(MatchKind::HumanVsHuman, alice());
        let events = m.abandon(alice()).unwrap();

        assert_eq!(m.status(), MatchStatus::Finished);
        assert_eq!(m.finish_reason(), Some(FinishReason::Discarded));
        assert_eq!(m.winner(), None);
        assert_eq!(
            events[0].data,
            GameEventData::MatchFinished { winner_id: None, reason: FinishReason::Discarded }
        );
        assert!(m.completion().is_none());
    }

    #[test]
    fn test_abandon_waiting_by_stranger_rejected() {
        let (mut m, _) = Match::create(MatchKind::HumanVsHuman, alice());
        assert_eq!(m.abandon(bob()), Err(Rejection::NotParticipant));
        assert_eq!(m.status(), MatchStatus::Waiting);
    }

    #[test]
    fn test_abandon_mid_match_awards_opponent() {
        let mut m = playing_match();
        play_round(&mut m, Move::Rock, Move::Scissors);
        m.abandon(alice()).unwrap();

        assert_eq!(m.winner(), Some(bob()));
        let done = m.completion().unwrap();
        assert_eq!(done.reason, FinishReason::Abandoned);
        assert_eq!(done.stat_updates(), vec![(bob(), true), (alice(), false)]);
    }

    #[test]
    fn test_abandon_cpu_match_records_loss_only() {
        let (mut m, _) = Match::create(MatchKind::HumanVsBot, alice());
        let events = m.abandon(alice()).unwrap();

        assert_eq!(m.winner(), None);
        assert_eq!(
            events[0].data,
            GameEventData::MatchFinished { winner_id: None, reason: FinishReason::Abandoned }
        );
        assert_eq!(m.completion().unwrap().stat_updates(), vec![(alice(), false)]);
    }

    #[test]
    fn test_abandon_finished_is_noop() {
        let mut m = playing_match();
        m.abandon(bob()).unwrap();
        let winner = m.winner();

        assert_eq!(m.abandon(alice()), Ok(Vec::new()));
        assert_eq!(m.winner(), winner);
    }

    #[test]
    fn test_expire_only_waiting() {
        let (mut waiting, _) = Match::create(MatchKind::HumanVsHuman, alice());
        assert!(waiting.expire().is_ok());
        assert_eq!(waiting.finish_reason(), Some(FinishReason::Discarded));

        let mut playing = playing_match();
        assert_eq!(playing.expire(), Err(Rejection::NotWaiting));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Move(bool, Move, Option<u32>),
        Abandon(bool),
        Stranger(Move),
    }

    fn any_op() -> impl Strategy<Value = Op> {
        let mv = prop::sample::select(Move::ALL.to_vec());
        prop_oneof![
            8 => (any::<bool>(), mv.clone(), prop::option::of(1u32..8)).prop_map(|(a, m, r)| Op::Move(a, m, r)),
            1 => any::<bool>().prop_map(Op::Abandon),
            1 => mv.prop_map(Op::Stranger),
        ]
    }

    proptest! {
        #[test]
        fn prop_scores_monotonic_and_bounded(ops in prop::collection::vec(any_op(), 0..60), seed in any::<u64>()) {
            let mut m = playing_match();
            let mut rng = StdRng::seed_from_u64(seed);
            let mut finished_events = 0;
            let mut last = m.scores();

            for op in ops {
                let result = match op {
                    Op::Move(first, mv, round) => {
                        let who = if first { alice() } else { bob() };
                        m.submit_move(who, mv, round, &mut rng)
                    }
                    Op::Abandon(first) => m.abandon(if first { alice() } else { bob() }),
                    Op::Stranger(mv) => m.submit_move(PlayerId::new([9; 16]), mv, None, &mut rng),
                };
                if let Ok(events) = result {
                    finished_events += events.iter().filter(|e| e.is_terminal()).count();
                }

                let now = m.scores();
                prop_assert!(now.0 >= last.0 && now.1 >= last.1);
                prop_assert!(now.0 + now.1 <= last.0 + last.1 + 1);
                if !m.is_finished() {
                    prop_assert!(now.0 < WIN_THRESHOLD && now.1 < WIN_THRESHOLD);
                } else if m.finish_reason() == Some(FinishReason::ThresholdReached) {
                    prop_assert!((now.0 == WIN_THRESHOLD) ^ (now.1 == WIN_THRESHOLD));
                }
                last = now;
            }

            prop_assert!(finished_events <= 1);
            prop_assert_eq!(finished_events == 1, m.is_finished());
        }
    }
}
