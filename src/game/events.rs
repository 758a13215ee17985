//! Game Events
//!
//! Facts produced by match transitions. The entity returns them once a
//! transition has been applied; the session layer turns them into outbound
//! notifications.

use serde::{Serialize, Deserialize};
use crate::game::moves::{Move, RoundOutcome};
use crate::game::state::{FinishReason, MatchId, MatchKind, PlayerId};

/// Game event data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Match was created.
    MatchCreated {
        kind: MatchKind,
        creator_id: PlayerId,
    },

    /// Both sides are bound and the round loop is running.
    MatchStarted {
        participant_a: PlayerId,
        participant_b: PlayerId,
    },

    /// A move was stored for the current round.
    MoveAccepted {
        player_id: PlayerId,
    },

    /// Both moves were revealed and compared.
    RoundResolved {
        move_a: Move,
        move_b: Move,
        outcome: RoundOutcome,
        score_a: u32,
        score_b: u32,
    },

    /// Match reached its terminal state.
    MatchFinished {
        winner_id: Option<PlayerId>,
        reason: FinishReason,
    },
}

/// A game event tagged with its match and round generation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Match the event belongs to
    pub match_id: MatchId,

    /// Round generation the event happened in
    pub round: u32,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(match_id: MatchId, round: u32, data: GameEventData) -> Self {
        Self { match_id, round, data }
    }

    /// Create match created event.
    pub fn match_created(match_id: MatchId, kind: MatchKind, creator_id: PlayerId) -> Self {
        Self::new(match_id, 0, GameEventData::MatchCreated { kind, creator_id })
    }

    /// Create match started event.
    pub fn match_started(match_id: MatchId, participant_a: PlayerId, participant_b: PlayerId) -> Self {
        Self::new(match_id, 1, GameEventData::MatchStarted { participant_a, participant_b })
    }

    /// Create move accepted event.
    pub fn move_accepted(match_id: MatchId, round: u32, player_id: PlayerId) -> Self {
        Self::new(match_id, round, GameEventData::MoveAccepted { player_id })
    }

    /// Create round resolved event.
    pub fn round_resolved(
        match_id: MatchId,
        round: u32,
        move_a: Move,
        move_b: Move,
        outcome: RoundOutcome,
        score_a: u32,
        score_b: u32,
    ) -> Self {
        Self::new(
            match_id,
            round,
            GameEventData::RoundResolved { move_a, move_b, outcome, score_a, score_b },
        )
    }

    /// Create match finished event.
    pub fn match_finished(
        match_id: MatchId,
        round: u32,
        winner_id: Option<PlayerId>,
        reason: FinishReason,
    ) -> Self {
        Self::new(match_id, round, GameEventData::MatchFinished { winner_id, reason })
    }

    /// Check if this event ends the match.
    pub fn is_terminal(&self) -> bool {
        matches!(self.data, GameEventData::MatchFinished { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_detection() {
        let id = MatchId::generate();
        let a = PlayerId::new([1; 16]);

        assert!(!GameEvent::match_created(id, MatchKind::HumanVsHuman, a).is_terminal());
        assert!(!GameEvent::move_accepted(id, 2, a).is_terminal());
        assert!(GameEvent::match_finished(id, 4, Some(a), FinishReason::ThresholdReached).is_terminal());
        assert!(GameEvent::match_finished(id, 1, None, FinishReason::Discarded).is_terminal());
    }

    #[test]
    fn test_round_resolved_carries_scores() {
        let id = MatchId::generate();
        let event = GameEvent::round_resolved(id, 3, Move::Rock, Move::Paper, RoundOutcome::BWins, 1, 2);

        assert_eq!(event.round, 3);
        match event.data {
            GameEventData::RoundResolved { outcome, score_a, score_b, .. } => {
                assert_eq!(outcome, RoundOutcome::BWins);
                assert_eq!((score_a, score_b), (1, 2));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
