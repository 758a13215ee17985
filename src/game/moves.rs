//! Moves and Round Resolution
//!
//! The three hand shapes and the pure rule that decides a round.
//! Nothing in here holds state or touches the clock.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A hand shape submitted for one round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Move {
    /// Beats scissors.
    Rock,
    /// Beats rock.
    Paper,
    /// Beats paper.
    Scissors,
}

impl Move {
    /// All moves, in wire order.
    pub const ALL: [Move; 3] = [Move::Rock, Move::Paper, Move::Scissors];

    /// Check if this move beats the other.
    pub fn beats(self, other: Move) -> bool {
        matches!(
            (self, other),
            (Move::Rock, Move::Scissors)
                | (Move::Scissors, Move::Paper)
                | (Move::Paper, Move::Rock)
        )
    }

    /// Draw a move uniformly at random.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Move {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

/// Outcome of one round, seen from side A.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundOutcome {
    /// Side A took the round.
    #[serde(rename = "A")]
    AWins,
    /// Side B took the round.
    #[serde(rename = "B")]
    BWins,
    /// Same move on both sides.
    #[serde(rename = "DRAW")]
    Draw,
}

impl RoundOutcome {
    /// The same outcome seen from the other side.
    pub fn flipped(self) -> RoundOutcome {
        match self {
            RoundOutcome::AWins => RoundOutcome::BWins,
            RoundOutcome::BWins => RoundOutcome::AWins,
            RoundOutcome::Draw => RoundOutcome::Draw,
        }
    }
}

/// Decide a round.
///
/// Total and deterministic: equal moves draw, otherwise A wins iff its move
/// beats B's.
#[inline]
pub fn resolve(move_a: Move, move_b: Move) -> RoundOutcome {
    if move_a == move_b {
        RoundOutcome::Draw
    } else if move_a.beats(move_b) {
        RoundOutcome::AWins
    } else {
        RoundOutcome::BWins
    }
}
