//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON object tagged by `"type"`.

use serde::{Serialize, Deserialize};

use crate::game::moves::{Move, RoundOutcome};
use crate::game::state::{FinishReason, MatchId, MatchKind, PlayerId};
use crate::store::LeaderboardEntry;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with the server. Must be the first frame.
    Auth(AuthRequest),

    /// Open a new match.
    CreateMatch {
        /// `HUMAN` or `CPU`.
        kind: MatchKind,
    },

    /// Take the second seat of an open match.
    JoinMatch {
        /// Match to join.
        match_id: MatchId,
    },

    /// Play a move in the current round.
    SubmitMove {
        /// Match the move is for.
        match_id: MatchId,
        /// The move.
        #[serde(rename = "move")]
        mv: Move,
        /// Round the client is answering; stale rounds are discarded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round: Option<u32>,
    },

    /// Leave a match.
    AbandonMatch {
        /// Match to leave.
        match_id: MatchId,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Token issued by the external identity provider.
    pub token: String,
    /// Client version for diagnostics.
    #[serde(default)]
    pub client_version: String,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// A match was opened by this client.
    MatchCreated {
        /// New match id.
        match_id: MatchId,
        /// Match kind.
        kind: MatchKind,
    },

    /// Both seats are taken, rounds can be played.
    MatchStarted {
        /// Match id.
        match_id: MatchId,
        /// Match kind.
        kind: MatchKind,
        /// Side A then side B.
        participants: Vec<PlayerId>,
    },

    /// A round was resolved.
    RoundResult(RoundResult),

    /// Match is over.
    MatchFinished {
        /// Match id.
        match_id: MatchId,
        /// Winner, or null for no winner.
        winner_id: Option<PlayerId>,
        /// Why it ended.
        reason: FinishReason,
    },

    /// Matches waiting for a second player, oldest first.
    OpenMatches {
        /// Open matches.
        matches: Vec<OpenMatchInfo>,
    },

    /// Top players by wins.
    Leaderboard {
        /// Leaderboard rows, best first.
        entries: Vec<LeaderboardEntry>,
    },

    /// Pong response.
    Pong {
        /// Echoed client clock.
        timestamp: u64,
        /// Server clock (ms since epoch).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Resolved player id if successful.
    pub player_id: Option<PlayerId>,
    /// Display name if successful.
    pub display_name: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Result of one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    /// Match id.
    pub match_id: MatchId,
    /// Round generation that was resolved.
    pub round: u32,
    /// Move of side A.
    pub p1_move: Move,
    /// Move of side B.
    pub p2_move: Move,
    /// Score of side A after the round.
    pub score_a: u32,
    /// Score of side B after the round.
    pub score_b: u32,
    /// `A`, `B` or `DRAW`.
    pub round_winner: RoundOutcome,
}

/// Entry of the open matches list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenMatchInfo {
    /// Match id.
    pub match_id: MatchId,
    /// Creator id.
    pub creator_id: PlayerId,
    /// Creator display name.
    pub creator_username: String,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Invalid input.
    InvalidInput,
    /// Server overloaded.
    ServerOverloaded,
}

impl ServerMessage {
    /// Build an error frame.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
