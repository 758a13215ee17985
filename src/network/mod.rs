//! Network Layer
//!
//! WebSocket server, authentication, and everything that coordinates
//! matches between connected players. Match rules live in `game/`; this
//! layer decides who may call them and who hears about the result.

pub mod auth;
pub mod coordinator;
pub mod directory;
pub mod fanout;
pub mod protocol;
pub mod session;
pub mod server;

pub use auth::{verify_identity, validate_token, AuthConfig, AuthError, Identity, TokenClaims};
pub use coordinator::{CoordinatorConfig, MatchCoordinator, MatchError};
pub use directory::{MatchDirectory, OpenMatch};
pub use fanout::Fanout;
pub use protocol::{ClientMessage, ServerMessage, ErrorCode};
pub use session::{MatchSession, SessionManager};
pub use server::{GameServer, ServerConfig, GameServerError};
