//! # Fog Chess
//!
//! Authoritative server core for real-time, two-player, fog-of-war chess.
//!
//! ## Components
//!
//! - **Session Engine** (`session`): match lifecycle, move arbitration, clocks
//!   and end-of-game resolution. One serialized stream of mutations per match.
//! - **Fog-of-War Engine** (`fog`): pure reveal and visibility computation.
//! - **Matchmaking Queue** (`matchmaking`): rating-proximity pairing with a
//!   threshold that relaxes as players wait.
//! - **Ports**: `oracle` (chess legality, shakmaty-backed), `persistence`
//!   (session snapshots), `rating` (post-game rating updates).
//! - **Gateway adapters** (`gateway`): per-user connections, client commands
//!   and outbound events.

pub mod config;
pub mod error;
pub mod fog;
pub mod gateway;
pub mod matchmaking;
pub mod oracle;
pub mod persistence;
pub mod rating;
pub mod retry;
pub mod session;
pub mod types;

pub use config::ServerConfig;
pub use error::SessionError;
pub use session::{EnginePorts, MoveOutcome, RevealOutcome, SessionEngine};
