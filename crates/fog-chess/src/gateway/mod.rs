//! Realtime Gateway adapters.
//!
//! Transport is out of scope: a connection is just an unbounded channel of
//! [`GatewayEvent`]s per user, registered in the [`ConnectionRegistry`].
//! [`Gateway`] turns inbound [`ClientCommand`]s into Session Engine and
//! Matchmaking Queue calls, and reports every failure to the caller as a
//! `SessionError` event.

mod events;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

pub use events::{EventSink, GatewayEvent, PlayerView};

use crate::error::SessionError;
use crate::matchmaking::Matchmaker;
use crate::rating::{PlayerRating, RatingPort};
use crate::session::SessionEngine;
use crate::types::{GameMode, Move, SessionId, Square, UserId};

/// A command received from a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Join {
        session_id: SessionId,
    },
    Move {
        session_id: SessionId,
        #[serde(rename = "move")]
        mv: Move,
    },
    RevealFog {
        session_id: SessionId,
        square: Square,
    },
    Resign {
        session_id: SessionId,
    },
    Timeout {
        session_id: SessionId,
    },
    Enqueue {
        mode: GameMode,
    },
    Dequeue {
        mode: GameMode,
    },
}

impl ClientCommand {
    const fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::Join { session_id }
            | Self::Move { session_id, .. }
            | Self::RevealFog { session_id, .. }
            | Self::Resign { session_id }
            | Self::Timeout { session_id } => Some(*session_id),
            Self::Enqueue { .. } | Self::Dequeue { .. } => None,
        }
    }
}

/// Live connections, one per user.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, mpsc::UnboundedSender<GatewayEvent>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user`, replacing any previous one.
    pub fn connect(&self, user: UserId) -> mpsc::UnboundedReceiver<GatewayEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.connections.insert(user, tx).is_some() {
            debug!(user_id = %user, "replaced existing connection");
        }
        rx
    }

    pub fn disconnect(&self, user: UserId) {
        self.connections.remove(&user);
    }

    #[must_use]
    pub fn is_connected(&self, user: UserId) -> bool {
        self.connections.contains_key(&user)
    }
}

impl EventSink for ConnectionRegistry {
    fn deliver(&self, user: UserId, event: GatewayEvent) {
        let closed = match self.connections.get(&user) {
            Some(tx) => tx.send(event).is_err(),
            None => {
                trace!(user_id = %user, "no connection, event dropped");
                return;
            }
        };
        // A reconnect may have replaced the sender since the failed send.
        if closed && self.connections.remove_if(&user, |_, tx| tx.is_closed()).is_some() {
            debug!(user_id = %user, "connection closed, removed");
        }
    }
}

/// Event sink that records every delivery, for tests.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(UserId, GatewayEvent)>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events delivered to `user`, oldest first.
    #[must_use]
    pub fn events_for(&self, user: UserId) -> Vec<GatewayEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, e)| e.clone())
            .collect()
    }

    #[must_use]
    pub fn all(&self) -> Vec<(UserId, GatewayEvent)> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn deliver(&self, user: UserId, event: GatewayEvent) {
        self.events.lock().push((user, event));
    }
}

/// Routes client commands to the core.
#[derive(Clone)]
pub struct Gateway {
    engine: SessionEngine,
    matchmaker: Arc<Matchmaker>,
    ratings: Arc<dyn RatingPort>,
    events: Arc<dyn EventSink>,
}

impl Gateway {
    /// `events` should be the same sink the engine delivers to.
    pub fn new(
        engine: SessionEngine,
        matchmaker: Arc<Matchmaker>,
        ratings: Arc<dyn RatingPort>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            engine,
            matchmaker,
            ratings,
            events,
        }
    }

    /// Handle one raw text frame from `user`.
    pub async fn handle_frame(&self, user: UserId, frame: &str) {
        match serde_json::from_str::<ClientCommand>(frame) {
            Ok(command) => self.handle(user, command).await,
            Err(e) => {
                debug!(user_id = %user, error = %e, "malformed frame");
                self.events.deliver(
                    user,
                    GatewayEvent::error(
                        None,
                        SessionError::InvalidRequest {
                            reason: e.to_string(),
                        },
                    ),
                );
            }
        }
    }

    /// Handle one command from `user`.
    pub async fn handle(&self, user: UserId, command: ClientCommand) {
        let session_id = command.session_id();
        if let Err(error) = self.dispatch(user, command).await {
            debug!(user_id = %user, error = %error, "command failed");
            self.events
                .deliver(user, GatewayEvent::error(session_id, error));
        }
    }

    async fn dispatch(&self, user: UserId, command: ClientCommand) -> Result<(), SessionError> {
        match command {
            ClientCommand::Join { session_id } => {
                let state = self.engine.join(session_id, user).await?;
                self.events.deliver(user, state);
            }
            ClientCommand::Move { session_id, mv } => {
                let outcome = self.engine.submit_move(session_id, user, mv).await?;
                // The mover gets a fresh view; the engine already told the
                // opponent. A finished session has sent SessionEnded instead.
                if outcome.terminal.is_none() {
                    let state = self.engine.join(session_id, user).await?;
                    self.events.deliver(user, state);
                }
            }
            ClientCommand::RevealFog { session_id, square } => {
                self.engine.reveal_fog(session_id, user, square).await?;
                let state = self.engine.join(session_id, user).await?;
                self.events.deliver(user, state);
            }
            ClientCommand::Resign { session_id } => {
                self.engine.resign(session_id, user).await?;
            }
            ClientCommand::Timeout { session_id } => {
                self.engine.timeout(session_id, user).await?;
            }
            ClientCommand::Enqueue { mode } => {
                let rating = match self.ratings.current_rating(user).await {
                    Ok(rating) => rating,
                    Err(e) => {
                        warn!(user_id = %user, error = %e, "rating lookup failed, using default");
                        PlayerRating::STARTING_RATING
                    }
                };
                self.matchmaker.enqueue(user, rating, mode);
            }
            ClientCommand::Dequeue { mode } => {
                self.matchmaker.dequeue(user, mode);
            }
        }
        Ok(())
    }

    /// Drop a user's queue entries when their connection goes away.
    pub fn disconnect(&self, user: UserId) {
        for mode in GameMode::ALL {
            self.matchmaker.dequeue(user, mode);
        }
    }
}
