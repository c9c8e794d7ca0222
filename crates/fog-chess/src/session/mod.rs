//! Session Engine.
//!
//! Owns every live match. Each session sits behind its own async mutex, so
//! all mutations of one match (moves, fog reveals, resignations, clock ticks)
//! are linearized while different matches run fully in parallel. The lock is
//! held across the oracle call; nothing is mutated until the oracle answers.
//!
//! ## Lifecycle
//!
//! ```text
//! create_session ──► Active ──► finish() ──► Finished ──(retention)──► evicted
//!                      ▲  │
//!            clock task┘  └ submit_move / reveal_fog / resign / timeout
//! ```
//!
//! `finish` runs exactly once per session. It stops the clock task, writes
//! the final snapshot, notifies both players, applies ratings and schedules
//! eviction from the in-memory table. The persisted copy stays reachable
//! through [`SessionEngine::find_session`].

mod clock;

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use self::clock::MatchClock;
use crate::config::{RetryConfig, SessionConfig};
use crate::error::{PersistenceError, SessionError};
use crate::fog::{self, PlayedMove};
use crate::gateway::{EventSink, GatewayEvent, PlayerView};
use crate::matchmaking::SessionFactory;
use crate::oracle::{ChessOracle, OracleError};
use crate::persistence::{SnapshotStore, SnapshotWriter};
use crate::rating::{RatingOutcome, RatingPort};
use crate::retry::with_backoff;
use crate::types::{
    Clocks, Color, EndReason, FogPair, GameMode, MatchSession, Move, MoveRecord, Players,
    Position, SessionId, SessionResult, SessionStatus, Square, UserId,
};

/// Default number of sessions returned by [`SessionEngine::recent_sessions`].
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// External collaborators of the engine.
#[derive(Clone)]
pub struct EnginePorts {
    pub oracle: Arc<dyn ChessOracle>,
    pub store: Arc<dyn SnapshotStore>,
    pub rating: Arc<dyn RatingPort>,
    pub events: Arc<dyn EventSink>,
}

/// Result of an accepted move, for the mover.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    /// Position after the move.
    pub position: Position,
    pub san: String,
    /// Squares newly added to the mover's FogState.
    pub fog_reveal: Vec<Square>,
    pub clocks: Clocks,
    /// Set when this move ended the session.
    pub terminal: Option<SessionResult>,
}

/// Result of a fog reveal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    Revealed,
    /// The square was already in the player's FogState; nothing changed.
    AlreadyRevealed,
}

/// Authoritative state of one match plus its clock accounting.
pub(crate) struct LiveMatch {
    session: MatchSession,
    clock: MatchClock,
    /// Stops the clock task.
    cancel: CancellationToken,
}

pub(crate) struct SessionHandle {
    id: SessionId,
    state: Mutex<LiveMatch>,
}

pub(crate) struct EngineInner {
    config: SessionConfig,
    retry: RetryConfig,
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    oracle: Arc<dyn ChessOracle>,
    store: Arc<dyn SnapshotStore>,
    writer: SnapshotWriter,
    rating: Arc<dyn RatingPort>,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
}

/// Registry of live matches and the operations that mutate them.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct SessionEngine {
    inner: Arc<EngineInner>,
}

impl SessionEngine {
    /// Create an engine. Must be called from within a tokio runtime; the
    /// snapshot writer task is spawned here.
    pub fn new(config: SessionConfig, retry: RetryConfig, ports: EnginePorts) -> Self {
        let (writer, _) = SnapshotWriter::spawn(ports.store.clone(), retry.clone());
        Self {
            inner: Arc::new(EngineInner {
                config,
                retry,
                sessions: DashMap::new(),
                oracle: ports.oracle,
                store: ports.store,
                writer,
                rating: ports.rating,
                events: ports.events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Number of sessions currently held in memory, finished ones included.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Start a match between two users.
    #[instrument(skip(self))]
    pub async fn create_session(
        &self,
        player_a: UserId,
        player_b: UserId,
        mode: GameMode,
    ) -> Result<SessionId, SessionError> {
        self.create_with_id(SessionId::new(), player_a, player_b, mode)
            .await
    }

    async fn create_with_id(
        &self,
        id: SessionId,
        player_a: UserId,
        player_b: UserId,
        mode: GameMode,
    ) -> Result<SessionId, SessionError> {
        let inner = &self.inner;
        if inner.sessions.contains_key(&id) {
            return Err(SessionError::DuplicateSession { session_id: id });
        }

        let position = inner
            .call_oracle(inner.oracle.initial_position(mode))
            .await?;

        let players = if inner.config.randomize_colors && rand::random::<bool>() {
            Players {
                white: player_b,
                black: player_a,
            }
        } else {
            Players {
                white: player_a,
                black: player_b,
            }
        };

        let now = Utc::now();
        let mut session = MatchSession {
            id,
            players,
            mode,
            status: SessionStatus::Waiting,
            position,
            fog: FogPair::default(),
            clocks: Clocks::new(inner.config.initial_clock_secs(mode)),
            moves: Vec::new(),
            result: None,
            created_at: now,
            last_move_at: now,
            finished_at: None,
        };
        transition(&mut session, SessionStatus::Active);

        let cancel = inner.shutdown.child_token();
        let handle = Arc::new(SessionHandle {
            id,
            state: Mutex::new(LiveMatch {
                session: session.clone(),
                clock: MatchClock::start(Instant::now()),
                cancel: cancel.clone(),
            }),
        });

        match inner.sessions.entry(id) {
            Entry::Occupied(_) => return Err(SessionError::DuplicateSession { session_id: id }),
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
            }
        }

        clock::spawn(
            Arc::downgrade(inner),
            handle,
            inner.config.tick_interval,
            cancel,
        );
        inner.writer.queue(session.clone());

        for color in Color::ALL {
            inner
                .events
                .deliver(players.user(color), session_state(&session, color));
        }

        info!(
            session_id = %id,
            mode = %mode,
            white = %players.white,
            black = %players.black,
            "session created"
        );
        Ok(id)
    }

    /// Submit a move on behalf of `user`.
    #[instrument(skip(self, mv), fields(mv = %mv))]
    pub async fn submit_move(
        &self,
        session_id: SessionId,
        user: UserId,
        mv: Move,
    ) -> Result<MoveOutcome, SessionError> {
        let inner = &self.inner;
        let handle = inner.handle(session_id)?;
        let mut live = handle.state.lock().await;

        ensure_active(&live.session)?;
        let color = participant(&live.session, user)?;
        let turn = live.session.position.turn();
        if color != turn {
            return Err(SessionError::NotYourTurn { expected: turn });
        }

        // The flag fell before the tick noticed.
        if live.clock.unaccounted_secs(Instant::now()) >= live.session.clocks.get(color) {
            let elapsed = live.clock.charge_move(Instant::now());
            live.session.clocks.deduct(color, elapsed);
            inner.broadcast(
                &live.session.players,
                &GatewayEvent::time_update(session_id, &live.session.clocks),
            );
            EngineInner::finish(
                inner,
                &mut live,
                SessionResult::win(color.opposite(), EndReason::Timeout),
            );
            return Err(SessionError::SessionAlreadyFinished { session_id });
        }

        let verdict = inner
            .call_oracle(inner.oracle.validate_move(&live.session.position, &mv))
            .await?;

        // Oracle accepted; from here on the move is committed.
        let elapsed = live.clock.charge_move(Instant::now());
        let remaining = live.session.clocks.deduct(color, elapsed);
        let mode = live.session.mode;

        let fog_reveal = fog::reveal(
            &PlayedMove {
                mode,
                mover: color,
                mv,
                capture: verdict.is_capture,
                position: &verdict.position,
            },
            live.session.fog.get(color),
        );
        live.session
            .fog
            .get_mut(color)
            .reveal_all(fog_reveal.iter().copied());

        let now = Utc::now();
        let ply = u32::try_from(live.session.moves.len() + 1).unwrap_or(u32::MAX);
        live.session.moves.push(MoveRecord {
            ply,
            color,
            mv,
            san: verdict.san.clone(),
            at: now,
            elapsed_secs: elapsed,
        });
        live.session.position = verdict.position.clone();
        live.session.last_move_at = now;

        let terminal = if remaining == 0 {
            Some(SessionResult::win(color.opposite(), EndReason::Timeout))
        } else {
            verdict.terminal().map(|reason| match reason {
                EndReason::Checkmate => SessionResult::win(color, reason),
                _ => SessionResult::draw(reason),
            })
        };

        debug!(
            session_id = %session_id,
            ply,
            san = %verdict.san,
            revealed = fog_reveal.len(),
            elapsed_secs = elapsed,
            "move committed"
        );

        let opponent = color.opposite();
        let session = &live.session;
        inner.events.deliver(
            session.players.user(opponent),
            GatewayEvent::OpponentMove {
                session_id,
                mv,
                fog_reveal: fog_reveal.clone(),
                view: PlayerView::build(opponent, session.fog.get(opponent), &session.position),
            },
        );
        inner.broadcast(
            &session.players,
            &GatewayEvent::time_update(session_id, &session.clocks),
        );

        let clocks = live.session.clocks;
        match terminal {
            Some(result) => EngineInner::finish(inner, &mut live, result),
            None => inner.writer.queue(live.session.clone()),
        }

        Ok(MoveOutcome {
            position: verdict.position,
            san: verdict.san,
            fog_reveal,
            clocks,
            terminal,
        })
    }

    /// Permanently reveal `square` to `user`. Idempotent.
    #[instrument(skip(self))]
    pub async fn reveal_fog(
        &self,
        session_id: SessionId,
        user: UserId,
        square: Square,
    ) -> Result<RevealOutcome, SessionError> {
        let inner = &self.inner;
        let handle = inner.handle(session_id)?;
        let mut live = handle.state.lock().await;

        ensure_active(&live.session)?;
        let color = participant(&live.session, user)?;
        if !live.session.fog.get_mut(color).reveal(square) {
            return Ok(RevealOutcome::AlreadyRevealed);
        }

        debug!(session_id = %session_id, color = %color, square = %square, "square revealed");
        inner.writer.queue(live.session.clone());
        Ok(RevealOutcome::Revealed)
    }

    /// End the session with `user`'s opponent as winner.
    #[instrument(skip(self))]
    pub async fn resign(&self, session_id: SessionId, user: UserId) -> Result<(), SessionError> {
        let inner = &self.inner;
        let handle = inner.handle(session_id)?;
        let mut live = handle.state.lock().await;

        ensure_active(&live.session)?;
        let color = participant(&live.session, user)?;
        EngineInner::finish(
            inner,
            &mut live,
            SessionResult::win(color.opposite(), EndReason::Resignation),
        );
        Ok(())
    }

    /// Client-reported timeout for `user`'s own clock.
    ///
    /// The server clock is brought up to date first. If that runs out the
    /// side to move, the session ends by Timeout whichever player reported.
    /// Otherwise the report is only honored if the reporter's own clock is
    /// exhausted, and `StaleTimeout` is returned when it is not.
    #[instrument(skip(self))]
    pub async fn timeout(&self, session_id: SessionId, user: UserId) -> Result<(), SessionError> {
        let inner = &self.inner;
        let handle = inner.handle(session_id)?;
        let mut live = handle.state.lock().await;

        ensure_active(&live.session)?;
        let color = participant(&live.session, user)?;

        let side = live.session.position.turn();
        let secs = live.clock.charge_tick(Instant::now());
        if secs > 0 {
            let left = live.session.clocks.deduct(side, secs);
            inner.broadcast(
                &live.session.players,
                &GatewayEvent::time_update(session_id, &live.session.clocks),
            );
            // Catching up the clock can flag the side to move, whoever reported.
            if left == 0 {
                EngineInner::finish(
                    inner,
                    &mut live,
                    SessionResult::win(side.opposite(), EndReason::Timeout),
                );
                return Ok(());
            }
        }

        let remaining = live.session.clocks.get(color);
        if remaining > 0 {
            debug!(session_id = %session_id, color = %color, remaining, "stale timeout report");
            return Err(SessionError::StaleTimeout {
                remaining_secs: remaining,
            });
        }

        EngineInner::finish(
            inner,
            &mut live,
            SessionResult::win(color.opposite(), EndReason::Timeout),
        );
        Ok(())
    }

    /// Snapshot of a session held in memory.
    pub async fn get_session(&self, session_id: SessionId) -> Result<MatchSession, SessionError> {
        let handle = self.inner.handle(session_id)?;
        let live = handle.state.lock().await;
        Ok(live.session.clone())
    }

    /// Snapshot of a session, falling back to the persisted copy once it has
    /// been evicted from memory.
    pub async fn find_session(&self, session_id: SessionId) -> Result<MatchSession, SessionError> {
        if let Ok(session) = self.get_session(session_id).await {
            return Ok(session);
        }
        match self.inner.store.load_snapshot(session_id).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(SessionError::SessionNotFound { session_id }),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "snapshot lookup failed");
                Err(SessionError::SessionNotFound { session_id })
            }
        }
    }

    /// A user's persisted sessions, newest first.
    pub async fn recent_sessions(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<MatchSession>, PersistenceError> {
        self.inner.store.list_by_user(user, limit).await
    }

    /// `SessionState` for `user`, as sent on join.
    pub async fn join(
        &self,
        session_id: SessionId,
        user: UserId,
    ) -> Result<GatewayEvent, SessionError> {
        let handle = self.inner.handle(session_id)?;
        let live = handle.state.lock().await;
        let color = participant(&live.session, user)?;
        Ok(session_state(&live.session, color))
    }

    /// Stop every clock and eviction timer and wait for queued snapshots to
    /// be written.
    pub async fn shutdown(&self) {
        info!(sessions = self.inner.sessions.len(), "session engine shutting down");
        self.inner.shutdown.cancel();
        self.inner.writer.flush().await;
    }
}

#[async_trait]
impl SessionFactory for SessionEngine {
    async fn create_session(
        &self,
        player_a: UserId,
        player_b: UserId,
        mode: GameMode,
    ) -> Result<SessionId, SessionError> {
        SessionEngine::create_session(self, player_a, player_b, mode).await
    }
}

impl EngineInner {
    fn handle(&self, session_id: SessionId) -> Result<Arc<SessionHandle>, SessionError> {
        self.sessions
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SessionError::SessionNotFound { session_id })
    }

    /// Run an oracle call bounded by `oracle_timeout`.
    async fn call_oracle<T>(
        &self,
        call: impl Future<Output = Result<T, OracleError>>,
    ) -> Result<T, SessionError> {
        match tokio::time::timeout(self.config.oracle_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(OracleError::Illegal(reason))) => Err(SessionError::IllegalMove { reason }),
            Ok(Err(OracleError::Unavailable(reason))) => {
                Err(SessionError::OracleUnavailable { reason })
            }
            Err(_) => Err(SessionError::OracleUnavailable {
                reason: format!("no answer within {:?}", self.config.oracle_timeout),
            }),
        }
    }

    fn broadcast(&self, players: &Players, event: &GatewayEvent) {
        for color in Color::ALL {
            self.events.deliver(players.user(color), event.clone());
        }
    }

    /// End a session. Caller holds the session lock.
    pub(crate) fn finish(inner: &Arc<Self>, live: &mut LiveMatch, result: SessionResult) {
        let session = &mut live.session;
        if !session.status.can_transition_to(SessionStatus::Finished) {
            return;
        }
        live.cancel.cancel();
        transition(session, SessionStatus::Finished);
        session.result = Some(result);
        session.finished_at = Some(Utc::now());

        let session_id = session.id;
        let players = session.players;
        info!(
            session_id = %session_id,
            reason = %result.reason,
            winner = ?result.winner,
            moves = session.moves.len(),
            "session finished"
        );

        inner.writer.queue(session.clone());
        inner.broadcast(
            &players,
            &GatewayEvent::SessionEnded {
                session_id,
                winner: session.winner(),
                result,
            },
        );

        tokio::spawn(apply_ratings(
            inner.rating.clone(),
            inner.retry.clone(),
            players,
            result,
        ));
        tokio::spawn(evict_after_retention(
            Arc::downgrade(inner),
            session_id,
            inner.config.retention,
            inner.shutdown.clone(),
        ));
    }
}

/// Rating outcome for `color` under `result`.
fn outcome_for(result: SessionResult, color: Color) -> RatingOutcome {
    match result.winner {
        None => RatingOutcome::Draw,
        Some(winner) if winner == color => RatingOutcome::Win,
        Some(_) => RatingOutcome::Loss,
    }
}

async fn apply_ratings(
    rating: Arc<dyn RatingPort>,
    retry: RetryConfig,
    players: Players,
    result: SessionResult,
) {
    for color in Color::ALL {
        let user = players.user(color);
        let outcome = outcome_for(result, color);
        // Exhaustion is already logged.
        let _ = with_backoff(&retry, "apply_result", || rating.apply_result(user, outcome)).await;
    }
}

async fn evict_after_retention(
    engine: Weak<EngineInner>,
    session_id: SessionId,
    retention: Duration,
    shutdown: CancellationToken,
) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(retention) => {
            if let Some(engine) = engine.upgrade() {
                engine.sessions.remove(&session_id);
                debug!(session_id = %session_id, "session evicted");
            }
        }
    }
}

fn transition(session: &mut MatchSession, next: SessionStatus) {
    debug_assert!(
        session.status.can_transition_to(next),
        "illegal transition {} -> {}",
        session.status,
        next
    );
    session.status = next;
}

fn ensure_active(session: &MatchSession) -> Result<(), SessionError> {
    if session.status.is_finished() {
        return Err(SessionError::SessionAlreadyFinished {
            session_id: session.id,
        });
    }
    Ok(())
}

fn participant(session: &MatchSession, user: UserId) -> Result<Color, SessionError> {
    session
        .players
        .color_of(user)
        .ok_or(SessionError::NotInSession)
}

fn session_state(session: &MatchSession, color: Color) -> GatewayEvent {
    let fog = session.fog.get(color);
    GatewayEvent::SessionState {
        session_id: session.id,
        color,
        mode: session.mode,
        status: session.status,
        clocks: session.clocks,
        fog: fog.clone(),
        view: PlayerView::build(color, fog, &session.position),
    }
}
