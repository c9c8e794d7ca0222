//! Per-match clock accounting and the clock task.
//!
//! Time is charged in whole seconds against a `last_accounted` instant, and
//! both the move commit and the periodic tick charge through it. A second can
//! therefore be charged at most once, whichever of the two sees it first.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{EngineInner, SessionHandle};
use crate::gateway::GatewayEvent;
use crate::types::{EndReason, SessionResult};

/// Whole-second accounting for one match.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MatchClock {
    last_accounted: Instant,
}

impl MatchClock {
    pub(crate) const fn start(now: Instant) -> Self {
        Self {
            last_accounted: now,
        }
    }

    /// Whole seconds elapsed since the last charge.
    pub(crate) fn unaccounted_secs(&self, now: Instant) -> u32 {
        let secs = now.saturating_duration_since(self.last_accounted).as_secs();
        u32::try_from(secs).unwrap_or(u32::MAX)
    }

    /// Charge for a committed move: every whole second so far, and the
    /// sub-second remainder is forgiven. The next tick within the same
    /// second finds nothing to charge.
    pub(crate) fn charge_move(&mut self, now: Instant) -> u32 {
        let secs = self.unaccounted_secs(now);
        self.last_accounted = now;
        secs
    }

    /// Charge for a tick: every whole second so far, keeping the remainder.
    pub(crate) fn charge_tick(&mut self, now: Instant) -> u32 {
        let secs = self.unaccounted_secs(now);
        self.last_accounted += Duration::from_secs(u64::from(secs));
        secs
    }
}

/// Start the clock task for a session.
pub(super) fn spawn(
    engine: Weak<EngineInner>,
    handle: Arc<SessionHandle>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(engine) = engine.upgrade() else {
                break;
            };
            if !tick(&engine, &handle).await {
                break;
            }
        }
        debug!(session_id = %handle.id, "clock stopped");
    });
}

/// One clock tick. Returns false once the session is finished.
async fn tick(engine: &Arc<EngineInner>, handle: &SessionHandle) -> bool {
    let mut live = handle.state.lock().await;
    if live.session.status.is_finished() {
        return false;
    }

    let side = live.session.position.turn();
    let secs = live.clock.charge_tick(Instant::now());
    if secs == 0 {
        trace!(session_id = %handle.id, "tick already accounted");
        return true;
    }

    let remaining = live.session.clocks.deduct(side, secs);
    engine.broadcast(
        &live.session.players,
        &GatewayEvent::time_update(handle.id, &live.session.clocks),
    );
    if remaining == 0 {
        EngineInner::finish(
            engine,
            &mut live,
            SessionResult::win(side.opposite(), EndReason::Timeout),
        );
        return false;
    }
    true
}
