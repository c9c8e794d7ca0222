//! Matchmaking Queue.
//!
//! One queue per [`GameMode`], each behind its own lock. A periodic pairing
//! pass walks each queue in enqueue order and greedily pairs every entry
//! with the first later entry whose rating is close enough. The accepted
//! rating difference widens the longer a player has waited:
//!
//! ```text
//! acceptable_diff = base_threshold + floor(wait / relax_interval) * relax_step
//! ```
//!
//! Pairs are handed to a [`SessionFactory`] (the Session Engine).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::MatchmakingConfig;
use crate::error::SessionError;
use crate::types::{GameMode, SessionId, UserId};

/// Creates sessions for paired players.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(
        &self,
        player_a: UserId,
        player_b: UserId,
        mode: GameMode,
    ) -> Result<SessionId, SessionError>;
}

/// A player waiting in a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub user_id: UserId,
    pub rating: i32,
    pub enqueued_at: DateTime<Utc>,
    pub mode: GameMode,
}

impl QueueEntry {
    /// Time spent waiting as of `now`.
    #[must_use]
    pub fn wait(&self, now: DateTime<Utc>) -> Duration {
        (now - self.enqueued_at).to_std().unwrap_or_default()
    }
}

/// A pair produced by the pairing pass, earlier entry first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub first: QueueEntry,
    pub second: QueueEntry,
    pub mode: GameMode,
}

/// Rating difference `config` accepts after waiting `wait`.
#[must_use]
pub fn acceptable_diff(config: &MatchmakingConfig, wait: Duration) -> u32 {
    let interval_ms = config.relax_interval.as_millis().max(1);
    let steps = u32::try_from(wait.as_millis() / interval_ms).unwrap_or(u32::MAX);
    config
        .base_threshold
        .saturating_add(steps.saturating_mul(config.relax_step))
}

/// Indices of the pairs one pass makes over `entries`.
///
/// `entries` must already be in enqueue order. Each unpaired entry is paired
/// with the first later unpaired entry within its own acceptable difference.
#[must_use]
pub fn find_pairs(
    entries: &[QueueEntry],
    config: &MatchmakingConfig,
    now: DateTime<Utc>,
) -> Vec<(usize, usize)> {
    let mut paired = vec![false; entries.len()];
    let mut pairs = Vec::new();

    for i in 0..entries.len() {
        if paired[i] {
            continue;
        }
        let p = &entries[i];
        let threshold = acceptable_diff(config, p.wait(now));
        let partner = (i + 1..entries.len()).find(|&j| {
            !paired[j]
                && entries[j].user_id != p.user_id
                && p.rating.abs_diff(entries[j].rating) <= threshold
        });
        if let Some(j) = partner {
            paired[i] = true;
            paired[j] = true;
            pairs.push((i, j));
        }
    }
    pairs
}

/// The two mode queues.
pub struct Matchmaker {
    config: MatchmakingConfig,
    standard: Mutex<Vec<QueueEntry>>,
    blitz: Mutex<Vec<QueueEntry>>,
}

impl Matchmaker {
    #[must_use]
    pub fn new(config: MatchmakingConfig) -> Self {
        Self {
            config,
            standard: Mutex::new(Vec::new()),
            blitz: Mutex::new(Vec::new()),
        }
    }

    fn queue(&self, mode: GameMode) -> &Mutex<Vec<QueueEntry>> {
        match mode {
            GameMode::Standard => &self.standard,
            GameMode::Blitz => &self.blitz,
        }
    }

    /// Add or refresh `user` in the `mode` queue.
    pub fn enqueue(&self, user: UserId, rating: i32, mode: GameMode) {
        self.enqueue_at(user, rating, mode, Utc::now());
    }

    /// [`enqueue`](Self::enqueue) with an explicit timestamp.
    pub fn enqueue_at(&self, user: UserId, rating: i32, mode: GameMode, now: DateTime<Utc>) {
        let entry = QueueEntry {
            user_id: user,
            rating,
            enqueued_at: now,
            mode,
        };
        let mut queue = self.queue(mode).lock();
        queue.retain(|e| e.user_id != user);
        queue.push(entry);
        debug!(user_id = %user, mode = %mode, rating, queued = queue.len(), "enqueued");
    }

    /// Remove `user` from the `mode` queue. Returns whether it was queued.
    pub fn dequeue(&self, user: UserId, mode: GameMode) -> bool {
        let mut queue = self.queue(mode).lock();
        let before = queue.len();
        queue.retain(|e| e.user_id != user);
        let removed = queue.len() != before;
        if removed {
            debug!(user_id = %user, mode = %mode, "dequeued");
        }
        removed
    }

    #[must_use]
    pub fn queue_len(&self, mode: GameMode) -> usize {
        self.queue(mode).lock().len()
    }

    /// Zero-based place of `user` in enqueue order.
    #[must_use]
    pub fn position(&self, user: UserId, mode: GameMode) -> Option<usize> {
        let mut queue = self.queue(mode).lock().clone();
        queue.sort_by_key(|e| e.enqueued_at);
        queue.iter().position(|e| e.user_id == user)
    }

    /// Run the pairing pass on one queue and remove the paired entries.
    pub fn take_pairs(&self, mode: GameMode, now: DateTime<Utc>) -> Vec<Pairing> {
        let mut queue = self.queue(mode).lock();
        // Stable: equal timestamps keep arrival order.
        queue.sort_by_key(|e| e.enqueued_at);

        let pairs = find_pairs(&queue, &self.config, now);
        if pairs.is_empty() {
            return Vec::new();
        }

        let mut taken = vec![false; queue.len()];
        let pairings: Vec<Pairing> = pairs
            .into_iter()
            .map(|(i, j)| {
                taken[i] = true;
                taken[j] = true;
                Pairing {
                    first: queue[i].clone(),
                    second: queue[j].clone(),
                    mode,
                }
            })
            .collect();

        let mut index = 0;
        queue.retain(|_| {
            let keep = !taken[index];
            index += 1;
            keep
        });
        pairings
    }

    /// Put a pair back after session creation failed, unless the player has
    /// queued again in the meantime.
    fn requeue(&self, pairing: &Pairing) {
        let mut queue = self.queue(pairing.mode).lock();
        for entry in [&pairing.first, &pairing.second] {
            if !queue.iter().any(|e| e.user_id == entry.user_id) {
                queue.push(entry.clone());
            }
        }
    }

    /// One pairing pass over both queues. Returns the sessions created.
    #[instrument(skip(self, factory))]
    pub async fn run_pass(&self, factory: &dyn SessionFactory) -> Vec<SessionId> {
        let now = Utc::now();
        let mut created = Vec::new();
        for mode in GameMode::ALL {
            for pairing in self.take_pairs(mode, now) {
                let (a, b) = (pairing.first.user_id, pairing.second.user_id);
                match factory.create_session(a, b, mode).await {
                    Ok(session_id) => {
                        info!(
                            session_id = %session_id,
                            mode = %mode,
                            first = %a,
                            second = %b,
                            diff = pairing.first.rating.abs_diff(pairing.second.rating),
                            "players paired"
                        );
                        created.push(session_id);
                    }
                    Err(e) => {
                        warn!(mode = %mode, error = %e, "session creation failed, requeueing pair");
                        self.requeue(&pairing);
                    }
                }
            }
        }
        created
    }

    /// Run pairing passes every `pairing_interval` until `cancel` fires.
    pub async fn run(self: Arc<Self>, factory: Arc<dyn SessionFactory>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.pairing_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_pass(factory.as_ref()).await;
                }
            }
        }
        debug!("matchmaker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn entry(rating: i32, enqueued_at: DateTime<Utc>) -> QueueEntry {
        QueueEntry {
            user_id: UserId::new(),
            rating,
            enqueued_at,
            mode: GameMode::Standard,
        }
    }

    /// Factory recording every pair it is asked to create.
    #[derive(Default)]
    struct RecordingFactory {
        calls: Mutex<Vec<(UserId, UserId, GameMode)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl SessionFactory for RecordingFactory {
        async fn create_session(
            &self,
            player_a: UserId,
            player_b: UserId,
            mode: GameMode,
        ) -> Result<SessionId, SessionError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SessionError::OracleUnavailable {
                    reason: "down".into(),
                });
            }
            self.calls.lock().push((player_a, player_b, mode));
            Ok(SessionId::new())
        }
    }

    #[test]
    fn test_acceptable_diff_relaxes_with_wait() {
        let config = MatchmakingConfig::default();
        assert_eq!(acceptable_diff(&config, Duration::ZERO), 200);
        assert_eq!(acceptable_diff(&config, Duration::from_secs(9)), 200);
        assert_eq!(acceptable_diff(&config, Duration::from_secs(10)), 250);
        assert_eq!(acceptable_diff(&config, Duration::from_secs(25)), 300);
    }

    #[test]
    fn test_pairs_closest_in_order() {
        let config = MatchmakingConfig::default();
        let entries = vec![entry(1000, t0()), entry(1180, t0()), entry(1450, t0())];
        assert_eq!(find_pairs(&entries, &config, t0()), vec![(0, 1)]);
    }

    #[test]
    fn test_waiting_player_becomes_pairable() {
        let config = MatchmakingConfig::default();
        let early = entry(1500, t0());

        // At enqueue time a 250 gap is out of range.
        let entries = vec![early.clone(), entry(1750, t0())];
        assert!(find_pairs(&entries, &config, t0()).is_empty());

        // After 25 seconds alone the threshold is 300.
        let entries = vec![early, entry(1750, t0() + secs(25))];
        assert_eq!(find_pairs(&entries, &config, t0() + secs(25)), vec![(0, 1)]);
    }

    #[test]
    fn test_greedy_first_acceptable_partner() {
        let config = MatchmakingConfig::default();
        // 1000 takes 1150 (first acceptable), not the closer 1010.
        let entries = vec![
            entry(1000, t0()),
            entry(1150, t0() + secs(1)),
            entry(1010, t0() + secs(2)),
            entry(1160, t0() + secs(3)),
        ];
        assert_eq!(
            find_pairs(&entries, &config, t0() + secs(3)),
            vec![(0, 1), (2, 3)]
        );
    }

    #[test]
    fn test_single_entry_is_never_paired() {
        let config = MatchmakingConfig::default();
        let entries = vec![entry(1200, t0())];
        assert!(find_pairs(&entries, &config, t0() + secs(600)).is_empty());
    }

    #[test]
    fn test_enqueue_upserts_and_refreshes() {
        let mm = Matchmaker::new(MatchmakingConfig::default());
        let alice = UserId::new();
        let bob = UserId::new();
        mm.enqueue_at(alice, 1200, GameMode::Blitz, t0());
        mm.enqueue_at(bob, 1300, GameMode::Blitz, t0() + secs(1));
        assert_eq!(mm.position(alice, GameMode::Blitz), Some(0));

        mm.enqueue_at(alice, 1210, GameMode::Blitz, t0() + secs(2));
        assert_eq!(mm.queue_len(GameMode::Blitz), 2);
        assert_eq!(mm.position(alice, GameMode::Blitz), Some(1));
        assert_eq!(mm.position(bob, GameMode::Blitz), Some(0));
        assert_eq!(mm.queue_len(GameMode::Standard), 0);
    }

    #[test]
    fn test_dequeue_absent_is_noop() {
        let mm = Matchmaker::new(MatchmakingConfig::default());
        let alice = UserId::new();
        assert!(!mm.dequeue(alice, GameMode::Standard));
        mm.enqueue(alice, 1200, GameMode::Standard);
        assert!(mm.dequeue(alice, GameMode::Standard));
        assert_eq!(mm.queue_len(GameMode::Standard), 0);
    }

    #[test]
    fn test_take_pairs_removes_paired_entries() {
        let mm = Matchmaker::new(MatchmakingConfig::default());
        let users: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();
        for (user, rating) in users.iter().zip([1000, 1180, 1450]) {
            mm.enqueue_at(*user, rating, GameMode::Standard, t0());
        }

        let pairs = mm.take_pairs(GameMode::Standard, t0());
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].first.user_id, users[0]);
        assert_eq!(pairs[0].second.user_id, users[1]);
        assert_eq!(mm.queue_len(GameMode::Standard), 1);
        assert_eq!(mm.position(users[2], GameMode::Standard), Some(0));
    }

    #[tokio::test]
    async fn test_run_pass_creates_sessions() {
        let mm = Matchmaker::new(MatchmakingConfig::default());
        let factory = RecordingFactory::default();
        let (a, b) = (UserId::new(), UserId::new());
        mm.enqueue(a, 1200, GameMode::Blitz);
        mm.enqueue(b, 1250, GameMode::Blitz);

        let created = mm.run_pass(&factory).await;
        assert_eq!(created.len(), 1);
        assert_eq!(*factory.calls.lock(), vec![(a, b, GameMode::Blitz)]);
        assert_eq!(mm.queue_len(GameMode::Blitz), 0);
    }

    #[tokio::test]
    async fn test_failed_creation_requeues_pair() {
        let mm = Matchmaker::new(MatchmakingConfig::default());
        let factory = RecordingFactory::default();
        factory.fail.store(true, Ordering::SeqCst);
        let (a, b) = (UserId::new(), UserId::new());
        mm.enqueue(a, 1200, GameMode::Standard);
        mm.enqueue(b, 1200, GameMode::Standard);

        assert!(mm.run_pass(&factory).await.is_empty());
        assert_eq!(mm.queue_len(GameMode::Standard), 2);
        assert_eq!(mm.position(a, GameMode::Standard), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_stops_on_cancel() {
        let config = MatchmakingConfig {
            pairing_interval: Duration::from_secs(5),
            ..Default::default()
        };
        let mm = Arc::new(Matchmaker::new(config));
        let factory = Arc::new(RecordingFactory::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(mm.clone().run(factory.clone(), cancel.clone()));

        mm.enqueue(UserId::new(), 1200, GameMode::Standard);
        mm.enqueue(UserId::new(), 1210, GameMode::Standard);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(factory.calls.lock().len(), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
