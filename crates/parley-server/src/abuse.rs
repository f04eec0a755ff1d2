//! Sliding-window spam control with escalating mutes.
//!
//! Counters live in memory only; the mutes they produce go through
//! [`MuteStore`] and survive restarts.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use parley_shared::constants::{
    BURST_THRESHOLD, BURST_WINDOW_SECS, LONG_MUTE_SECS, MIN_MESSAGE_GAP_SECS, SHORT_MUTE_SECS,
    WARNINGS_BEFORE_MUTE, WARNING_RESET_SECS,
};
use parley_shared::UserId;

use crate::error::{format_duration, Denial, ServiceError};
use crate::mutes::MuteStore;

#[derive(Debug, Clone, Default)]
struct RateState {
    window: VecDeque<DateTime<Utc>>,
    warnings: usize,
    last_message: Option<DateTime<Utc>>,
    warnings_reset_at: Option<DateTime<Utc>>,
    escalation_level: u32,
}

impl RateState {
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(BURST_WINDOW_SECS);
        while self.window.front().is_some_and(|t| *t < cutoff) {
            self.window.pop_front();
        }
        if self.warnings_reset_at.is_some_and(|deadline| now >= deadline) {
            self.warnings = 0;
            self.escalation_level = 0;
            self.warnings_reset_at = None;
        }
    }

    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        let quiet = self
            .last_message
            .map_or(true, |t| now - t > Duration::seconds(BURST_WINDOW_SECS));
        self.window.is_empty() && quiet && self.warnings_reset_at.is_none()
    }
}

enum Verdict {
    Admit,
    TooFast,
    Mute { duration: Duration, level: u32 },
}

pub struct AbuseGuard {
    states: Mutex<HashMap<UserId, RateState>>,
    mutes: Arc<MuteStore>,
}

impl AbuseGuard {
    pub fn new(mutes: Arc<MuteStore>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            mutes,
        }
    }

    pub async fn check(&self, user: &UserId) -> Result<(), ServiceError> {
        self.check_at(user, Utc::now()).await
    }

    /// Admit or reject one text message from `user` sent at `now`.
    pub async fn check_at(&self, user: &UserId, now: DateTime<Utc>) -> Result<(), ServiceError> {
        let verdict = {
            let mut states = self.states.lock().await;
            let state = states.entry(user.clone()).or_default();
            evaluate(state, now)
        };

        match verdict {
            Verdict::Admit => Ok(()),
            Verdict::TooFast => {
                debug!(user = %user, "Message rejected, too fast");
                Err(Denial::TooFast.into())
            }
            Verdict::Mute { duration, level } => {
                let reason = format!("Spam ({})", format_duration(&duration));
                self.mutes.set_mute(user, duration, &reason, level)?;
                warn!(user = %user, level, "Muted for spamming");
                Err(Denial::SpamMuted { duration }.into())
            }
        }
    }

    pub async fn escalation_level(&self, user: &UserId) -> u32 {
        self.states
            .lock()
            .await
            .get(user)
            .map_or(0, |s| s.escalation_level)
    }

    /// Forget users with nothing left to remember.  Returns how many states
    /// were dropped.
    pub async fn purge_idle(&self, now: DateTime<Utc>) -> usize {
        let mut states = self.states.lock().await;
        let before = states.len();
        states.retain(|_, state| {
            state.prune(now);
            !state.is_idle(now)
        });
        before - states.len()
    }

    pub async fn tracked_users(&self) -> usize {
        self.states.lock().await.len()
    }
}

fn evaluate(state: &mut RateState, now: DateTime<Utc>) -> Verdict {
    if state
        .last_message
        .is_some_and(|last| now - last < Duration::seconds(MIN_MESSAGE_GAP_SECS))
    {
        return Verdict::TooFast;
    }

    state.prune(now);

    if state.window.len() >= BURST_THRESHOLD {
        state.warnings += 1;
        state.warnings_reset_at = Some(now + Duration::seconds(WARNING_RESET_SECS));

        if state.warnings >= WARNINGS_BEFORE_MUTE {
            let duration = if state.escalation_level >= 2 {
                Duration::seconds(LONG_MUTE_SECS)
            } else {
                Duration::seconds(SHORT_MUTE_SECS)
            };
            state.escalation_level += 1;
            state.warnings = 0;
            state.window.clear();
            return Verdict::Mute {
                duration,
                level: state.escalation_level,
            };
        }
        return Verdict::TooFast;
    }

    state.window.push_back(now);
    state.last_message = Some(now);
    Verdict::Admit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use parley_store::Database;
    use tempfile::TempDir;

    fn guard() -> (AbuseGuard, Arc<MuteStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = db::shared(Database::open_at(&dir.path().join("test.db")).unwrap());
        let mutes = Arc::new(MuteStore::new(db));
        (AbuseGuard::new(mutes.clone()), mutes, dir)
    }

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    fn denial(result: Result<(), ServiceError>) -> Denial {
        match result {
            Err(ServiceError::AdmissionDenied(d)) => d,
            other => panic!("expected a denial, got {other:?}"),
        }
    }

    /// Five admitted messages 2s apart, then three rejected attempts.
    /// Returns the time after the cycle and the final denial.
    async fn spam_cycle(guard: &AbuseGuard, start: DateTime<Utc>) -> (DateTime<Utc>, Denial) {
        let mut t = start;
        for _ in 0..5 {
            guard.check_at(&alice(), t).await.unwrap();
            t += Duration::seconds(2);
        }
        let first = denial(guard.check_at(&alice(), t).await);
        assert_eq!(first, Denial::TooFast);
        t += Duration::seconds(2);
        let second = denial(guard.check_at(&alice(), t).await);
        assert_eq!(second, Denial::TooFast);
        t += Duration::seconds(2);
        let last = denial(guard.check_at(&alice(), t).await);
        (t, last)
    }

    #[tokio::test]
    async fn test_min_gap() {
        let (guard, _mutes, _dir) = guard();
        let t0 = Utc::now();
        guard.check_at(&alice(), t0).await.unwrap();
        assert_eq!(
            denial(guard.check_at(&alice(), t0 + Duration::seconds(1)).await),
            Denial::TooFast
        );
        guard
            .check_at(&alice(), t0 + Duration::seconds(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (guard, _mutes, _dir) = guard();
        let mut t = Utc::now();
        for _ in 0..20 {
            guard.check_at(&alice(), t).await.unwrap();
            t += Duration::seconds(7);
        }
        assert_eq!(guard.escalation_level(&alice()).await, 0);
    }

    #[tokio::test]
    async fn test_escalation_scenario() {
        let (guard, mutes, _dir) = guard();
        let start = Utc::now();

        let (t, d) = spam_cycle(&guard, start).await;
        assert_eq!(
            d,
            Denial::SpamMuted {
                duration: Duration::minutes(1)
            }
        );
        assert_eq!(guard.escalation_level(&alice()).await, 1);
        assert!(mutes.is_muted(&alice()).unwrap());

        let (t, d) = spam_cycle(&guard, t + Duration::seconds(61)).await;
        assert_eq!(
            d,
            Denial::SpamMuted {
                duration: Duration::minutes(1)
            }
        );
        assert_eq!(guard.escalation_level(&alice()).await, 2);

        let (_, d) = spam_cycle(&guard, t + Duration::seconds(61)).await;
        assert_eq!(
            d,
            Denial::SpamMuted {
                duration: Duration::hours(1)
            }
        );
        assert_eq!(guard.escalation_level(&alice()).await, 3);

        let record = mutes.active_mute(&alice()).unwrap().unwrap();
        assert_eq!(record.escalation_level, 3);
        assert!(!record.is_admin);
        assert!(record.remaining_at(Utc::now()) > Duration::minutes(59));
    }

    #[tokio::test]
    async fn test_warnings_reset_after_quiet_period() {
        let (guard, _mutes, _dir) = guard();
        let (t, _) = spam_cycle(&guard, Utc::now()).await;
        assert_eq!(guard.escalation_level(&alice()).await, 1);

        guard
            .check_at(&alice(), t + Duration::seconds(WARNING_RESET_SECS + 1))
            .await
            .unwrap();
        assert_eq!(guard.escalation_level(&alice()).await, 0);
    }

    #[tokio::test]
    async fn test_purge_idle() {
        let (guard, _mutes, _dir) = guard();
        let t0 = Utc::now();
        guard.check_at(&alice(), t0).await.unwrap();
        assert_eq!(guard.purge_idle(t0 + Duration::seconds(5)).await, 0);
        assert_eq!(guard.purge_idle(t0 + Duration::seconds(31)).await, 1);
        assert_eq!(guard.tracked_users().await, 0);
    }
}
