use chrono::{DateTime, Duration, Utc};
use tracing::info;

use parley_shared::UserId;
use parley_store::MuteRecord;

use crate::db::{with_db, SharedDb};
use crate::error::ServiceError;

/// Durable mutes, one record per user.  A new mute replaces the previous one.
#[derive(Clone)]
pub struct MuteStore {
    db: SharedDb,
}

impl MuteStore {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    /// Whether `user` has a mute ending after `now`.  Expired records are
    /// left for [`MuteStore::purge_expired`].
    pub fn is_muted_at(&self, user: &UserId, now: DateTime<Utc>) -> Result<bool, ServiceError> {
        Ok(self.active_mute_at(user, now)?.is_some())
    }

    pub fn is_muted(&self, user: &UserId) -> Result<bool, ServiceError> {
        self.is_muted_at(user, Utc::now())
    }

    pub fn active_mute_at(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<MuteRecord>, ServiceError> {
        let record = with_db(&self.db, |db| db.get_mute(user))?;
        Ok(record.filter(|r| r.is_active_at(now)))
    }

    pub fn active_mute(&self, user: &UserId) -> Result<Option<MuteRecord>, ServiceError> {
        self.active_mute_at(user, Utc::now())
    }

    /// Mute issued by the rate limiter.
    pub fn set_mute(
        &self,
        user: &UserId,
        duration: Duration,
        reason: &str,
        escalation_level: u32,
    ) -> Result<MuteRecord, ServiceError> {
        self.write(user, duration, reason, escalation_level, false)
    }

    /// Mute imposed by an administrator.
    pub fn set_admin_mute(
        &self,
        user: &UserId,
        duration: Duration,
        reason: &str,
    ) -> Result<MuteRecord, ServiceError> {
        self.write(user, duration, reason, 0, true)
    }

    /// Lift a mute.  Returns whether a record existed.
    pub fn unmute(&self, user: &UserId) -> Result<bool, ServiceError> {
        let removed = with_db(&self.db, |db| db.delete_mute(user))?;
        if removed {
            info!(user = %user, "Mute lifted");
        }
        Ok(removed)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        with_db(&self.db, |db| db.purge_expired_mutes(now))
    }

    fn write(
        &self,
        user: &UserId,
        duration: Duration,
        reason: &str,
        escalation_level: u32,
        is_admin: bool,
    ) -> Result<MuteRecord, ServiceError> {
        if duration <= Duration::zero() {
            return Err(ServiceError::InvalidInput(
                "Mute duration must be positive".to_string(),
            ));
        }
        let now = Utc::now();
        let record = MuteRecord {
            user_id: user.clone(),
            mute_end: now + duration,
            reason: reason.to_string(),
            escalation_level,
            is_admin,
            created_at: now,
        };
        with_db(&self.db, |db| db.upsert_mute(&record))?;
        info!(
            user = %user,
            until = %record.mute_end,
            escalation_level,
            is_admin,
            "User muted"
        );
        Ok(record)
    }
}
