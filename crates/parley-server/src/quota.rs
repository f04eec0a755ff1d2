//! Upload quotas: per-category cooldowns and tiered daily caps.
//!
//! Owners are exempt.  Everyone else needs an approved tier, must respect the
//! cooldown since their last upload of the same category, and must stay
//! under their tier's cap for the trailing 24 hours.  Daily lists are wiped
//! when the local calendar date rolls over; cooldowns survive the wipe.

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use parley_shared::constants::QUOTA_WINDOW_HOURS;
use parley_shared::{UploadCategory, UserId, UserProfile};

use crate::config::QuotaConfig;
use crate::db::{with_db, SharedDb};
use crate::error::{Denial, ServiceError};

pub struct QuotaLedger {
    db: SharedDb,
    config: QuotaConfig,
    /// Last reset date seen, so most checks skip the meta lookup.
    last_reset: RwLock<Option<NaiveDate>>,
}

impl QuotaLedger {
    pub fn new(db: SharedDb, config: QuotaConfig) -> Self {
        Self {
            db,
            config,
            last_reset: RwLock::new(None),
        }
    }

    pub async fn check_upload(
        &self,
        user: &UserId,
        category: UploadCategory,
        profile: &UserProfile,
    ) -> Result<(), ServiceError> {
        self.check_upload_at(user, category, profile, Utc::now())
            .await
    }

    /// Admit one upload at `now` and record it, or explain why not.
    ///
    /// The whole check-and-record runs in one database section, so two
    /// uploads from the same user cannot both take the last slot.
    pub async fn check_upload_at(
        &self,
        user: &UserId,
        category: UploadCategory,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if profile.role.is_unrestricted() {
            return Ok(());
        }

        self.reset_if_new_day(now.with_timezone(&Local).date_naive())
            .await?;

        let cooldown = self.config.cooldown(category);
        let limits = self.config.limits(profile.tier);
        let cutoff = now - Duration::hours(QUOTA_WINDOW_HOURS);

        let verdict = with_db(&self.db, |db| {
            let record = db.load_quota_record(user)?;
            let usage = record.usage(category);

            if let Some(last) = usage.last_upload_at {
                let elapsed = now - last;
                if elapsed < cooldown {
                    return Ok(Err(Denial::Cooldown {
                        category,
                        remaining: cooldown - elapsed,
                    }));
                }
            }

            let Some(limits) = limits else {
                return Ok(Err(Denial::PendingApproval));
            };

            db.prune_quota_uploads(user, category, cutoff)?;
            let used = usage.daily_uploads.iter().filter(|t| **t >= cutoff).count();
            let limit = limits.for_category(category);
            if used >= limit as usize {
                return Ok(Err(Denial::DailyLimit { category, limit }));
            }

            db.record_upload(user, category, now)?;
            Ok(Ok(used + 1))
        })?;

        match verdict {
            Ok(used) => {
                debug!(user = %user, %category, used, "Upload admitted");
                Ok(())
            }
            Err(denial) => {
                debug!(user = %user, %category, reason = %denial, "Upload rejected");
                Err(denial.into())
            }
        }
    }

    /// Clear every daily list if `today` is after the last recorded reset.
    /// Returns whether a reset happened.
    pub async fn reset_if_new_day(&self, today: NaiveDate) -> Result<bool, ServiceError> {
        if self.last_reset.read().await.is_some_and(|d| d >= today) {
            return Ok(false);
        }

        let mut cached = self.last_reset.write().await;
        let last = match *cached {
            Some(d) => Some(d),
            None => with_db(&self.db, |db| db.last_quota_reset())?,
        };
        if last.is_some_and(|d| d >= today) {
            *cached = last;
            return Ok(false);
        }

        let cleared = with_db(&self.db, |db| db.reset_daily_quotas(today))?;
        *cached = Some(today);
        info!(%today, cleared, "Daily upload quotas reset");
        Ok(true)
    }
}
