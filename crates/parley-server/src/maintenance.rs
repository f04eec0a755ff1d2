//! Periodic background sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::abuse::AbuseGuard;
use crate::conversations::ConversationStore;
use crate::mutes::MuteStore;
use crate::quota::QuotaLedger;
use crate::reconcile::{self, SweepReport};
use crate::service::ChatService;

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub conversations: SweepReport,
    pub expired_mutes: usize,
    pub quotas_reset: bool,
    pub idle_rate_states: usize,
    pub idle_locks: usize,
    /// Steps that failed outright.  Each failure is logged and the
    /// remaining steps still run.
    pub failed_steps: usize,
}

pub(crate) async fn sweep(
    conversations: &ConversationStore,
    mutes: &MuteStore,
    quotas: &QuotaLedger,
    abuse: &AbuseGuard,
) -> MaintenanceReport {
    let now = Utc::now();
    let mut report = MaintenanceReport::default();

    match reconcile::reconcile_all(conversations).await {
        Ok(sweep) => report.conversations = sweep,
        Err(e) => {
            report.failed_steps += 1;
            error!(error = %e, "Conversation reconciliation failed");
        }
    }

    match mutes.purge_expired(now) {
        Ok(purged) => report.expired_mutes = purged,
        Err(e) => {
            report.failed_steps += 1;
            error!(error = %e, "Expired mute purge failed");
        }
    }

    match quotas
        .reset_if_new_day(now.with_timezone(&Local).date_naive())
        .await
    {
        Ok(reset) => report.quotas_reset = reset,
        Err(e) => {
            report.failed_steps += 1;
            error!(error = %e, "Daily quota reset failed");
        }
    }

    report.idle_rate_states = abuse.purge_idle(now).await;
    report.idle_locks = conversations.prune_locks();

    info!(
        conversations = report.conversations.conversations,
        failed = report.conversations.failed,
        ghosts = report.conversations.ghosts_removed,
        expired = report.conversations.expired_removed,
        orphans = report.conversations.orphans_removed,
        stray_dirs = report.conversations.stray_directories_removed,
        expired_mutes = report.expired_mutes,
        quotas_reset = report.quotas_reset,
        failed_steps = report.failed_steps,
        "Maintenance sweep complete"
    );
    report
}

/// Run the maintenance sweep every `interval` until the task is aborted.
/// The first tick fires immediately so a restart repairs state right away.
pub fn spawn_maintenance(service: Arc<ChatService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            service.run_maintenance_sweep().await;
        }
    })
}
