//! Consistency between conversation logs and the attachment area.
//!
//! * Ghost sweep: messages whose attachment file is gone are dropped from the
//!   log.  Runs on every load of a log and in the bulk sweep.
//! * Orphan sweep: files no message references are deleted.  Only runs in
//!   the bulk sweep.
//! * Retention: age and count bounds, oldest first.
//!
//! Everything here assumes the caller holds the conversation lock.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use parley_shared::{ConversationId, UploadCategory};
use parley_store::Message;

use crate::attachments::AttachmentStore;
use crate::conversations::ConversationStore;
use crate::error::ServiceError;

/// Age and count bounds of a conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_count: usize,
}

impl RetentionPolicy {
    /// Split a timestamp-ascending log into `(kept, dropped)`.
    ///
    /// Entries older than `now - max_age` go first; if more than `max_count`
    /// remain, the oldest surplus goes too.
    pub fn apply(&self, log: Vec<Message>, now: DateTime<Utc>) -> (Vec<Message>, Vec<Message>) {
        let cutoff = now - self.max_age;
        let (mut kept, mut dropped): (Vec<Message>, Vec<Message>) =
            log.into_iter().partition(|m| m.timestamp >= cutoff);

        if kept.len() > self.max_count {
            let surplus = kept.len() - self.max_count;
            dropped.extend(kept.drain(..surplus));
        }
        (kept, dropped)
    }
}

/// Split a log into `(kept, ghosts)`: attachment messages whose file does
/// not resolve are ghosts.
pub async fn partition_ghosts(
    attachments: &AttachmentStore,
    conversation: &ConversationId,
    log: Vec<Message>,
) -> (Vec<Message>, Vec<Message>) {
    let mut kept = Vec::with_capacity(log.len());
    let mut ghosts = Vec::new();
    for message in log {
        let missing = match message.kind.category() {
            Some(category) => !attachments.exists(conversation, category, &message.content).await,
            None => false,
        };
        if missing {
            ghosts.push(message);
        } else {
            kept.push(message);
        }
    }
    (kept, ghosts)
}

/// Delete files of `conversation` that no message in `log` references.
/// Returns how many files were removed.
pub async fn sweep_orphans(
    attachments: &AttachmentStore,
    conversation: &ConversationId,
    log: &[Message],
) -> Result<usize, ServiceError> {
    let mut removed = 0;
    for category in UploadCategory::ALL {
        let referenced: HashSet<&str> = log
            .iter()
            .filter(|m| m.kind.category() == Some(category))
            .map(|m| m.content.as_str())
            .collect();

        for name in attachments.list(conversation, category).await? {
            if referenced.contains(name.as_str()) {
                continue;
            }
            match attachments.delete(conversation, category, &name).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        conversation = %conversation,
                        file = %name,
                        error = %e,
                        "Failed to remove orphan file"
                    );
                }
            }
        }
    }

    if removed > 0 {
        info!(conversation = %conversation, removed, "Removed orphan attachment files");
    }
    Ok(removed)
}

/// Outcome of maintaining one conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversationSweep {
    pub ghosts_removed: usize,
    pub expired_removed: usize,
    pub orphans_removed: usize,
}

/// Outcome of a bulk reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub conversations: usize,
    pub failed: usize,
    pub ghosts_removed: usize,
    pub expired_removed: usize,
    pub orphans_removed: usize,
    pub stray_directories_removed: usize,
}

impl SweepReport {
    fn add(&mut self, sweep: ConversationSweep) {
        self.conversations += 1;
        self.ghosts_removed += sweep.ghosts_removed;
        self.expired_removed += sweep.expired_removed;
        self.orphans_removed += sweep.orphans_removed;
    }
}

/// Run ghost, retention and orphan sweeps over every conversation, then
/// remove attachment directories that belong to no conversation.
///
/// A failure on one conversation is logged and does not stop the pass.
pub async fn reconcile_all(store: &ConversationStore) -> Result<SweepReport, ServiceError> {
    let mut report = SweepReport::default();

    let known = store.conversations()?;
    for conversation in &known {
        match store.maintain(conversation).await {
            Ok(sweep) => report.add(sweep),
            Err(e) => {
                report.failed += 1;
                warn!(conversation = %conversation, error = %e, "Conversation sweep failed");
            }
        }
    }

    let known: HashSet<&ConversationId> = known.iter().collect();
    for conversation in store.attachments().list_conversations().await? {
        if known.contains(&conversation) {
            continue;
        }
        match store.remove_stray_directory(&conversation).await {
            Ok(true) => report.stray_directories_removed += 1,
            Ok(false) => {}
            Err(e) => {
                report.failed += 1;
                warn!(
                    conversation = %conversation,
                    error = %e,
                    "Failed to remove stray attachment directory"
                );
            }
        }
    }

    Ok(report)
}
