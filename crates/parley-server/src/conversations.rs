//! Conversation logs: SQLite on disk, a write-through cache in memory.
//!
//! Every mutation runs under the conversation's lock, writes the whole log to
//! the database in one transaction and only then refreshes the cache, so the
//! cache never holds state the disk does not.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_shared::ConversationId;
use parley_store::Message;

use crate::attachments::AttachmentStore;
use crate::db::{with_db, SharedDb};
use crate::error::ServiceError;
use crate::locks::KeyedLocks;
use crate::reconcile::{self, ConversationSweep, RetentionPolicy};

pub struct ConversationStore {
    db: SharedDb,
    attachments: Arc<AttachmentStore>,
    retention: RetentionPolicy,
    cache: RwLock<HashMap<ConversationId, Vec<Message>>>,
    locks: KeyedLocks<ConversationId>,
}

impl ConversationStore {
    pub fn new(
        db: SharedDb,
        attachments: Arc<AttachmentStore>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            db,
            attachments,
            retention,
            cache: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
        }
    }

    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    /// Append a message and return the stored log, oldest first.
    ///
    /// A message whose id is already in the log is not stored twice.
    pub async fn append(
        &self,
        conversation: &ConversationId,
        message: Message,
    ) -> Result<Vec<Message>, ServiceError> {
        ensure_belongs(conversation, &message)?;

        let _guard = self.locks.lock(conversation).await;
        let (log, _) = self.load_validated(conversation).await?;
        let (log, _) = self.commit_append(conversation, log, message).await?;
        Ok(log)
    }

    /// Write an attachment and append the message referencing it.
    ///
    /// `message.content` is replaced by the generated file name.  The file
    /// never outlives a message that did not make it into the log: a
    /// duplicate id is refused before anything is written, and a failed or
    /// immediately evicted append deletes the file again.
    pub async fn append_attachment(
        &self,
        conversation: &ConversationId,
        mut message: Message,
        ext: &str,
        data: &[u8],
    ) -> Result<(Message, Vec<Message>), ServiceError> {
        ensure_belongs(conversation, &message)?;
        let category = message.kind.category().ok_or_else(|| {
            ServiceError::InvalidInput("Text messages carry no attachment".to_string())
        })?;
        self.attachments.validate(data)?;

        let _guard = self.locks.lock(conversation).await;
        let (log, _) = self.load_validated(conversation).await?;
        if log.iter().any(|m| m.id == message.id) {
            return Err(ServiceError::InvalidInput(format!(
                "Message {} is already stored",
                message.id
            )));
        }

        let name = self
            .attachments
            .store(conversation, category, ext, data)
            .await?;
        message.content = name.clone();

        match self.commit_append(conversation, log, message.clone()).await {
            Ok((log, true)) => Ok((message, log)),
            // Retention already removed the file along with the message.
            Ok((_, false)) => Err(ServiceError::InvalidInput(format!(
                "Message {} falls outside the retention window",
                message.id
            ))),
            Err(e) => {
                if let Err(cleanup) = self.attachments.delete(conversation, category, &name).await {
                    warn!(
                        conversation = %conversation,
                        file = %name,
                        error = %cleanup,
                        "Failed to remove provisional attachment"
                    );
                }
                Err(e)
            }
        }
    }

    /// The ghost-free log, oldest first.  Ghosts found on the way are purged
    /// from disk before returning.
    pub async fn read(&self, conversation: &ConversationId) -> Result<Vec<Message>, ServiceError> {
        let _guard = self.locks.lock(conversation).await;
        let (log, _) = self.load_validated(conversation).await?;
        Ok(log)
    }

    /// Remove one message (and its attachment, best-effort).
    pub async fn delete_by_id(&self, message_id: Uuid) -> Result<Message, ServiceError> {
        let conversation = with_db(&self.db, |db| db.find_message_conversation(message_id))?
            .ok_or_else(|| ServiceError::NotFound(format!("message {message_id}")))?;

        let _guard = self.locks.lock(&conversation).await;
        let (mut log, _) = self.load_validated(&conversation).await?;
        let idx = log
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| ServiceError::NotFound(format!("message {message_id}")))?;
        let removed = log.remove(idx);

        self.persist(&conversation, &log)?;
        self.cache.write().await.insert(conversation.clone(), log);

        if let Some(category) = removed.kind.category() {
            if let Err(e) = self
                .attachments
                .delete(&conversation, category, &removed.content)
                .await
            {
                warn!(
                    conversation = %conversation,
                    file = %removed.content,
                    error = %e,
                    "Failed to delete attachment of removed message"
                );
            }
        }

        debug!(conversation = %conversation, message = %message_id, "Deleted message");
        Ok(removed)
    }

    /// Remove every durable trace of a conversation.  Returns whether
    /// anything existed.
    pub async fn delete_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<bool, ServiceError> {
        let _guard = self.locks.lock(conversation).await;

        self.cache.write().await.remove(conversation);
        let had_record = with_db(&self.db, |db| db.delete_conversation(conversation))?;
        let had_files = self.attachments.remove_conversation(conversation).await?;

        info!(conversation = %conversation, had_record, had_files, "Deleted conversation");
        Ok(had_record || had_files)
    }

    /// Ids of every conversation with a durable record.
    pub fn conversations(&self) -> Result<Vec<ConversationId>, ServiceError> {
        let records = with_db(&self.db, |db| db.list_conversations())?;
        Ok(records.into_iter().map(|c| c.id).collect())
    }

    /// Ghost sweep, retention and orphan sweep for one conversation.
    pub async fn maintain(
        &self,
        conversation: &ConversationId,
    ) -> Result<ConversationSweep, ServiceError> {
        let _guard = self.locks.lock(conversation).await;
        let (log, ghosts_removed) = self.load_validated(conversation).await?;

        let (kept, dropped) = self.retention.apply(log, Utc::now());
        if !dropped.is_empty() {
            self.persist(conversation, &kept)?;
            self.cache
                .write()
                .await
                .insert(conversation.clone(), kept.clone());
            self.delete_files_of(conversation, &dropped).await;
        }

        let orphans_removed =
            reconcile::sweep_orphans(&self.attachments, conversation, &kept).await?;

        Ok(ConversationSweep {
            ghosts_removed,
            expired_removed: dropped.len(),
            orphans_removed,
        })
    }

    /// Remove an attachment directory that has no conversation record.
    /// Returns `false` if the conversation exists after all.
    pub async fn remove_stray_directory(
        &self,
        conversation: &ConversationId,
    ) -> Result<bool, ServiceError> {
        let _guard = self.locks.lock(conversation).await;
        if with_db(&self.db, |db| db.conversation_exists(conversation))? {
            return Ok(false);
        }
        self.attachments.remove_conversation(conversation).await
    }

    /// Forget lock slots of conversations nobody is touching.
    pub fn prune_locks(&self) -> usize {
        self.locks.prune_idle()
    }

    // Caller holds the conversation lock.
    async fn load_validated(
        &self,
        conversation: &ConversationId,
    ) -> Result<(Vec<Message>, usize), ServiceError> {
        let cached = self.cache.read().await.get(conversation).cloned();
        let from_disk = cached.is_none();
        let log = match cached {
            Some(log) => log,
            None => with_db(&self.db, |db| db.load_conversation_log(conversation))?,
        };

        let (kept, ghosts) =
            reconcile::partition_ghosts(&self.attachments, conversation, log).await;
        if !ghosts.is_empty() {
            info!(
                conversation = %conversation,
                removed = ghosts.len(),
                "Purged ghost messages with missing attachments"
            );
            self.persist(conversation, &kept)?;
        }

        if from_disk || !ghosts.is_empty() {
            if kept.is_empty() && ghosts.is_empty() {
                // Nothing stored yet; do not cache unknown conversations.
                return Ok((kept, 0));
            }
            self.cache
                .write()
                .await
                .insert(conversation.clone(), kept.clone());
        }

        Ok((kept, ghosts.len()))
    }

    // Caller holds the conversation lock.  Returns the stored log and whether
    // `message` is part of it.
    async fn commit_append(
        &self,
        conversation: &ConversationId,
        mut log: Vec<Message>,
        message: Message,
    ) -> Result<(Vec<Message>, bool), ServiceError> {
        let id = message.id;
        if log.iter().any(|m| m.id == id) {
            debug!(conversation = %conversation, message = %id, "Message already stored");
            return Ok((log, true));
        }

        log.push(message);
        // Same order as the database query: timestamp, then id.
        log.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let (kept, dropped) = self.retention.apply(log, Utc::now());
        self.persist(conversation, &kept)?;
        self.cache
            .write()
            .await
            .insert(conversation.clone(), kept.clone());

        if !dropped.is_empty() {
            debug!(
                conversation = %conversation,
                evicted = dropped.len(),
                "Retention evicted messages"
            );
            self.delete_files_of(conversation, &dropped).await;
        }

        let stored = kept.iter().any(|m| m.id == id);
        Ok((kept, stored))
    }

    fn persist(&self, conversation: &ConversationId, log: &[Message]) -> Result<(), ServiceError> {
        with_db(&self.db, |db| {
            db.replace_conversation_log(conversation, log, Utc::now())
        })
    }

    async fn delete_files_of(&self, conversation: &ConversationId, messages: &[Message]) {
        for message in messages {
            let Some(category) = message.kind.category() else {
                continue;
            };
            if let Err(e) = self
                .attachments
                .delete(conversation, category, &message.content)
                .await
            {
                warn!(
                    conversation = %conversation,
                    file = %message.content,
                    error = %e,
                    "Failed to delete evicted attachment"
                );
            }
        }
    }
}

fn ensure_belongs(conversation: &ConversationId, message: &Message) -> Result<(), ServiceError> {
    if &message.conversation_id()? != conversation {
        return Err(ServiceError::InvalidInput(format!(
            "Message {} does not belong to conversation {}",
            message.id, conversation
        )));
    }
    Ok(())
}
