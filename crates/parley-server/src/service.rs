//! The chat service facade.
//!
//! Every inbound text or upload goes through admission control (identity,
//! friendship, mutes, rate limits, quotas) before it touches the
//! conversation store.  Successful mutations are pushed to the live
//! connections of both participants.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_shared::constants::MAX_TEXT_LENGTH;
use parley_shared::{ConversationId, MessageKind, UploadCategory, UserId, UserProfile};
use parley_store::{Database, Message, MuteRecord};

use crate::abuse::AbuseGuard;
use crate::attachments::AttachmentStore;
use crate::config::ServerConfig;
use crate::connections::{ChatEvent, ConnectionRegistry};
use crate::conversations::ConversationStore;
use crate::db::{self, SharedDb};
use crate::directory::{FriendGraph, Relation, UserDirectory};
use crate::error::{Denial, ServiceError};
use crate::maintenance::{self, MaintenanceReport};
use crate::mutes::MuteStore;
use crate::quota::QuotaLedger;
use crate::reconcile::RetentionPolicy;

pub struct ChatService {
    conversations: ConversationStore,
    mutes: Arc<MuteStore>,
    abuse: AbuseGuard,
    quotas: QuotaLedger,
    directory: Arc<dyn UserDirectory>,
    friends: Arc<dyn FriendGraph>,
    connections: Arc<ConnectionRegistry>,
}

impl ChatService {
    /// Wire every component over one database and one attachment tree.
    pub async fn new(
        config: &ServerConfig,
        database: Database,
        directory: Arc<dyn UserDirectory>,
        friends: Arc<dyn FriendGraph>,
    ) -> Result<Self, ServiceError> {
        let db: SharedDb = db::shared(database);
        let attachments = Arc::new(
            AttachmentStore::new(config.attachment_path.clone(), config.max_attachment_size)
                .await?,
        );
        let retention = RetentionPolicy {
            max_age: config.retention,
            max_count: config.max_messages,
        };
        let mutes = Arc::new(MuteStore::new(db.clone()));

        Ok(Self {
            conversations: ConversationStore::new(db.clone(), attachments, retention),
            abuse: AbuseGuard::new(mutes.clone()),
            mutes,
            quotas: QuotaLedger::new(db, config.quota.clone()),
            directory,
            friends,
            connections: Arc::new(ConnectionRegistry::new()),
        })
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn conversation_store(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Store a message without admission control and notify both
    /// participants.  For collaborators that already vetted the sender.
    pub async fn append_message(&self, message: Message) -> Result<Vec<Message>, ServiceError> {
        let conversation = message.conversation_id()?;
        let log = self.conversations.append(&conversation, message.clone()).await?;
        self.notify_created(&conversation, message).await;
        Ok(log)
    }

    /// Admit, store and deliver a text message.
    pub async fn send_text(
        &self,
        sender: &UserId,
        receiver: &UserId,
        text: &str,
    ) -> Result<Message, ServiceError> {
        let conversation = self.admit_sender(sender, receiver).await?;
        validate_text(text)?;

        if let Err(e) = self.check_message_rate(sender).await {
            warn!(user = %sender, reason = %e, "Text message rejected");
            return Err(e);
        }

        let message = Message::new(
            sender.clone(),
            receiver.clone(),
            MessageKind::Text,
            text.to_string(),
        );
        self.conversations
            .append(&conversation, message.clone())
            .await?;
        debug!(conversation = %conversation, message = %message.id, "Text message stored");

        self.notify_created(&conversation, message.clone()).await;
        Ok(message)
    }

    /// Admit, store and deliver an attachment.  `data` has already been
    /// type-checked by the upload layer.
    pub async fn send_attachment(
        &self,
        sender: &UserId,
        receiver: &UserId,
        kind: MessageKind,
        ext: &str,
        data: &[u8],
    ) -> Result<Message, ServiceError> {
        let category = kind.category().ok_or_else(|| {
            ServiceError::InvalidInput("Text messages carry no attachment".to_string())
        })?;

        let conversation = self.admit_sender(sender, receiver).await?;
        self.conversations.attachments().validate(data)?;

        let profile = self.profile(sender)?;
        if let Err(e) = self.quotas.check_upload(sender, category, &profile).await {
            warn!(user = %sender, %category, reason = %e, "Upload rejected");
            return Err(e);
        }

        let draft = Message::new(sender.clone(), receiver.clone(), kind, String::new());
        let (message, _) = self
            .conversations
            .append_attachment(&conversation, draft, ext, data)
            .await?;
        info!(
            conversation = %conversation,
            message = %message.id,
            %category,
            size = data.len(),
            "Attachment stored"
        );

        self.notify_created(&conversation, message.clone()).await;
        Ok(message)
    }

    /// The ghost-free log between two users, oldest first.
    pub async fn read_conversation(
        &self,
        user: &UserId,
        peer: &UserId,
    ) -> Result<Vec<Message>, ServiceError> {
        let conversation = ConversationId::between(user, peer)?;
        self.conversations.read(&conversation).await
    }

    pub async fn delete_message(&self, message_id: Uuid) -> Result<Message, ServiceError> {
        let removed = self.conversations.delete_by_id(message_id).await?;
        let conversation = removed.conversation_id()?;
        self.connections
            .send_to_conversation(
                &conversation,
                &ChatEvent::MessageDeleted {
                    conversation_id: conversation.clone(),
                    message_id,
                },
            )
            .await;
        Ok(removed)
    }

    pub async fn delete_conversation(&self, a: &UserId, b: &UserId) -> Result<bool, ServiceError> {
        let conversation = ConversationId::between(a, b)?;
        let existed = self.conversations.delete_conversation(&conversation).await?;
        if existed {
            self.connections
                .send_to_conversation(
                    &conversation,
                    &ChatEvent::ConversationDeleted {
                        conversation_id: conversation.clone(),
                    },
                )
                .await;
        }
        Ok(existed)
    }

    /// Called once the friend graph records a block: the pair's history and
    /// attachments are destroyed.
    pub async fn block_pair(&self, a: &UserId, b: &UserId) -> Result<bool, ServiceError> {
        info!(a = %a, b = %b, "Pair blocked, destroying conversation");
        self.delete_conversation(a, b).await
    }

    /// Rate-limit one text message.  A mute produced here is pushed to the
    /// user's connections.
    pub async fn check_message_rate(&self, user: &UserId) -> Result<(), ServiceError> {
        let result = self.abuse.check(user).await;
        if let Err(ServiceError::AdmissionDenied(Denial::SpamMuted { .. })) = &result {
            if let Some(record) = self.mutes.active_mute(user)? {
                self.notify_muted(&record).await;
            }
        }
        result
    }

    /// Admit and record one upload by `profile`'s user.
    pub async fn check_upload_quota(
        &self,
        profile: &UserProfile,
        category: UploadCategory,
    ) -> Result<(), ServiceError> {
        self.quotas.check_upload(&profile.id, category, profile).await
    }

    pub fn is_muted(&self, user: &UserId) -> Result<bool, ServiceError> {
        self.mutes.is_muted(user)
    }

    /// Administrator mute.
    pub async fn mute(
        &self,
        user: &UserId,
        duration: Duration,
        reason: &str,
    ) -> Result<MuteRecord, ServiceError> {
        let record = self.mutes.set_admin_mute(user, duration, reason)?;
        self.notify_muted(&record).await;
        Ok(record)
    }

    pub fn unmute(&self, user: &UserId) -> Result<bool, ServiceError> {
        self.mutes.unmute(user)
    }

    /// One maintenance pass.  Failing steps are logged and counted in the
    /// report; they never stop the remaining steps.
    pub async fn run_maintenance_sweep(&self) -> MaintenanceReport {
        maintenance::sweep(&self.conversations, &self.mutes, &self.quotas, &self.abuse).await
    }

    fn profile(&self, user: &UserId) -> Result<UserProfile, ServiceError> {
        self.directory
            .profile(user)
            .ok_or_else(|| ServiceError::NotFound(format!("user {user}")))
    }

    /// Identity, approval, pair, friendship and mute checks shared by text
    /// and attachment sends.
    async fn admit_sender(
        &self,
        sender: &UserId,
        receiver: &UserId,
    ) -> Result<ConversationId, ServiceError> {
        let profile = self.profile(sender)?;
        if !profile.is_approved() {
            return Err(self.deny(sender, Denial::PendingApproval));
        }

        let conversation = ConversationId::between(sender, receiver)?;

        match self.friends.relation(sender, receiver) {
            Relation::Friends => {}
            Relation::NotFriends => return Err(self.deny(sender, Denial::NotFriends)),
            Relation::Blocked => return Err(self.deny(sender, Denial::Blocked)),
        }

        if let Some(record) = self.mutes.active_mute(sender)? {
            let now = chrono::Utc::now();
            return Err(self.deny(
                sender,
                Denial::Muted {
                    remaining: record.remaining_at(now),
                    reason: record.reason,
                },
            ));
        }

        Ok(conversation)
    }

    fn deny(&self, user: &UserId, denial: Denial) -> ServiceError {
        warn!(user = %user, reason = %denial, "Admission denied");
        denial.into()
    }

    async fn notify_created(&self, conversation: &ConversationId, message: Message) {
        self.connections
            .send_to_conversation(
                conversation,
                &ChatEvent::MessageCreated {
                    conversation_id: conversation.clone(),
                    message,
                },
            )
            .await;
    }

    async fn notify_muted(&self, record: &MuteRecord) {
        self.connections
            .send_to_user(
                &record.user_id,
                &ChatEvent::Muted {
                    user_id: record.user_id.clone(),
                    reason: record.reason.clone(),
                    mute_end: record.mute_end.to_rfc3339(),
                },
            )
            .await;
    }
}

fn validate_text(text: &str) -> Result<(), ServiceError> {
    if text.trim().is_empty() {
        return Err(ServiceError::InvalidInput("Message is empty".to_string()));
    }
    let len = text.chars().count();
    if len > MAX_TEXT_LENGTH {
        return Err(ServiceError::InvalidInput(format!(
            "Message too long: {len} characters (max {MAX_TEXT_LENGTH})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use parley_shared::Role;
    use tempfile::TempDir;

    struct Fixture {
        service: ChatService,
        directory: Arc<MemoryDirectory>,
        _dir: TempDir,
    }

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            database_path: dir.path().join("parley.db"),
            attachment_path: dir.path().join("attachments"),
            max_attachment_size: 1024,
            ..ServerConfig::default()
        };
        let database = Database::open_at(&config.database_path).unwrap();

        let directory = Arc::new(MemoryDirectory::new());
        for (name, role, tier) in [
            ("alice", Role::Member, 1),
            ("bob", Role::Member, 1),
            ("carol", Role::Member, 1),
            ("newbie", Role::Member, 0),
            ("boss", Role::Owner, 0),
        ] {
            directory.upsert_profile(UserProfile {
                id: uid(name),
                role,
                tier,
            });
        }
        directory.befriend(&uid("alice"), &uid("bob"));
        directory.befriend(&uid("newbie"), &uid("bob"));
        directory.befriend(&uid("boss"), &uid("bob"));

        let service = ChatService::new(&config, database, directory.clone(), directory.clone())
            .await
            .unwrap();
        Fixture {
            service,
            directory,
            _dir: dir,
        }
    }

    fn denial(err: ServiceError) -> Denial {
        match err {
            ServiceError::AdmissionDenied(d) => d,
            other => panic!("expected a denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_text_stores_and_notifies() {
        let fx = fixture().await;
        let (_, mut alice_rx) = fx.service.connections().register(uid("alice")).await;
        let (_, mut bob_rx) = fx.service.connections().register(uid("bob")).await;

        let sent = fx
            .service
            .send_text(&uid("alice"), &uid("bob"), "hello bob")
            .await
            .unwrap();

        let log = fx
            .service
            .read_conversation(&uid("bob"), &uid("alice"))
            .await
            .unwrap();
        assert_eq!(log, vec![sent.clone()]);

        for rx in [&mut alice_rx, &mut bob_rx] {
            let event: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(event["type"], "message_created");
            assert_eq!(event["message"]["content"], "hello bob");
            assert_eq!(event["message"]["id"], sent.id.to_string());
        }
    }

    #[tokio::test]
    async fn test_admission_denials() {
        let fx = fixture().await;

        let err = fx
            .service
            .send_text(&uid("ghost"), &uid("bob"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = fx
            .service
            .send_text(&uid("newbie"), &uid("bob"), "hi")
            .await
            .unwrap_err();
        assert_eq!(denial(err), Denial::PendingApproval);

        let err = fx
            .service
            .send_text(&uid("alice"), &uid("alice"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let err = fx
            .service
            .send_text(&uid("alice"), &uid("carol"), "hi")
            .await
            .unwrap_err();
        assert_eq!(denial(err), Denial::NotFriends);

        fx.directory.block(&uid("alice"), &uid("bob"));
        let err = fx
            .service
            .send_text(&uid("alice"), &uid("bob"), "hi")
            .await
            .unwrap_err();
        assert_eq!(denial(err), Denial::Blocked);
    }

    #[tokio::test]
    async fn test_owner_skips_tier_gate() {
        let fx = fixture().await;
        fx.service
            .send_text(&uid("boss"), &uid("bob"), "welcome")
            .await
            .unwrap();
        fx.service
            .send_attachment(&uid("boss"), &uid("bob"), MessageKind::Image, "png", b"png")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_text_validation() {
        let fx = fixture().await;
        let err = fx
            .service
            .send_text(&uid("alice"), &uid("bob"), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let long = "x".repeat(MAX_TEXT_LENGTH + 1);
        let err = fx
            .service
            .send_text(&uid("bob"), &uid("alice"), &long)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        assert!(fx
            .service
            .read_conversation(&uid("alice"), &uid("bob"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_invalid_text_does_not_count_against_rate() {
        let fx = fixture().await;
        let long = "x".repeat(MAX_TEXT_LENGTH + 1);
        for bad in ["", "   ", long.as_str()] {
            let err = fx
                .service
                .send_text(&uid("alice"), &uid("bob"), bad)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidInput(_)));
        }

        let sent = fx
            .service
            .send_text(&uid("alice"), &uid("bob"), "hello")
            .await
            .unwrap();
        let log = fx
            .service
            .read_conversation(&uid("alice"), &uid("bob"))
            .await
            .unwrap();
        assert_eq!(log, vec![sent]);
    }

    #[tokio::test]
    async fn test_rapid_messages_are_throttled() {
        let fx = fixture().await;
        fx.service
            .send_text(&uid("alice"), &uid("bob"), "one")
            .await
            .unwrap();
        let err = fx
            .service
            .send_text(&uid("alice"), &uid("bob"), "two")
            .await
            .unwrap_err();
        assert_eq!(denial(err), Denial::TooFast);
    }

    #[tokio::test]
    async fn test_admin_mute_blocks_sending() {
        let fx = fixture().await;
        let (_, mut rx) = fx.service.connections().register(uid("alice")).await;

        fx.service
            .mute(&uid("alice"), Duration::minutes(10), "cool off")
            .await
            .unwrap();
        assert!(fx.service.is_muted(&uid("alice")).unwrap());

        let event: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["type"], "muted");
        assert_eq!(event["reason"], "cool off");

        let err = fx
            .service
            .send_text(&uid("alice"), &uid("bob"), "hi")
            .await
            .unwrap_err();
        match denial(err) {
            Denial::Muted { reason, remaining } => {
                assert_eq!(reason, "cool off");
                assert!(remaining > Duration::minutes(9));
            }
            other => panic!("unexpected denial {other:?}"),
        }

        assert!(fx.service.unmute(&uid("alice")).unwrap());
        fx.service
            .send_text(&uid("alice"), &uid("bob"), "back")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_attachment() {
        let fx = fixture().await;

        let err = fx
            .service
            .send_attachment(&uid("alice"), &uid("bob"), MessageKind::Text, "txt", b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let err = fx
            .service
            .send_attachment(
                &uid("alice"),
                &uid("bob"),
                MessageKind::Image,
                "png",
                &vec![0u8; 2048],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let stored = fx
            .service
            .send_attachment(&uid("alice"), &uid("bob"), MessageKind::Image, "PNG", b"png")
            .await
            .unwrap();
        assert!(stored.content.ends_with(".png"));

        let conv = ConversationId::between(&uid("alice"), &uid("bob")).unwrap();
        let bytes = fx
            .service
            .conversation_store()
            .attachments()
            .read(&conv, UploadCategory::Pictures, &stored.content)
            .await
            .unwrap();
        assert_eq!(bytes, b"png");

        let err = fx
            .service
            .send_attachment(&uid("alice"), &uid("bob"), MessageKind::Image, "png", b"png")
            .await
            .unwrap_err();
        assert!(matches!(denial(err), Denial::Cooldown { .. }));
    }

    #[tokio::test]
    async fn test_delete_message_notifies() {
        let fx = fixture().await;
        let sent = fx
            .service
            .send_text(&uid("alice"), &uid("bob"), "oops")
            .await
            .unwrap();
        let (_, mut bob_rx) = fx.service.connections().register(uid("bob")).await;

        let removed = fx.service.delete_message(sent.id).await.unwrap();
        assert_eq!(removed.id, sent.id);

        let event: serde_json::Value = serde_json::from_str(&bob_rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["type"], "message_deleted");
        assert_eq!(event["messageId"], sent.id.to_string());

        let err = fx.service.delete_message(sent.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_block_pair_destroys_history() {
        let fx = fixture().await;
        fx.service
            .send_text(&uid("alice"), &uid("bob"), "hi")
            .await
            .unwrap();
        fx.service
            .send_attachment(&uid("bob"), &uid("alice"), MessageKind::Audio, "ogg", b"ogg")
            .await
            .unwrap();

        fx.directory.block(&uid("alice"), &uid("bob"));
        assert!(fx.service.block_pair(&uid("bob"), &uid("alice")).await.unwrap());

        assert!(fx
            .service
            .read_conversation(&uid("alice"), &uid("bob"))
            .await
            .unwrap()
            .is_empty());
        assert!(fx
            .service
            .conversation_store()
            .attachments()
            .list_conversations()
            .await
            .unwrap()
            .is_empty());
        assert!(!fx.service.block_pair(&uid("alice"), &uid("bob")).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_message_bypasses_admission() {
        let fx = fixture().await;
        // carol and alice are not friends; append_message does not care.
        let message = Message::new(uid("carol"), uid("alice"), MessageKind::Text, "system".into());
        let log = fx.service.append_message(message.clone()).await.unwrap();
        assert_eq!(log, vec![message]);
    }

    #[tokio::test]
    async fn test_check_upload_quota_owner_bypass() {
        let fx = fixture().await;
        let boss = fx.directory.profile(&uid("boss")).unwrap();
        for _ in 0..10 {
            fx.service
                .check_upload_quota(&boss, UploadCategory::Videos)
                .await
                .unwrap();
        }
        let newbie = fx.directory.profile(&uid("newbie")).unwrap();
        let err = fx
            .service
            .check_upload_quota(&newbie, UploadCategory::Videos)
            .await
            .unwrap_err();
        assert_eq!(denial(err), Denial::PendingApproval);
    }
}
