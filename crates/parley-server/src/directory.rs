//! Collaborators that own identity and social state.
//!
//! The chat service only asks questions; accounts and friendships are managed
//! elsewhere.  [`MemoryDirectory`] answers both traits from memory and backs
//! embedding and tests.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use parley_shared::{ConversationId, UserId, UserProfile};

/// Social standing of a pair of users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Friends,
    NotFriends,
    Blocked,
}

pub trait UserDirectory: Send + Sync {
    fn profile(&self, user: &UserId) -> Option<UserProfile>;
}

pub trait FriendGraph: Send + Sync {
    /// Must be symmetric in `a` and `b`.
    fn relation(&self, a: &UserId, b: &UserId) -> Relation;
}

#[derive(Default)]
pub struct MemoryDirectory {
    profiles: RwLock<HashMap<UserId, UserProfile>>,
    friends: RwLock<HashSet<ConversationId>>,
    blocked: RwLock<HashSet<ConversationId>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_profile(&self, profile: UserProfile) {
        self.profiles
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(profile.id.clone(), profile);
    }

    /// Make `a` and `b` friends.  Lifts a block between them.
    pub fn befriend(&self, a: &UserId, b: &UserId) {
        let Ok(pair) = ConversationId::between(a, b) else {
            return;
        };
        self.blocked
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&pair);
        self.friends
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pair);
    }

    /// Block the pair.  Ends the friendship.
    pub fn block(&self, a: &UserId, b: &UserId) {
        let Ok(pair) = ConversationId::between(a, b) else {
            return;
        };
        self.friends
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&pair);
        self.blocked
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pair);
    }
}

impl UserDirectory for MemoryDirectory {
    fn profile(&self, user: &UserId) -> Option<UserProfile> {
        self.profiles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user)
            .cloned()
    }
}

impl FriendGraph for MemoryDirectory {
    fn relation(&self, a: &UserId, b: &UserId) -> Relation {
        let Ok(pair) = ConversationId::between(a, b) else {
            return Relation::NotFriends;
        };
        if self
            .blocked
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&pair)
        {
            Relation::Blocked
        } else if self
            .friends
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&pair)
        {
            Relation::Friends
        } else {
            Relation::NotFriends
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    #[test]
    fn test_relations_are_symmetric() {
        let dir = MemoryDirectory::new();
        let (a, b) = (uid("alice"), uid("bob"));
        assert_eq!(dir.relation(&a, &b), Relation::NotFriends);

        dir.befriend(&a, &b);
        assert_eq!(dir.relation(&b, &a), Relation::Friends);

        dir.block(&b, &a);
        assert_eq!(dir.relation(&a, &b), Relation::Blocked);

        dir.befriend(&a, &b);
        assert_eq!(dir.relation(&a, &b), Relation::Friends);
    }

    #[test]
    fn test_profiles() {
        use parley_shared::Role;

        let dir = MemoryDirectory::new();
        assert!(dir.profile(&uid("alice")).is_none());
        dir.upsert_profile(UserProfile {
            id: uid("alice"),
            role: Role::Member,
            tier: 1,
        });
        assert_eq!(dir.profile(&uid("alice")).unwrap().tier, 1);
    }
}
