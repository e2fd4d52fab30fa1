//! Who may talk to the bot.

use std::collections::HashSet;

use sdbot_core::types::{ChatId, UserId};
use sdbot_telegram::types::{ChatKind, Message};

/// Allow-lists for private chats, admins and group chats.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    users: HashSet<UserId>,
    admins: Vec<UserId>,
    groups: HashSet<ChatId>,
}

impl AccessPolicy {
    /// Admins are added to the allowed users.
    pub fn new(users: Vec<UserId>, admins: Vec<UserId>, groups: Vec<ChatId>) -> Self {
        let mut allowed: HashSet<UserId> = users.into_iter().collect();
        allowed.extend(admins.iter().copied());
        Self {
            users: allowed,
            admins,
            groups: groups.into_iter().collect(),
        }
    }

    pub fn allows_private(&self, user_id: UserId) -> bool {
        self.users.contains(&user_id)
    }

    pub fn allows_group(&self, chat_id: ChatId) -> bool {
        self.groups.contains(&chat_id)
    }

    /// Private chats are checked by sender, everything else by chat id.
    pub fn allows(&self, message: &Message) -> bool {
        match message.chat.kind {
            ChatKind::Private => message
                .sender_id()
                .is_some_and(|user_id| self.allows_private(user_id)),
            _ => self.allows_group(message.chat.id),
        }
    }

    /// Admin ids in configuration order.
    pub fn admins(&self) -> &[UserId] {
        &self.admins
    }
}
