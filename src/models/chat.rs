use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

const TEMPORARY_ID_PREFIX: &str = "tmp-";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Volunteer,
    Organization,
    Admin,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub role: UserRole,
}

/// Message identifier. Store ids are hyphenated UUIDs; optimistic ids carry the `tmp-`
/// prefix, which contains non-hex characters and therefore never equals a store id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new_server() -> Self {
        MessageId(Uuid::new_v4().to_string())
    }

    pub fn temporary() -> Self {
        MessageId(format!("{}{}", TEMPORARY_ID_PREFIX, Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageTarget {
    Direct {
        receiver_id: String,
    },
    Group {
        group_id: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender: UserRef,
    pub target: MessageTarget,
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// Local entry shown before the store has confirmed the send.
    pub fn optimistic(sender: UserRef, target: MessageTarget, content: &str) -> Self {
        Self {
            id: MessageId::temporary(),
            content: content.to_string(),
            created_at: Utc::now(),
            sender,
            target,
            is_read: false,
        }
    }

    pub fn conversation_ref(&self) -> ConversationRef {
        match &self.target {
            MessageTarget::Direct { receiver_id } =>
                ConversationRef::direct(&self.sender.id, receiver_id),
            MessageTarget::Group { group_id } => ConversationRef::group(group_id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub member_ids: BTreeSet<String>,
}

impl Group {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.member_ids.contains(user_id)
    }
}

/// What a viewer points at: another user or a group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    Direct(String),
    Group(String),
}

/// Unordered user pair. Always stored sorted so `{a, b}` and `{b, a}` compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[String; 2]", into = "[String; 2]")]
pub struct DirectPair {
    low: String,
    high: String,
}

impl DirectPair {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self { low: a.to_string(), high: b.to_string() }
        } else {
            Self { low: b.to_string(), high: a.to_string() }
        }
    }

    pub fn users(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The counterpart of `user_id`, or `None` when `user_id` is not in the pair.
    pub fn other(&self, user_id: &str) -> Option<&str> {
        if self.low == user_id {
            Some(&self.high)
        } else if self.high == user_id {
            Some(&self.low)
        } else {
            None
        }
    }
}

impl From<[String; 2]> for DirectPair {
    fn from([a, b]: [String; 2]) -> Self {
        DirectPair::new(&a, &b)
    }
}

impl From<DirectPair> for [String; 2] {
    fn from(pair: DirectPair) -> Self {
        [pair.low, pair.high]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationRef {
    Direct {
        participants: DirectPair,
    },
    Group {
        group_id: String,
    },
}

impl ConversationRef {
    pub fn direct(a: &str, b: &str) -> Self {
        ConversationRef::Direct { participants: DirectPair::new(a, b) }
    }

    pub fn group(group_id: &str) -> Self {
        ConversationRef::Group { group_id: group_id.to_string() }
    }

    pub fn for_target(viewer_id: &str, target: &Target) -> Self {
        match target {
            Target::Direct(user_id) => ConversationRef::direct(viewer_id, user_id),
            Target::Group(group_id) => ConversationRef::group(group_id),
        }
    }

    /// The target as seen from `viewer_id`; `None` for a direct pair the viewer is not in.
    pub fn target_for(&self, viewer_id: &str) -> Option<Target> {
        match self {
            ConversationRef::Direct { participants } =>
                participants.other(viewer_id).map(|other| Target::Direct(other.to_string())),
            ConversationRef::Group { group_id } => Some(Target::Group(group_id.clone())),
        }
    }

    /// Message target for a message sent into this conversation by `sender_id`.
    pub fn message_target(&self, sender_id: &str) -> Option<MessageTarget> {
        match self {
            ConversationRef::Direct { participants } =>
                participants
                    .other(sender_id)
                    .map(|other| MessageTarget::Direct { receiver_id: other.to_string() }),
            ConversationRef::Group { group_id } =>
                Some(MessageTarget::Group { group_id: group_id.clone() }),
        }
    }

    /// Stable string key, used by stores to name the conversation log.
    pub fn key(&self) -> String {
        match self {
            ConversationRef::Direct { participants } => {
                let (a, b) = participants.users();
                format!("direct:{}:{}", a, b)
            }
            ConversationRef::Group { group_id } => format!("group:{}", group_id),
        }
    }
}

/// Opaque position in a conversation's history. Callers only pass it back.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub(crate) String);

impl Cursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Cursor {
    fn from(raw: String) -> Self {
        Cursor(raw)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
}

impl Page {
    pub fn empty() -> Self {
        Self { messages: Vec::new(), next_cursor: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MessagePreview {
    const MAX_CHARS: usize = 80;

    pub fn of(message: &Message) -> Self {
        let content = if message.content.chars().count() > Self::MAX_CHARS {
            let mut cut: String = message.content.chars().take(Self::MAX_CHARS).collect();
            cut.push('…');
            cut
        } else {
            message.content.clone()
        };
        Self {
            sender_id: message.sender.id.clone(),
            content,
            created_at: message.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: ConversationRef,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<MessagePreview>,
    pub unread_count: usize,
    pub last_activity_at: DateTime<Utc>,
}
