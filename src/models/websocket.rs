use serde::{ Serialize, Deserialize };

use super::chat::{ ConversationRef, Message };

/// Frames pushed from the server on a client's notification channel. Receivers treat
/// every frame as "something changed, refetch", never as state to apply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushEvent {
    #[serde(rename = "new_message")] NewMessage {
        message: Message,
    },
    #[serde(rename = "message_read")] MessageRead {
        conversation: ConversationRef,
        reader_id: String,
    },
}

impl PushEvent {
    pub fn conversation(&self) -> ConversationRef {
        match self {
            PushEvent::NewMessage { message } => message.conversation_ref(),
            PushEvent::MessageRead { conversation, .. } => conversation.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{ MessageTarget, UserRef, UserRole };

    #[test]
    fn frames_use_type_and_data_envelope() {
        let event = PushEvent::MessageRead {
            conversation: ConversationRef::group("g1"),
            reader_id: "alice".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message_read");
        assert_eq!(json["data"]["conversation"]["kind"], "group");
        assert_eq!(json["data"]["conversation"]["group_id"], "g1");
    }

    #[test]
    fn new_message_frame_identifies_its_conversation() {
        let message = Message::optimistic(
            UserRef {
                id: "bob".into(),
                display_name: "Bob".into(),
                avatar: None,
                role: UserRole::Organization,
            },
            MessageTarget::Direct { receiver_id: "alice".into() },
            "hello"
        );
        let text = serde_json::to_string(&(PushEvent::NewMessage { message })).unwrap();
        let parsed: PushEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.conversation(), ConversationRef::direct("alice", "bob"));
    }

    #[test]
    fn unknown_frame_types_are_rejected() {
        assert!(serde_json::from_str::<PushEvent>(r#"{"type":"typing","data":{}}"#).is_err());
    }
}
