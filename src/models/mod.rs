pub mod chat;
pub mod websocket;

pub use chat::{
    ConversationRef,
    ConversationSummary,
    Cursor,
    DirectPair,
    Group,
    Message,
    MessageId,
    MessagePreview,
    MessageTarget,
    Page,
    Target,
    UserRef,
    UserRole,
};
pub use websocket::PushEvent;
