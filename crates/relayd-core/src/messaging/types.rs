use crate::domain::{SenderId, UpdateId};

/// One inbound update, reduced to what the bot loop needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateEnvelope {
    pub update_id: UpdateId,
    /// `None` for updates that carry neither a message nor an edit.
    pub message: Option<InboundText>,
}

/// Text body of a new or edited message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundText {
    pub sender: SenderId,
    /// Empty when the message had no text (stickers, photos, ...).
    pub text: String,
}

impl UpdateEnvelope {
    pub fn text(update_id: UpdateId, sender: i64, text: impl Into<String>) -> Self {
        Self {
            update_id,
            message: Some(InboundText {
                sender: SenderId(sender),
                text: text.into(),
            }),
        }
    }

    pub fn other(update_id: UpdateId) -> Self {
        Self {
            update_id,
            message: None,
        }
    }
}
