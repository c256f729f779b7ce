use std::time::Duration;

use async_trait::async_trait;

use crate::{domain::SenderId, messaging::types::UpdateEnvelope, Result};

/// Port over the chat backend's long-poll and send calls.
///
/// Implementations report failures as `Err`; the bot loop decides that a
/// failed fetch is an empty batch and a failed send is a dropped reply.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    /// Long-poll for updates with id >= `floor` (all pending when `None`).
    ///
    /// A negative floor `-n` returns only the newest `n` updates and drops
    /// everything older from the backend queue.
    async fn fetch_updates(
        &self,
        floor: Option<i64>,
        poll_timeout: Duration,
    ) -> Result<Vec<UpdateEnvelope>>;

    /// Plain-text message, no retry.
    async fn send_text(&self, to: SenderId, text: &str) -> Result<()>;
}
