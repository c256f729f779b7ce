//! Telegram adapter (teloxide).
//!
//! This crate implements the `relayd-core` MessagingPort over the Telegram
//! Bot API using plain long polling (`getUpdates`), so the core keeps full
//! control of the update offset.

use std::time::Duration;

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{Update, UpdateKind},
};
use tracing::debug;

use relayd_core::{
    config::Config,
    domain::SenderId,
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InboundText, UpdateEnvelope},
    },
    Result,
};

/// Headroom on top of the long-poll timeout before the HTTP client gives up.
const HTTP_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Build a bot whose HTTP timeout outlasts `poll_timeout`.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(cfg.poll_timeout + HTTP_GRACE)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        let mut bot = Bot::with_client(cfg.telegram_bot_token.clone(), client);
        if let Some(raw) = &cfg.telegram_api_url {
            let url = reqwest::Url::parse(raw)
                .map_err(|e| Error::Config(format!("TELEGRAM_API_URL {raw:?}: {e}")))?;
            bot = bot.set_api_url(url);
        }
        Ok(Self::new(bot))
    }

    /// `@username` of the bot, for start-up logs.
    pub async fn username(&self) -> Result<String> {
        let me = self.bot.get_me().await.map_err(Self::map_err)?;
        Ok(me.username().to_string())
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Transport(format!("telegram error: {e}"))
    }
}

/// Reduce a Telegram update to the core envelope.
///
/// New and edited messages are treated alike; the chat id is the sender.
pub fn decode_update(update: &Update) -> UpdateEnvelope {
    let message = match &update.kind {
        UpdateKind::Message(m) | UpdateKind::EditedMessage(m) => Some(InboundText {
            sender: SenderId(m.chat.id.0),
            text: m.text().unwrap_or_default().to_string(),
        }),
        _ => None,
    };

    UpdateEnvelope {
        update_id: i64::from(update.id),
        message,
    }
}

#[async_trait]
impl MessagingPort for TelegramTransport {
    async fn fetch_updates(
        &self,
        floor: Option<i64>,
        poll_timeout: Duration,
    ) -> Result<Vec<UpdateEnvelope>> {
        let timeout_secs = u32::try_from(poll_timeout.as_secs()).unwrap_or(u32::MAX);
        let mut req = self.bot.get_updates().timeout(timeout_secs);
        if let Some(floor) = floor {
            let offset = i32::try_from(floor)
                .map_err(|_| Error::Transport(format!("offset {floor} out of range")))?;
            req = req.offset(offset);
        }

        let updates = req.await.map_err(Self::map_err)?;
        debug!(count = updates.len(), floor = ?floor, "updates fetched");

        let mut envelopes: Vec<UpdateEnvelope> = updates.iter().map(decode_update).collect();
        envelopes.sort_by_key(|u| u.update_id);
        Ok(envelopes)
    }

    async fn send_text(&self, to: SenderId, text: &str) -> Result<()> {
        self.bot
            .send_message(teloxide::types::ChatId(to.0), text.to_string())
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }
}
