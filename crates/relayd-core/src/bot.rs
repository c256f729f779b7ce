//! Command dispatcher and the poll loop.
//!
//! One `BotLoop` owns every piece of mutable state (authorization, relay,
//! update offset) and processes updates strictly in order; nothing here is
//! shared across tasks.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    auth::{Authorizer, Bootstrap, Revoke},
    commands::{self, Command, HELP_TEXT},
    domain::{SenderId, UpdateId},
    link::Link,
    messaging::{port::MessagingPort, types::UpdateEnvelope},
    relay::{OutputPin, Relay},
    store::StateStore,
    Result,
};

/// Poll used once at start-up to learn the current offset.
const DRAIN_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Negative floor: only the newest update comes back and everything before
/// it is confirmed, however long the queue.
const DRAIN_FLOOR: i64 = -1;

#[derive(Clone, Copy, Debug)]
pub struct LoopTiming {
    pub poll_timeout: Duration,
    pub loop_interval: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(20),
            loop_interval: Duration::from_millis(400),
        }
    }
}

pub struct BotLoop<S, P> {
    messenger: Arc<dyn MessagingPort>,
    link: Arc<dyn Link>,
    auth: Authorizer<S>,
    relay: Relay<P>,
    timing: LoopTiming,
    offset: Option<UpdateId>,
    username: Option<String>,
}

impl<S: StateStore, P: OutputPin> BotLoop<S, P> {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        link: Arc<dyn Link>,
        auth: Authorizer<S>,
        relay: Relay<P>,
        timing: LoopTiming,
    ) -> Self {
        Self {
            messenger,
            link,
            auth,
            relay,
            timing,
            offset: None,
            username: None,
        }
    }

    /// Our own `@username`; commands addressed to other bots are then ignored.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Last processed update id.
    pub fn offset(&self) -> Option<UpdateId> {
        self.offset
    }

    pub fn authorizer(&self) -> &Authorizer<S> {
        &self.auth
    }

    pub fn relay(&self) -> &Relay<P> {
        &self.relay
    }

    /// Run until a fault the loop cannot absorb.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;
        info!("bot running, waiting for commands");
        loop {
            self.tick().await?;
            sleep(self.timing.loop_interval).await;
        }
    }

    /// Connect, force the relay off and skip whatever was queued while offline.
    ///
    /// A connect timeout here is fatal for this instance.
    pub async fn start(&mut self) -> Result<()> {
        self.link.connect().await?;
        self.relay.set_off()?;
        self.drain_backlog().await;
        Ok(())
    }

    async fn drain_backlog(&mut self) {
        match self
            .messenger
            .fetch_updates(Some(DRAIN_FLOOR), DRAIN_POLL_TIMEOUT)
            .await
        {
            Ok(backlog) => {
                if let Some(last) = backlog.iter().map(|u| u.update_id).max() {
                    info!(offset = last, "backlog discarded");
                    self.offset = Some(last);
                }
            }
            Err(e) => warn!("backlog drain failed: {e}"),
        }
    }

    /// One poll cycle: link check, fetch, dispatch in order.
    pub async fn tick(&mut self) -> Result<()> {
        if !self.link.is_connected().await {
            warn!(state = ?self.link.state(), "link down, reconnecting");
            if let Err(e) = self.link.connect().await {
                warn!("reconnect failed, continuing: {e}");
            }
        }

        let floor = self.offset.map(|last| last + 1);
        let updates = match self
            .messenger
            .fetch_updates(floor, self.timing.poll_timeout)
            .await
        {
            Ok(updates) => updates,
            Err(e) => {
                warn!(floor = ?floor, "fetch failed: {e}");
                Vec::new()
            }
        };

        for update in updates {
            self.handle_update(update).await?;
        }
        Ok(())
    }

    async fn handle_update(&mut self, update: UpdateEnvelope) -> Result<()> {
        if let Some(last) = self.offset {
            if update.update_id <= last {
                debug!(update_id = update.update_id, last, "stale update ignored");
                return Ok(());
            }
        }
        self.offset = Some(update.update_id);

        let Some(msg) = update.message else {
            return Ok(());
        };
        let sender = msg.sender;
        debug!(update_id = update.update_id, sender = sender.0, text = %msg.text, "inbound");

        if self.auth.bootstrap(sender) == Bootstrap::BecameAdmin {
            self.reply(sender, "You are now ADMIN and authorized.").await;
        }

        if !self.auth.is_authorized(sender) {
            info!(sender = sender.0, "unauthorized sender");
            let denial = format!(
                "Not authorized. Ask admin to /allow your id.\n{}",
                whoami(sender)
            );
            self.reply(sender, &denial).await;
            return Ok(());
        }

        let command = commands::parse_for(&msg.text, self.username.as_deref());
        if command.is_admin_only() && !self.auth.is_admin(sender) {
            self.reply(sender, UNKNOWN_TEXT).await;
            return Ok(());
        }
        self.dispatch(sender, command).await
    }

    async fn dispatch(&mut self, sender: SenderId, command: Command) -> Result<()> {
        match command {
            Command::Help => self.reply(sender, HELP_TEXT).await,
            Command::WhoAmI => self.reply(sender, &whoami(sender)).await,
            Command::Status => {
                let state = if self.relay.is_on()? { "ON" } else { "OFF" };
                self.reply(sender, &format!("Relay is {state}")).await;
            }
            Command::On => {
                self.relay.set_on()?;
                info!(by = sender.0, "relay on");
                self.broadcast(&format!("Relay: ON (by {sender})")).await;
            }
            Command::Off => {
                self.relay.set_off()?;
                info!(by = sender.0, "relay off");
                self.broadcast(&format!("Relay: OFF (by {sender})")).await;
            }
            Command::Allow(target) => {
                if let Err(e) = self.auth.grant(target) {
                    warn!(target = target.0, "allow-list not persisted: {e}");
                }
                self.reply(sender, &format!("Allowed: {target}")).await;
                self.reply(target, "You have been authorized.").await;
            }
            Command::Revoke(target) => match self.auth.revoke(target) {
                Ok(Revoke::Refused) => self.reply(sender, "Cannot revoke the admin.").await,
                Ok(Revoke::Removed | Revoke::NotPresent) => {
                    self.reply(sender, &format!("Revoked: {target}")).await
                }
                Err(e) => {
                    warn!(target = target.0, "allow-list not persisted: {e}");
                    self.reply(sender, &format!("Revoked: {target}")).await;
                }
            },
            Command::List => {
                let members = self
                    .auth
                    .state()
                    .members()
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                self.reply(sender, &format!("Allowed: {members}")).await;
                if let Some(admin) = self.auth.state().admin() {
                    self.reply(sender, &format!("Admin: {admin}")).await;
                }
            }
            Command::Usage(verb) => self.reply(sender, verb.usage()).await,
            Command::Unknown => self.reply(sender, UNKNOWN_TEXT).await,
            Command::Elsewhere => debug!(sender = sender.0, "addressed to another bot"),
        }
        Ok(())
    }

    /// Best-effort send; a dropped reply is acceptable.
    async fn reply(&self, to: SenderId, text: &str) {
        match self.messenger.send_text(to, text).await {
            Ok(()) => debug!(to = to.0, "sent"),
            Err(e) => warn!(to = to.0, "send failed: {e}"),
        }
    }

    async fn broadcast(&self, text: &str) {
        for member in self.auth.state().members() {
            self.reply(member, text).await;
        }
    }
}

const UNKNOWN_TEXT: &str = "Unknown. Type /help";

fn whoami(sender: SenderId) -> String {
    format!("Your chat id: {sender}")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        errors::Error,
        link::LinkState,
        relay::{MemoryPin, Polarity},
        store::{FileStore, MemoryStore, ALLOWLIST_KEY},
    };

    const DENIED_222: &str = "Not authorized. Ask admin to /allow your id.\nYour chat id: 222";

    #[derive(Default)]
    struct FakeMessenger {
        batches: Mutex<VecDeque<Result<Vec<UpdateEnvelope>>>>,
        floors: Mutex<Vec<(Option<i64>, Duration)>>,
        sends: Mutex<Vec<(i64, String)>>,
        fail_sends: AtomicBool,
    }

    impl FakeMessenger {
        fn push(&self, batch: Vec<UpdateEnvelope>) {
            self.batches.lock().unwrap().push_back(Ok(batch));
        }

        fn push_err(&self) {
            self.batches
                .lock()
                .unwrap()
                .push_back(Err(Error::Transport("getUpdates not ok".to_string())));
        }

        fn take_sends(&self) -> Vec<(i64, String)> {
            std::mem::take(&mut *self.sends.lock().unwrap())
        }

        fn floors(&self) -> Vec<Option<i64>> {
            self.floors.lock().unwrap().iter().map(|(f, _)| *f).collect()
        }
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        async fn fetch_updates(
            &self,
            floor: Option<i64>,
            poll_timeout: Duration,
        ) -> Result<Vec<UpdateEnvelope>> {
            self.floors.lock().unwrap().push((floor, poll_timeout));
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn send_text(&self, to: SenderId, text: &str) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(Error::Transport("sendMessage failed".to_string()));
            }
            self.sends.lock().unwrap().push((to.0, text.to_string()));
            Ok(())
        }
    }

    struct FakeLink {
        up: AtomicBool,
        connect_ok: AtomicBool,
        connects: AtomicUsize,
    }

    impl FakeLink {
        fn up() -> Self {
            Self {
                up: AtomicBool::new(true),
                connect_ok: AtomicBool::new(true),
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Link for FakeLink {
        fn state(&self) -> LinkState {
            if self.up.load(Ordering::SeqCst) {
                LinkState::Connected
            } else {
                LinkState::Disconnected
            }
        }

        async fn is_connected(&self) -> bool {
            self.up.load(Ordering::SeqCst)
        }

        async fn connect(&self) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.connect_ok.load(Ordering::SeqCst) {
                self.up.store(true, Ordering::SeqCst);
                Ok(())
            } else {
                Err(Error::Link("no route".to_string()))
            }
        }
    }

    struct BrokenPin;

    impl OutputPin for BrokenPin {
        fn set_level(&mut self, _high: bool) -> Result<()> {
            Err(Error::Relay("gpio write failed".to_string()))
        }

        fn level(&self) -> Result<bool> {
            Err(Error::Relay("gpio read failed".to_string()))
        }
    }

    struct Harness<S: StateStore> {
        bot: BotLoop<S, MemoryPin>,
        messenger: Arc<FakeMessenger>,
        link: Arc<FakeLink>,
        pin: MemoryPin,
    }

    fn harness_with<S: StateStore>(store: S) -> Harness<S> {
        let messenger = Arc::new(FakeMessenger::default());
        let link = Arc::new(FakeLink::up());
        let pin = MemoryPin::new(true);
        let bot = BotLoop::new(
            messenger.clone(),
            link.clone(),
            Authorizer::load(store, &[]),
            Relay::new(pin.clone(), Polarity::ActiveHigh),
            LoopTiming {
                poll_timeout: Duration::from_secs(20),
                loop_interval: Duration::from_millis(0),
            },
        );
        Harness {
            bot,
            messenger,
            link,
            pin,
        }
    }

    fn harness() -> Harness<MemoryStore> {
        harness_with(MemoryStore::new())
    }

    fn text(id: i64, sender: i64, body: &str) -> UpdateEnvelope {
        UpdateEnvelope::text(id, sender, body)
    }

    fn sent(pairs: &[(i64, &str)]) -> Vec<(i64, String)> {
        pairs.iter().map(|(id, t)| (*id, t.to_string())).collect()
    }

    #[tokio::test]
    async fn start_forces_relay_off_and_discards_backlog() {
        let mut h = harness();
        h.messenger
            .push(vec![text(7, 111, "on"), text(8, 222, "/start")]);

        h.bot.start().await.unwrap();

        assert_eq!(h.bot.offset(), Some(8));
        assert!(!h.pin.is_high());
        assert!(h.messenger.take_sends().is_empty());
        assert_eq!(h.bot.authorizer().state().admin(), None);
        assert_eq!(
            h.messenger.floors.lock().unwrap()[0],
            (Some(-1), Duration::from_secs(1))
        );

        h.bot.tick().await.unwrap();
        assert_eq!(h.messenger.floors(), vec![Some(-1), Some(9)]);
    }

    #[tokio::test]
    async fn start_fails_when_link_never_comes_up() {
        let mut h = harness();
        h.link.up.store(false, Ordering::SeqCst);
        h.link.connect_ok.store(false, Ordering::SeqCst);

        let err = h.bot.start().await.unwrap_err();
        assert!(matches!(err, Error::Link(_)));
    }

    #[tokio::test]
    async fn allow_and_broadcast_scenario() {
        let mut h = harness();
        h.bot.start().await.unwrap();
        assert_eq!(h.bot.offset(), None);

        h.messenger.push(vec![text(1, 111, "/start")]);
        h.bot.tick().await.unwrap();
        assert_eq!(
            h.messenger.take_sends(),
            sent(&[(111, "You are now ADMIN and authorized."), (111, HELP_TEXT)])
        );
        assert!(h.bot.authorizer().is_admin(SenderId(111)));

        h.messenger.push(vec![text(2, 222, "on")]);
        h.bot.tick().await.unwrap();
        assert_eq!(h.messenger.take_sends(), sent(&[(222, DENIED_222)]));
        assert!(!h.bot.relay().is_on().unwrap());

        h.messenger.push(vec![text(3, 111, "/allow 222")]);
        h.bot.tick().await.unwrap();
        assert_eq!(
            h.messenger.take_sends(),
            sent(&[(111, "Allowed: 222"), (222, "You have been authorized.")])
        );
        assert_eq!(
            h.bot.authorizer().state().members(),
            vec![SenderId(111), SenderId(222)]
        );

        h.messenger.push(vec![text(4, 222, "on")]);
        h.bot.tick().await.unwrap();
        assert!(h.bot.relay().is_on().unwrap());
        assert_eq!(
            h.messenger.take_sends(),
            sent(&[(111, "Relay: ON (by 222)"), (222, "Relay: ON (by 222)")])
        );

        h.messenger.push(vec![text(5, 111, "/revoke 222")]);
        h.bot.tick().await.unwrap();
        assert_eq!(h.messenger.take_sends(), sent(&[(111, "Revoked: 222")]));

        h.messenger.push(vec![text(6, 222, "status")]);
        h.bot.tick().await.unwrap();
        assert_eq!(h.messenger.take_sends(), sent(&[(222, DENIED_222)]));
        assert!(h.bot.relay().is_on().unwrap());

        assert_eq!(
            h.messenger.floors(),
            vec![Some(-1), None, Some(2), Some(3), Some(4), Some(5), Some(6)]
        );
    }

    #[tokio::test]
    async fn unauthorized_senders_cannot_mutate_anything() {
        let mut h = harness();
        h.bot.start().await.unwrap();
        h.messenger.push(vec![text(1, 111, "/whoami")]);
        h.bot.tick().await.unwrap();
        h.messenger.take_sends();

        let before = h.bot.authorizer().state().clone();
        let attempts = ["on", "/off", "status", "/allow 222", "/revoke 111", "/list"];
        let batch = attempts
            .iter()
            .enumerate()
            .map(|(i, body)| text(10 + i as i64, 222, body))
            .collect();
        h.messenger.push(batch);
        h.bot.tick().await.unwrap();

        assert_eq!(h.bot.authorizer().state(), &before);
        assert!(!h.bot.relay().is_on().unwrap());
        let sends = h.messenger.take_sends();
        assert_eq!(sends.len(), attempts.len());
        assert!(sends.iter().all(|(to, t)| *to == 222 && t == DENIED_222));
    }

    #[tokio::test]
    async fn on_and_off_are_idempotent_commands() {
        let mut h = harness();
        h.bot.start().await.unwrap();
        h.messenger.push(vec![
            text(1, 111, "on"),
            text(2, 111, "ON"),
            text(3, 111, "/status"),
        ]);
        h.bot.tick().await.unwrap();
        assert!(h.bot.relay().is_on().unwrap());

        h.messenger.push(vec![text(4, 111, "off"), text(5, 111, "/off")]);
        h.bot.tick().await.unwrap();
        assert!(!h.bot.relay().is_on().unwrap());

        let sends = h.messenger.take_sends();
        assert!(sends.contains(&(111, "Relay is ON".to_string())));
        assert_eq!(
            sends.last(),
            Some(&(111, "Relay: OFF (by 111)".to_string()))
        );
    }

    #[tokio::test]
    async fn stale_updates_are_never_dispatched_twice() {
        let mut h = harness();
        h.messenger.push(vec![text(10, 111, "on")]);
        h.bot.start().await.unwrap();
        assert_eq!(h.bot.offset(), Some(10));

        // A misbehaving backend replays ids at or below the offset.
        h.messenger.push(vec![
            text(9, 111, "on"),
            text(10, 111, "on"),
            text(11, 111, "/whoami"),
            text(11, 111, "/whoami"),
        ]);
        h.bot.tick().await.unwrap();

        assert_eq!(h.bot.offset(), Some(11));
        assert!(!h.pin.is_high());
        assert_eq!(
            h.messenger.take_sends(),
            sent(&[
                (111, "You are now ADMIN and authorized."),
                (111, "Your chat id: 111"),
            ])
        );
        assert_eq!(h.messenger.floors(), vec![Some(-1), Some(11)]);
    }

    #[tokio::test]
    async fn fetch_errors_are_an_empty_batch() {
        let mut h = harness();
        h.bot.start().await.unwrap();
        h.messenger.push(vec![text(1, 111, "/start")]);
        h.bot.tick().await.unwrap();
        h.messenger.take_sends();

        h.messenger.push_err();
        h.bot.tick().await.unwrap();
        assert_eq!(h.bot.offset(), Some(1));
        assert!(h.messenger.take_sends().is_empty());

        h.messenger.push(vec![text(2, 111, "status")]);
        h.bot.tick().await.unwrap();
        assert_eq!(h.messenger.take_sends(), sent(&[(111, "Relay is OFF")]));
        assert_eq!(h.messenger.floors(), vec![Some(-1), None, Some(2), Some(2)]);
    }

    #[tokio::test]
    async fn non_text_updates_advance_the_offset_only() {
        let mut h = harness();
        h.bot.start().await.unwrap();
        h.messenger
            .push(vec![UpdateEnvelope::other(1), text(2, 111, "")]);
        h.bot.tick().await.unwrap();

        assert_eq!(h.bot.offset(), Some(2));
        // An empty body still bootstraps, then falls through to unknown.
        assert_eq!(
            h.messenger.take_sends(),
            sent(&[
                (111, "You are now ADMIN and authorized."),
                (111, "Unknown. Type /help"),
            ])
        );
    }

    #[tokio::test]
    async fn admin_commands_are_hidden_from_members() {
        let mut h = harness();
        h.bot.start().await.unwrap();
        h.messenger
            .push(vec![text(1, 111, "/start"), text(2, 111, "/allow 222")]);
        h.bot.tick().await.unwrap();
        h.messenger.take_sends();

        h.messenger.push(vec![
            text(3, 222, "/list"),
            text(4, 222, "/allow 333"),
            text(5, 222, "/revoke 111"),
        ]);
        h.bot.tick().await.unwrap();

        assert_eq!(
            h.messenger.take_sends(),
            sent(&[
                (222, "Unknown. Type /help"),
                (222, "Unknown. Type /help"),
                (222, "Unknown. Type /help"),
            ])
        );
        assert_eq!(
            h.bot.authorizer().state().members(),
            vec![SenderId(111), SenderId(222)]
        );
    }

    #[tokio::test]
    async fn admin_list_usage_and_self_revoke() {
        let mut h = harness();
        h.bot.start().await.unwrap();
        h.messenger.push(vec![
            text(1, 111, "/start"),
            text(2, 111, "/allow 333"),
            text(3, 111, "/allow 222"),
        ]);
        h.bot.tick().await.unwrap();
        h.messenger.take_sends();

        h.messenger.push(vec![
            text(4, 111, "/list"),
            text(5, 111, "/allow bob"),
            text(6, 111, "/revoke"),
            text(7, 111, "/revoke 111"),
            text(8, 111, "/revoke 999"),
            text(9, 111, "dance"),
        ]);
        h.bot.tick().await.unwrap();

        assert_eq!(
            h.messenger.take_sends(),
            sent(&[
                (111, "Allowed: 111, 222, 333"),
                (111, "Admin: 111"),
                (111, "Usage: /allow <chat_id>"),
                (111, "Usage: /revoke <chat_id>"),
                (111, "Cannot revoke the admin."),
                (111, "Revoked: 999"),
                (111, "Unknown. Type /help"),
            ])
        );
    }

    #[tokio::test]
    async fn allow_then_revoke_restores_the_allowlist() {
        let mut h = harness();
        h.bot.start().await.unwrap();
        h.messenger
            .push(vec![text(1, 111, "/start"), text(2, 111, "/allow 444")]);
        h.bot.tick().await.unwrap();
        let before = h.bot.authorizer().state().members();

        h.messenger
            .push(vec![text(3, 111, "/allow 555"), text(4, 111, "/revoke 555")]);
        h.bot.tick().await.unwrap();
        assert_eq!(h.bot.authorizer().state().members(), before);
    }

    #[tokio::test]
    async fn lost_allowlist_with_persisted_admin_reconciles() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut h = harness_with(FileStore::new(dir.path()));
            h.bot.start().await.unwrap();
            h.messenger
                .push(vec![text(1, 111, "/start"), text(2, 111, "/allow 222")]);
            h.bot.tick().await.unwrap();
        }
        let store = FileStore::new(dir.path());
        std::fs::write(store.path_for(ALLOWLIST_KEY), "\u{fffd}garbage").unwrap();

        let mut h = harness_with(FileStore::new(dir.path()));
        h.bot.start().await.unwrap();
        h.messenger
            .push(vec![text(3, 222, "on"), text(4, 111, "on")]);
        h.bot.tick().await.unwrap();

        assert_eq!(h.bot.authorizer().state().admin(), Some(SenderId(111)));
        assert_eq!(h.bot.authorizer().state().members(), vec![SenderId(111)]);
        assert_eq!(
            h.messenger.take_sends(),
            sent(&[(222, DENIED_222), (111, "Relay: ON (by 111)")])
        );
        assert_eq!(
            store.load_set(ALLOWLIST_KEY).unwrap(),
            [111].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn reconnects_best_effort_and_keeps_serving() {
        let mut h = harness();
        h.bot.start().await.unwrap();
        h.link.up.store(false, Ordering::SeqCst);
        h.link.connect_ok.store(false, Ordering::SeqCst);
        let connects_before = h.link.connects.load(Ordering::SeqCst);

        h.messenger.push(vec![text(1, 111, "on")]);
        h.bot.tick().await.unwrap();

        assert_eq!(h.link.connects.load(Ordering::SeqCst), connects_before + 1);
        assert!(h.bot.relay().is_on().unwrap());
    }

    #[tokio::test]
    async fn failed_sends_do_not_stop_state_changes() {
        let mut h = harness();
        h.bot.start().await.unwrap();
        h.messenger.fail_sends.store(true, Ordering::SeqCst);

        h.messenger
            .push(vec![text(1, 111, "/start"), text(2, 111, "/allow 222")]);
        h.bot.tick().await.unwrap();

        assert!(h.bot.authorizer().is_admin(SenderId(111)));
        assert!(h.bot.authorizer().is_authorized(SenderId(222)));
        assert_eq!(h.bot.offset(), Some(2));
    }

    #[tokio::test]
    async fn relay_faults_escape_the_loop() {
        let messenger = Arc::new(FakeMessenger::default());
        let mut bot = BotLoop::new(
            messenger.clone(),
            Arc::new(FakeLink::up()),
            Authorizer::load(MemoryStore::new(), &[]),
            Relay::new(BrokenPin, Polarity::ActiveHigh),
            LoopTiming::default(),
        );

        let err = bot.start().await.unwrap_err();
        assert!(matches!(err, Error::Relay(_)));
    }

    /// Server-side queue with getUpdates semantics: oldest first, at most
    /// `GET_UPDATES_LIMIT` per call, a floor confirms everything below it and
    /// a negative floor keeps only the newest `-floor` updates.
    struct QueuedBackend {
        queue: Mutex<VecDeque<UpdateEnvelope>>,
        sends: Mutex<Vec<(i64, String)>>,
    }

    const GET_UPDATES_LIMIT: usize = 100;

    impl QueuedBackend {
        fn with(updates: impl IntoIterator<Item = UpdateEnvelope>) -> Self {
            Self {
                queue: Mutex::new(updates.into_iter().collect()),
                sends: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MessagingPort for QueuedBackend {
        async fn fetch_updates(
            &self,
            floor: Option<i64>,
            _poll_timeout: Duration,
        ) -> Result<Vec<UpdateEnvelope>> {
            let mut queue = self.queue.lock().unwrap();
            match floor {
                Some(f) if f < 0 => {
                    let keep = usize::try_from(-f).unwrap();
                    while queue.len() > keep {
                        queue.pop_front();
                    }
                }
                Some(f) => queue.retain(|u| u.update_id >= f),
                None => {}
            }
            Ok(queue.iter().take(GET_UPDATES_LIMIT).cloned().collect())
        }

        async fn send_text(&self, to: SenderId, text: &str) -> Result<()> {
            self.sends.lock().unwrap().push((to.0, text.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn long_offline_queue_is_discarded_entirely() {
        let backend = Arc::new(QueuedBackend::with(
            (1..=150).map(|id| text(id, 111, if id % 2 == 0 { "on" } else { "/start" })),
        ));
        let pin = MemoryPin::new(false);
        let mut bot = BotLoop::new(
            backend.clone(),
            Arc::new(FakeLink::up()),
            Authorizer::load(MemoryStore::new(), &[]),
            Relay::new(pin.clone(), Polarity::ActiveHigh),
            LoopTiming::default(),
        );

        bot.start().await.unwrap();
        assert_eq!(bot.offset(), Some(150));

        bot.tick().await.unwrap();
        assert!(!pin.is_high());
        assert!(backend.sends.lock().unwrap().is_empty());
        assert_eq!(bot.authorizer().state().admin(), None);
        assert!(backend.queue.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn commands_for_other_bots_are_ignored() {
        let messenger = Arc::new(FakeMessenger::default());
        let pin = MemoryPin::new(false);
        let mut bot = BotLoop::new(
            messenger.clone(),
            Arc::new(FakeLink::up()),
            Authorizer::load(MemoryStore::new(), &[111]),
            Relay::new(pin.clone(), Polarity::ActiveHigh),
            LoopTiming::default(),
        )
        .with_username("relay_bot");
        bot.start().await.unwrap();

        messenger.push(vec![text(1, 111, "/on@some_other_bot")]);
        bot.tick().await.unwrap();
        assert!(!pin.is_high());
        // Bootstrap still learns the admin; nothing else is said.
        assert_eq!(
            messenger.take_sends(),
            sent(&[(111, "You are now ADMIN and authorized.")])
        );

        messenger.push(vec![text(2, 111, "/on@Relay_Bot")]);
        bot.tick().await.unwrap();
        assert!(pin.is_high());
    }
}
