use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::SenderId,
    messaging::{port::MessagingPort, types::UpdateEnvelope},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two sends (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// No longer constrains anything once its next slot has passed.
    fn is_idle(&self, now: Instant) -> bool {
        self.next <= now
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that spaces outbound sends.
///
/// Broadcasts fan out to every allowed chat in one burst; this keeps them
/// under Telegram's flood limits. Polling is passed through untouched.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<i64, IntervalLimiter>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn throttle_chat(&self, chat_id: i64) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let mut map = self.per_chat.lock().await;
            // Every denied stranger gets a reply; do not keep them forever.
            let now = Instant::now();
            map.retain(|_, limiter| !limiter.is_idle(now));
            map.entry(chat_id)
                .or_insert_with(|| IntervalLimiter::new(self.cfg.per_chat_min_interval))
                .reserve()
        };

        let wait = global_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    async fn fetch_updates(
        &self,
        floor: Option<i64>,
        poll_timeout: Duration,
    ) -> Result<Vec<UpdateEnvelope>> {
        self.inner.fetch_updates(floor, poll_timeout).await
    }

    async fn send_text(&self, to: SenderId, text: &str) -> Result<()> {
        self.throttle_chat(to.0).await;
        self.inner.send_text(to, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        sends: StdMutex<Vec<(i64, Instant)>>,
    }

    #[async_trait::async_trait]
    impl MessagingPort for Recorder {
        async fn fetch_updates(
            &self,
            floor: Option<i64>,
            _poll_timeout: Duration,
        ) -> Result<Vec<UpdateEnvelope>> {
            Ok(vec![UpdateEnvelope::other(floor.unwrap_or(0))])
        }

        async fn send_text(&self, to: SenderId, _text: &str) -> Result<()> {
            self.sends.lock().unwrap().push((to.0, Instant::now()));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_sends_to_the_same_chat() {
        let inner = Arc::new(Recorder::default());
        let throttled = ThrottledMessenger::new(
            inner.clone(),
            ThrottleConfig {
                global_min_interval: Duration::from_millis(10),
                per_chat_min_interval: Duration::from_millis(500),
            },
        );

        throttled.send_text(SenderId(1), "a").await.unwrap();
        throttled.send_text(SenderId(2), "b").await.unwrap();
        throttled.send_text(SenderId(1), "c").await.unwrap();

        let sends = inner.sends.lock().unwrap().clone();
        assert_eq!(sends.len(), 3);
        let chat1_gap = sends[2].1.duration_since(sends[0].1);
        assert!(chat1_gap >= Duration::from_millis(500), "{chat1_gap:?}");
        let global_gap = sends[1].1.duration_since(sends[0].1);
        assert!(global_gap >= Duration::from_millis(10), "{global_gap:?}");
        assert!(global_gap < Duration::from_millis(500), "{global_gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_chat_limiters_are_evicted() {
        let throttled = ThrottledMessenger::new(
            Arc::new(Recorder::default()),
            ThrottleConfig {
                global_min_interval: Duration::from_millis(1),
                per_chat_min_interval: Duration::from_millis(500),
            },
        );

        for chat in 1..=50 {
            throttled.send_text(SenderId(chat), "denied").await.unwrap();
        }
        assert_eq!(throttled.per_chat.lock().await.len(), 50);

        tokio::time::advance(Duration::from_secs(1)).await;
        throttled.send_text(SenderId(99), "hi").await.unwrap();
        assert_eq!(throttled.per_chat.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn fetch_is_passed_through() {
        let throttled = ThrottledMessenger::new(
            Arc::new(Recorder::default()),
            ThrottleConfig::default(),
        );
        let got = throttled
            .fetch_updates(Some(42), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(got, vec![UpdateEnvelope::other(42)]);
    }
}
