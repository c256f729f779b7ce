//! Restart policy for the daemon.
//!
//! Each run builds every in-memory component from scratch (durable state is
//! reloaded by the factory) and runs it on its own task. Whatever ends that
//! task, an error or a panic, the supervisor logs it, waits, and starts over.

use std::{collections::VecDeque, future::Future, time::Duration};

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::Result;

#[derive(Clone, Copy, Debug)]
pub struct RestartPolicy {
    pub delay: Duration,
    /// Stop after this many instance runs (`None` = forever).
    pub max_runs: Option<u64>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_runs: None,
        }
    }
}

/// Exits kept for inspection; older ones are dropped.
const EXIT_HISTORY: usize = 16;

/// How one instance run ended.
#[derive(Debug)]
pub enum Exit {
    Returned,
    Failed(crate::Error),
    Panicked(String),
}

/// What a bounded supervision left behind.
#[derive(Debug, Default)]
pub struct Supervision {
    pub runs: u64,
    /// The most recent exits, oldest first.
    pub recent: VecDeque<Exit>,
}

/// Run instances produced by `factory` under `policy`.
///
/// Returns only when `policy.max_runs` is exhausted.
pub async fn supervise<F, Fut>(policy: RestartPolicy, mut factory: F) -> Supervision
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut history = Supervision::default();
    let mut run: u64 = 0;
    loop {
        run += 1;
        info!(run, "starting instance");

        let exit = match tokio::spawn(factory(run)).await {
            Ok(Ok(())) => {
                warn!(run, "instance returned");
                Exit::Returned
            }
            Ok(Err(e)) => {
                error!(run, "fatal error: {e}");
                Exit::Failed(e)
            }
            Err(join) => {
                let reason = if join.is_panic() {
                    panic_message(join.into_panic())
                } else {
                    "instance task cancelled".to_string()
                };
                error!(run, "instance panicked: {reason}");
                Exit::Panicked(reason)
            }
        };
        history.runs = run;
        if history.recent.len() == EXIT_HISTORY {
            history.recent.pop_front();
        }
        history.recent.push_back(exit);

        if policy.max_runs.is_some_and(|max| run >= max) {
            return history;
        }
        sleep(policy.delay).await;
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}
