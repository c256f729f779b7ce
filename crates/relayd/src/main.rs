use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use relayd_core::{
    auth::Authorizer,
    bot::{BotLoop, LoopTiming},
    config::Config,
    link::TcpProbeLink,
    messaging::throttled::{ThrottleConfig, ThrottledMessenger},
    relay::{MemoryPin, OutputPin, Relay, SysfsPin},
    store::FileStore,
    supervisor::{supervise, RestartPolicy},
};
use relayd_telegram::TelegramTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Arc::new(Config::load().context("loading configuration")?);
    relayd_core::logging::init("relayd", cfg.debug)?;

    info!(
        state_dir = %cfg.state_dir.display(),
        gpio_pin = ?cfg.gpio_pin,
        polarity = ?cfg.polarity,
        "relayd starting"
    );

    let policy = RestartPolicy {
        delay: cfg.restart_delay,
        max_runs: None,
    };

    supervise(policy, move |run| {
        let cfg = cfg.clone();
        async move { run_instance(&cfg, run).await }
    })
    .await;

    Ok(())
}

/// Build one instance from scratch and run it until it fails.
async fn run_instance(cfg: &Config, run: u64) -> relayd_core::Result<()> {
    let transport = TelegramTransport::from_config(cfg)?;
    let username = match transport.username().await {
        Ok(name) => {
            info!(run, "bot connected as @{name}");
            Some(name)
        }
        Err(e) => {
            warn!(run, "getMe failed, accepting any @bot suffix: {e}");
            None
        }
    };

    let messenger = Arc::new(ThrottledMessenger::new(
        Arc::new(transport),
        ThrottleConfig::default(),
    ));
    let link = Arc::new(TcpProbeLink::new(
        cfg.link_probe_addr.clone(),
        cfg.connect_timeout,
    ));

    let auth = Authorizer::load(FileStore::new(&cfg.state_dir), &cfg.seed_allowed_users);
    let relay = Relay::new(open_pin(cfg).await?, cfg.polarity);

    let timing = LoopTiming {
        poll_timeout: cfg.poll_timeout,
        loop_interval: cfg.loop_interval,
    };

    let mut bot = BotLoop::new(messenger, link, auth, relay, timing);
    if let Some(name) = username {
        bot = bot.with_username(name);
    }
    bot.run().await
}

async fn open_pin(cfg: &Config) -> relayd_core::Result<Box<dyn OutputPin>> {
    match cfg.gpio_pin {
        Some(pin) => Ok(Box::new(
            SysfsPin::open_async(cfg.gpio_root.clone(), pin).await?,
        )),
        None => {
            warn!("RELAY_GPIO_PIN not set; driving an in-memory relay");
            Ok(Box::new(MemoryPin::default()))
        }
    }
}
