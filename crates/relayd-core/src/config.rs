use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, relay::Polarity, Result};

/// Typed configuration for the relay daemon.
///
/// Values come from the environment, optionally seeded from a `.env` file in
/// the working directory (existing variables are never overridden).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_api_url: Option<String>,
    pub seed_allowed_users: Vec<i64>,

    // Persistence
    pub state_dir: PathBuf,

    // Relay output
    pub gpio_pin: Option<u32>,
    pub gpio_root: PathBuf,
    pub polarity: Polarity,

    // Loop timing
    pub poll_timeout: Duration,
    pub loop_interval: Duration,
    pub connect_timeout: Duration,
    pub link_probe_addr: String,
    pub restart_delay: Duration,

    pub debug: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_env()
    }

    /// Build the config from the current process environment only.
    pub fn from_env() -> Result<Self> {
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let telegram_api_url = env_str("TELEGRAM_API_URL").and_then(non_empty);
        let seed_allowed_users = parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS"));

        let state_dir = env_path("RELAY_STATE_DIR").unwrap_or_else(|| PathBuf::from("./state"));
        fs::create_dir_all(&state_dir)?;

        let gpio_pin = match env_str("RELAY_GPIO_PIN").and_then(non_empty) {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| {
                Error::Config(format!("RELAY_GPIO_PIN is not a pin number: {raw}"))
            })?),
            None => None,
        };
        let gpio_root =
            env_path("RELAY_GPIO_ROOT").unwrap_or_else(|| PathBuf::from("/sys/class/gpio"));
        let polarity = if env_bool("RELAY_ACTIVE_LOW").unwrap_or(false) {
            Polarity::ActiveLow
        } else {
            Polarity::ActiveHigh
        };

        let poll_timeout = Duration::from_secs(env_u64("POLL_TIMEOUT_S").unwrap_or(20));
        let loop_interval = Duration::from_millis(env_u64("LOOP_INTERVAL_MS").unwrap_or(400));
        let connect_timeout = Duration::from_secs(env_u64("CONNECT_TIMEOUT_S").unwrap_or(25));
        let link_probe_addr = env_str("LINK_PROBE_ADDR")
            .and_then(non_empty)
            .unwrap_or_else(|| "api.telegram.org:443".to_string());
        let restart_delay = Duration::from_secs(env_u64("RESTART_DELAY_S").unwrap_or(5));

        let debug = env_bool("RELAY_DEBUG").unwrap_or(false);

        Ok(Self {
            telegram_bot_token,
            telegram_api_url,
            seed_allowed_users,
            state_dir,
            gpio_pin,
            gpio_root,
            polarity,
            poll_timeout,
            loop_interval,
            connect_timeout,
            link_probe_addr,
            restart_delay,
            debug,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
