//! Relay actuator: logical on/off over a fixed output polarity.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::{debug, info};

use crate::{errors::Error, Result};

/// Electrical level that energizes the relay coil.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

impl Polarity {
    fn level_for(self, on: bool) -> bool {
        match self {
            Polarity::ActiveHigh => on,
            Polarity::ActiveLow => !on,
        }
    }
}

/// A single digital output line.
pub trait OutputPin: Send + Sync {
    fn set_level(&mut self, high: bool) -> Result<()>;
    fn level(&self) -> Result<bool>;
}

/// Relay driven through an [`OutputPin`]. Callers only see logical state.
pub struct Relay<P> {
    pin: P,
    polarity: Polarity,
}

impl<P: OutputPin> Relay<P> {
    pub fn new(pin: P, polarity: Polarity) -> Self {
        Self { pin, polarity }
    }

    pub fn set_on(&mut self) -> Result<()> {
        self.pin.set_level(self.polarity.level_for(true))
    }

    pub fn set_off(&mut self) -> Result<()> {
        self.pin.set_level(self.polarity.level_for(false))
    }

    pub fn is_on(&self) -> Result<bool> {
        Ok(self.pin.level()? == self.polarity.level_for(true))
    }
}

impl<P: OutputPin + ?Sized> OutputPin for Box<P> {
    fn set_level(&mut self, high: bool) -> Result<()> {
        (**self).set_level(high)
    }

    fn level(&self) -> Result<bool> {
        (**self).level()
    }
}

// ============== In-memory pin ==============

/// Latch with no hardware behind it (dry runs, tests).
///
/// Clones share the same latch so tests can observe the raw level.
#[derive(Clone, Debug, Default)]
pub struct MemoryPin {
    level: Arc<AtomicBool>,
}

impl MemoryPin {
    pub fn new(initial_high: bool) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(initial_high)),
        }
    }

    pub fn is_high(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

impl OutputPin for MemoryPin {
    fn set_level(&mut self, high: bool) -> Result<()> {
        self.level.store(high, Ordering::SeqCst);
        Ok(())
    }

    fn level(&self) -> Result<bool> {
        Ok(self.is_high())
    }
}

// ============== Linux sysfs GPIO ==============

/// GPIO line driven through `/sys/class/gpio`.
#[derive(Debug)]
pub struct SysfsPin {
    value_path: PathBuf,
}

impl SysfsPin {
    /// Export `pin` (if needed) and configure it as an output.
    pub fn open(root: &Path, pin: u32) -> Result<Self> {
        let line_dir = root.join(format!("gpio{pin}"));
        if !line_dir.exists() {
            fs::write(root.join("export"), pin.to_string())
                .map_err(|e| Error::Relay(format!("export gpio{pin}: {e}")))?;
            wait_for(&line_dir.join("direction"))?;
        }

        fs::write(line_dir.join("direction"), "out")
            .map_err(|e| Error::Relay(format!("set gpio{pin} direction: {e}")))?;

        info!(pin, root = %root.display(), "gpio output ready");
        Ok(Self {
            value_path: line_dir.join("value"),
        })
    }

    /// [`SysfsPin::open`] off the async workers; export may sleep for up to
    /// a second waiting on udev.
    pub async fn open_async(root: PathBuf, pin: u32) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::open(&root, pin))
            .await
            .map_err(|e| Error::Relay(format!("gpio{pin} setup task failed: {e}")))?
    }
}

// udev may take a moment to create the attribute files after export.
fn wait_for(path: &Path) -> Result<()> {
    for _ in 0..20 {
        if path.exists() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(50));
    }
    Err(Error::Relay(format!("{} did not appear", path.display())))
}

impl OutputPin for SysfsPin {
    fn set_level(&mut self, high: bool) -> Result<()> {
        let raw = if high { "1" } else { "0" };
        fs::write(&self.value_path, raw)
            .map_err(|e| Error::Relay(format!("write {}: {e}", self.value_path.display())))?;
        debug!(level = raw, "gpio written");
        Ok(())
    }

    fn level(&self) -> Result<bool> {
        let raw = fs::read_to_string(&self.value_path)
            .map_err(|e| Error::Relay(format!("read {}: {e}", self.value_path.display())))?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(Error::Relay(format!("unexpected gpio value {other:?}"))),
        }
    }
}
