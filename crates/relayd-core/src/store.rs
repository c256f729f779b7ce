//! Durable state: the admin identity and the allow-list.
//!
//! Records are small text files in a state directory. A missing file is a
//! fresh install, not an error; unreadable or malformed content surfaces as
//! [`Error::Corrupt`] so callers can decide how to degrade.

use std::{
    collections::{BTreeSet, HashMap},
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::debug;

use crate::{errors::Error, Result};

/// Record holding the admin chat id.
pub const ADMIN_KEY: &str = "admin";
/// Record holding the authorized chat ids.
pub const ALLOWLIST_KEY: &str = "allowlist";

/// Key-value style persistence for integer sets and scalars.
pub trait StateStore: Send + Sync {
    /// Missing record → empty set.
    fn load_set(&self, key: &str) -> Result<BTreeSet<i64>>;
    fn save_set(&self, key: &str, values: &BTreeSet<i64>) -> Result<()>;

    /// Missing record → `None`.
    fn load_scalar(&self, key: &str) -> Result<Option<i64>>;
    fn save_scalar(&self, key: &str, value: i64) -> Result<()>;
}

/// File-backed store: one `<key>.txt` per record under `dir`.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.txt"))
    }

    fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(txt) => Ok(Some(txt)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Write to a temp file beside the target, fsync, then rename over it.
    ///
    /// A crash at any point leaves either the old or the new content.
    fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        debug!(path = %path.display(), "state record written");
        Ok(())
    }
}

impl StateStore for FileStore {
    fn load_set(&self, key: &str) -> Result<BTreeSet<i64>> {
        let path = self.path_for(key);
        let Some(txt) = self.read_optional(&path)? else {
            return Ok(BTreeSet::new());
        };
        parse_set(&txt).map_err(|reason| Error::Corrupt { path, reason })
    }

    fn save_set(&self, key: &str, values: &BTreeSet<i64>) -> Result<()> {
        self.write_atomic(&self.path_for(key), &format_set(values))
    }

    fn load_scalar(&self, key: &str) -> Result<Option<i64>> {
        let path = self.path_for(key);
        let Some(txt) = self.read_optional(&path)? else {
            return Ok(None);
        };
        let trimmed = txt.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<i64>()
            .map(Some)
            .map_err(|e| Error::Corrupt {
                path,
                reason: format!("{trimmed:?}: {e}"),
            })
    }

    fn save_scalar(&self, key: &str, value: i64) -> Result<()> {
        self.write_atomic(&self.path_for(key), &value.to_string())
    }
}

fn parse_set(txt: &str) -> std::result::Result<BTreeSet<i64>, String> {
    txt.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.parse::<i64>().map_err(|e| format!("{l:?}: {e}")))
        .collect()
}

fn format_set(values: &BTreeSet<i64>) -> String {
    let mut out = String::new();
    for v in values {
        out.push_str(&v.to_string());
        out.push('\n');
    }
    out
}

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, BTreeSet<i64>>>,
    scalars: Mutex<HashMap<String, i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load_set(&self, key: &str) -> Result<BTreeSet<i64>> {
        let sets = self
            .sets
            .lock()
            .map_err(|_| Error::External("memory store poisoned".to_string()))?;
        Ok(sets.get(key).cloned().unwrap_or_default())
    }

    fn save_set(&self, key: &str, values: &BTreeSet<i64>) -> Result<()> {
        let mut sets = self
            .sets
            .lock()
            .map_err(|_| Error::External("memory store poisoned".to_string()))?;
        sets.insert(key.to_string(), values.clone());
        Ok(())
    }

    fn load_scalar(&self, key: &str) -> Result<Option<i64>> {
        let scalars = self
            .scalars
            .lock()
            .map_err(|_| Error::External("memory store poisoned".to_string()))?;
        Ok(scalars.get(key).copied())
    }

    fn save_scalar(&self, key: &str, value: i64) -> Result<()> {
        let mut scalars = self
            .scalars
            .lock()
            .map_err(|_| Error::External("memory store poisoned".to_string()))?;
        scalars.insert(key.to_string(), value);
        Ok(())
    }
}
