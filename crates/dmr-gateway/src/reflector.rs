//! Reflector directory
//!
//! Maps reflector numbers to addresses from a hosts file of
//! `number;address;room` lines. A background task rereads the file and
//! swaps the table in whole, so lookups from the dispatcher never lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MAX_REFLECTOR, ROOM_FIRST, ROOM_LAST};
use crate::error::ConfigError;

/// One reflector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflector {
    pub number: u32,
    pub address: String,
    /// Room linked by default
    pub room: u32,
}

/// Shared, reloadable reflector table
#[derive(Debug, Clone)]
pub struct ReflectorDirectory {
    path: PathBuf,
    table: Arc<ArcSwap<HashMap<u32, Reflector>>>,
}

impl ReflectorDirectory {
    /// Directory backed by `path`, initially empty
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            table: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    /// Create a directory and load it once
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let directory = Self::new(path);
        directory.reload()?;
        Ok(directory)
    }

    /// Parse hosts file content
    ///
    /// Blank lines, `#` comments and malformed lines are skipped. A missing
    /// room field means the first room.
    pub fn parse(content: &str) -> HashMap<u32, Reflector> {
        let mut table = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some(reflector) => {
                    table.insert(reflector.number, reflector);
                }
                None => debug!("Skipping reflector line {:?}", line),
            }
        }
        table
    }

    /// Reread the file and swap the table in
    pub fn reload(&self) -> Result<usize, ConfigError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.install(Self::parse(&content)))
    }

    fn install(&self, table: HashMap<u32, Reflector>) -> usize {
        let count = table.len();
        self.table.store(Arc::new(table));
        info!("Loaded {} reflectors from {}", count, self.path.display());
        count
    }

    pub fn find(&self, number: u32) -> Option<Reflector> {
        self.table.load().get(&number).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }

    /// Reload every `interval` until cancelled
    ///
    /// A failed reload keeps the previous table. A zero interval never
    /// reloads.
    pub fn spawn_reload(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let directory = self.clone();
        tokio::spawn(async move {
            if interval.is_zero() {
                warn!("Reload interval for {} is zero, not reloading", directory.path.display());
                cancel.cancelled().await;
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately; the table was loaded at startup
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match tokio::fs::read_to_string(&directory.path).await {
                            Ok(content) => {
                                directory.install(Self::parse(&content));
                            }
                            Err(e) => warn!("Cannot reload {}: {}", directory.path.display(), e),
                        }
                    }
                }
            }
            debug!("Reflector reload task stopped");
        })
    }
}

fn parse_line(line: &str) -> Option<Reflector> {
    let mut fields = line.split(';').map(str::trim);
    let number = fields.next()?;
    let number = number
        .strip_prefix("XLX")
        .or_else(|| number.strip_prefix("xlx"))
        .unwrap_or(number)
        .parse::<u32>()
        .ok()?;
    if number == 0 || number > MAX_REFLECTOR {
        return None;
    }
    let address = fields.next().filter(|a| !a.is_empty())?.to_string();
    let room = match fields.next() {
        Some(room) if !room.is_empty() => room.parse::<u32>().ok()?,
        _ => ROOM_FIRST,
    };
    if !(ROOM_FIRST..=ROOM_LAST).contains(&room) {
        return None;
    }
    Some(Reflector { number, address, room })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HOSTS: &str = "\
# number;address;room
XLX001;xlx001.example.org;4001
950;44.131.4.1;4004

XLX999;xlx999.example.org
XLX1000;too.big;4001
XLX002;bad.room;5000
garbage
";

    #[test]
    fn test_parse() {
        let table = ReflectorDirectory::parse(HOSTS);
        assert_eq!(table.len(), 3);
        assert_eq!(
            table[&1],
            Reflector {
                number: 1,
                address: "xlx001.example.org".into(),
                room: 4001
            }
        );
        assert_eq!(table[&950].room, 4004);
        assert_eq!(table[&999].room, ROOM_FIRST);
        assert!(!table.contains_key(&2));
    }

    #[test]
    fn test_load_and_reload() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "XLX001;a.example.org;4001").unwrap();
        file.flush().unwrap();

        let directory = ReflectorDirectory::load(file.path()).unwrap();
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.find(1).unwrap().address, "a.example.org");
        assert!(directory.find(2).is_none());

        let reader = directory.clone();
        writeln!(file, "XLX002;b.example.org;4002").unwrap();
        file.flush().unwrap();
        assert_eq!(directory.reload().unwrap(), 2);
        assert_eq!(reader.find(2).unwrap().room, 4002);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReflectorDirectory::load(dir.path().join("XLXHosts.txt"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[tokio::test]
    async fn test_background_reload() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "XLX001;a.example.org;4001").unwrap();
        file.flush().unwrap();
        let directory = ReflectorDirectory::load(file.path()).unwrap();

        let cancel = CancellationToken::new();
        let task = directory.spawn_reload(Duration::from_millis(20), cancel.clone());

        writeln!(file, "XLX003;c.example.org;4003").unwrap();
        file.flush().unwrap();
        for _ in 0..100 {
            if directory.find(3).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(directory.find(3).is_some());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_does_not_reload() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "XLX001;a.example.org;4001").unwrap();
        file.flush().unwrap();
        let directory = ReflectorDirectory::load(file.path()).unwrap();

        let cancel = CancellationToken::new();
        let task = directory.spawn_reload(Duration::ZERO, cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(directory.len(), 1);
    }
}
