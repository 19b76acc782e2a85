// Queue directory operations: locked conflict scans and exclusive-create enqueue.
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::debug;

use crate::config::SyncConfig;
use crate::core::entry::QueueEntry;
use crate::core::error::{Error, ErrorKind};
use crate::core::key::{Domain, Operation, QueueKey, split_entry_name};
use crate::core::lock::QueueLock;
use crate::core::principal::Principal;
use crate::core::stamp;

const ENTRY_MODE: u32 = 0o600;

/// A queued change waiting for replay.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingEntry {
    pub name: String,
    pub path: PathBuf,
    /// Conflict key prefix (`user-domain-class-`) the entry was filed under.
    pub key: String,
    /// UTC `YYYYMMDDTHHMMSSZ` the entry was queued at.
    pub timestamp: String,
    pub sequence: u8,
}

#[derive(Clone, Debug)]
pub struct Queue {
    dir: PathBuf,
}

impl Queue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, Error> {
        match &config.queue_dir {
            Some(dir) => Ok(Self::new(dir)),
            None => Err(Error::new(ErrorKind::Config)
                .with_message("configuration setting queue_dir missing")
                .with_hint("Set queue_dir in the krb5-sync configuration file.")),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Point-in-time answer: another process may enqueue right after this
    /// returns. Use `check_and_enqueue` when the answer decides a write.
    pub fn has_conflict(&self, key: &QueueKey) -> Result<bool, Error> {
        let _lock = QueueLock::acquire(&self.dir)?;
        self.scan(key)
    }

    pub fn enqueue(
        &self,
        principal: &Principal,
        domain: Domain,
        operation: Operation,
        password: Option<&str>,
    ) -> Result<PathBuf, Error> {
        self.enqueue_at(principal, domain, operation, password, OffsetDateTime::now_utc())
    }

    pub fn enqueue_at(
        &self,
        principal: &Principal,
        domain: Domain,
        operation: Operation,
        password: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<PathBuf, Error> {
        let key = QueueKey::derive(principal, domain, operation);
        let _lock = QueueLock::acquire(&self.dir)?;
        self.write_locked(&key, principal, domain, operation, password, now)
    }

    /// Enqueues only when an entry with the same key is already pending, as
    /// one locked step. Returns `None` when the key is clear.
    pub fn check_and_enqueue(
        &self,
        principal: &Principal,
        domain: Domain,
        operation: Operation,
        password: Option<&str>,
    ) -> Result<Option<PathBuf>, Error> {
        let key = QueueKey::derive(principal, domain, operation);
        let _lock = QueueLock::acquire(&self.dir)?;
        if !self.scan(&key)? {
            return Ok(None);
        }
        let path = self.write_locked(
            &key,
            principal,
            domain,
            operation,
            password,
            OffsetDateTime::now_utc(),
        )?;
        Ok(Some(path))
    }

    /// Well-formed entries in name order, which is chronological per key.
    pub fn pending(&self) -> Result<Vec<PendingEntry>, Error> {
        let _lock = QueueLock::acquire(&self.dir)?;
        let mut entries = Vec::new();
        for name in self.entry_names()? {
            let Some(parts) = split_entry_name(&name) else {
                if !name.starts_with('.') {
                    debug!(file = %name, "skipping foreign file in queue directory");
                }
                continue;
            };
            let key = parts.prefix.to_string();
            let timestamp = parts.timestamp.to_string();
            let sequence = parts.sequence;
            entries.push(PendingEntry {
                path: self.dir.join(&name),
                name,
                key,
                timestamp,
                sequence,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn scan(&self, key: &QueueKey) -> Result<bool, Error> {
        Ok(self.entry_names()?.iter().any(|name| key.matches(name)))
    }

    fn entry_names(&self) -> Result<Vec<String>, Error> {
        let read_dir = fs::read_dir(&self.dir)
            .map_err(|err| Error::system("cannot open queue directory", &self.dir, err))?;
        let mut names = Vec::new();
        for entry in read_dir {
            // Entries may vanish under a concurrent replay; that is not an error.
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(Error::system("cannot read queue directory", &self.dir, err));
                }
            };
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn write_locked(
        &self,
        key: &QueueKey,
        principal: &Principal,
        domain: Domain,
        operation: Operation,
        password: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<PathBuf, Error> {
        let entry = QueueEntry {
            account: principal.name_without_realm(),
            domain,
            operation,
            password: password.map(str::to_string),
        };
        entry.check_fields()?;
        let timestamp = stamp::timestamp(now)?;
        let (path, file) = self.create_unique(key, &timestamp)?;
        write_or_discard(file, &path, &entry.encode())?;
        // The entry is complete; a failed directory sync only weakens durability.
        if let Err(err) = sync_dir(&self.dir) {
            debug!(dir = %self.dir.display(), error = %err, "cannot sync queue directory");
        }
        debug!(file = %path.display(), %operation, "queued change");
        Ok(path)
    }

    fn create_unique(&self, key: &QueueKey, timestamp: &str) -> Result<(PathBuf, File), Error> {
        for name in stamp::candidate_names(key, timestamp) {
            let path = self.dir.join(name);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(ENTRY_MODE)
                .open(&path)
            {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(Error::system("cannot create queue file", &path, err)),
            }
        }
        Err(Error::new(ErrorKind::System)
            .with_message(format!(
                "too many queued changes for {} within {timestamp}",
                key.prefix()
            ))
            .with_path(&self.dir))
    }
}

/// File operations needed to finish an entry after its bytes are written.
trait EntrySink: Write {
    fn restrict(&self) -> io::Result<()>;
    fn persist(&self) -> io::Result<()>;
}

impl EntrySink for File {
    fn restrict(&self) -> io::Result<()> {
        self.set_permissions(Permissions::from_mode(ENTRY_MODE))
    }

    fn persist(&self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Writes `bytes` to the freshly created entry at `path`, removing the entry
/// if any step fails so no partial file is left for replay.
fn write_or_discard<S: EntrySink>(mut sink: S, path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let result = write_entry(&mut sink, path, bytes);
    drop(sink);
    if result.is_err() {
        if let Err(err) = fs::remove_file(path) {
            debug!(file = %path.display(), error = %err, "cannot remove partial queue file");
        }
    }
    result
}

fn write_entry<S: EntrySink>(sink: &mut S, path: &Path, bytes: &[u8]) -> Result<(), Error> {
    sink.write_all(bytes)
        .map_err(|err| Error::system("cannot write queue file", path, err))?;
    sink.restrict()
        .map_err(|err| Error::system("cannot set queue file permissions", path, err))?;
    sink.persist()
        .map_err(|err| Error::system("cannot sync queue file", path, err))
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
