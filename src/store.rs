use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, SecondsFormat};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const DEFAULT_SUMMARY: &str = "Work Block";

const START_PREFIX: &str = "clockin-start-";
const SUMMARY_PREFIX: &str = "clockin-summary-";
const PENDING_PREFIX: &str = ".pending-";
const RECORD_SUFFIX: &str = ".txt";

/// One open work interval: when it started and what it is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub started_at: DateTime<FixedOffset>,
    pub summary: String,
}

impl Session {
    pub fn new(started_at: DateTime<FixedOffset>, summary: impl Into<String>) -> Self {
        Self {
            started_at,
            summary: summary.into(),
        }
    }

    pub fn started_at_rfc3339(&self) -> String {
        format_rfc3339(self.started_at)
    }
}

pub fn format_rfc3339(ts: DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a session is already active since {}", .0.started_at_rfc3339())]
    AlreadyActive(Session),
    #[error("no active session")]
    NoActiveSession,
    #[error("failed to {action} {}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "corrupt session record {}: {detail}; delete that file to discard the clock-in",
        .path.display()
    )]
    Corrupt { path: PathBuf, detail: String },
}

/// Durable home of at most one active [`Session`].
///
/// Implementations keep no state between process invocations that the
/// backing storage does not also hold; "clocked in" is simply `get()`
/// succeeding.
pub trait SessionStore {
    /// Persist a new session. Fails with [`StoreError::AlreadyActive`]
    /// carrying the stored session if one exists.
    fn put(&self, session: &Session) -> Result<(), StoreError>;

    /// Load the active session or fail with [`StoreError::NoActiveSession`].
    fn get(&self) -> Result<Session, StoreError>;

    /// Remove every record of the active session. Succeeds when nothing is
    /// stored.
    fn clear(&self) -> Result<(), StoreError>;

    fn active(&self) -> Result<Option<Session>, StoreError> {
        match self.get() {
            Ok(session) => Ok(Some(session)),
            Err(StoreError::NoActiveSession) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Start,
    Summary,
    Pending,
}

impl RecordKind {
    fn from_file_name(name: &str) -> Option<Self> {
        if name.starts_with(PENDING_PREFIX) {
            return Some(Self::Pending);
        }
        let stem = name.strip_suffix(RECORD_SUFFIX)?;
        if stem.strip_prefix(START_PREFIX).is_some_and(|id| !id.is_empty()) {
            return Some(Self::Start);
        }
        if stem
            .strip_prefix(SUMMARY_PREFIX)
            .is_some_and(|id| !id.is_empty())
        {
            return Some(Self::Summary);
        }
        None
    }
}

#[derive(Debug, Default)]
struct RecordSet {
    starts: Vec<PathBuf>,
    summaries: Vec<PathBuf>,
    pending: Vec<PathBuf>,
}

/// Session records kept as small text files in one directory.
///
/// The start record (`clockin-start-*.txt`) holds an RFC3339 timestamp and is
/// the authoritative "active" marker. The summary record
/// (`clockin-summary-*.txt`) is optional on read. Every operation rescans the
/// directory, so nothing depends on a fixed file name.
#[derive(Debug, Clone)]
pub struct FsSessionStore {
    root: PathBuf,
    default_summary: String,
}

impl FsSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_summary: DEFAULT_SUMMARY.to_string(),
        }
    }

    pub fn with_default_summary(mut self, summary: impl Into<String>) -> Self {
        self.default_summary = summary.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan(&self) -> Result<RecordSet, StoreError> {
        let mut records = RecordSet::default();
        if !self.root.exists() {
            return Ok(records);
        }

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|err| {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.root.clone());
                io_error("scan", &path, err.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            match RecordKind::from_file_name(name) {
                Some(RecordKind::Start) => records.starts.push(entry.into_path()),
                Some(RecordKind::Summary) => records.summaries.push(entry.into_path()),
                Some(RecordKind::Pending) => records.pending.push(entry.into_path()),
                None => {}
            }
        }
        Ok(records)
    }

    fn load(&self, records: &RecordSet) -> Result<Session, StoreError> {
        let Some(start_path) = records.starts.first() else {
            return Err(StoreError::NoActiveSession);
        };
        if records.starts.len() > 1 {
            warn!(
                count = records.starts.len(),
                path = %start_path.display(),
                "multiple clock-in records found; using the earliest"
            );
        }

        let raw = read_record(start_path)?;
        let started_at =
            DateTime::parse_from_rfc3339(raw.trim()).map_err(|err| StoreError::Corrupt {
                path: start_path.clone(),
                detail: err.to_string(),
            })?;

        let summary_path = record_stamp(start_path, START_PREFIX).and_then(|stamp| {
            let name = format!("{SUMMARY_PREFIX}{stamp}{RECORD_SUFFIX}");
            records
                .summaries
                .iter()
                .find(|path| path.file_name().is_some_and(|file| file == name.as_str()))
        });
        let summary = match summary_path {
            Some(path) => {
                let raw = read_record(path)?;
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    self.default_summary.clone()
                } else {
                    trimmed.to_string()
                }
            }
            None => {
                warn!("summary record missing; using the default summary");
                self.default_summary.clone()
            }
        };

        Ok(Session {
            started_at,
            summary,
        })
    }

    fn write_record(&self, prefix: &str, stamp: &str, contents: &str) -> Result<(), StoreError> {
        let target = self.root.join(format!("{prefix}{stamp}{RECORD_SUFFIX}"));
        let mut pending = tempfile::Builder::new()
            .prefix(PENDING_PREFIX)
            .suffix(RECORD_SUFFIX)
            .tempfile_in(&self.root)
            .map_err(|source| io_error("create a record in", &self.root, source))?;
        pending
            .write_all(contents.as_bytes())
            .map_err(|source| io_error("write", pending.path(), source))?;
        pending
            .as_file()
            .sync_all()
            .map_err(|source| io_error("sync", pending.path(), source))?;
        pending
            .persist(&target)
            .map_err(|err| io_error("persist", &target, err.error))?;
        debug!(path = %target.display(), "wrote session record");
        Ok(())
    }
}

impl SessionStore for FsSessionStore {
    fn put(&self, session: &Session) -> Result<(), StoreError> {
        let records = self.scan()?;
        if !records.starts.is_empty() {
            return Err(StoreError::AlreadyActive(self.load(&records)?));
        }

        fs::create_dir_all(&self.root)
            .map_err(|source| io_error("create directory", &self.root, source))?;
        for orphan in records.summaries.iter().chain(&records.pending) {
            warn!(path = %orphan.display(), "removing leftover session record");
            remove_record(orphan)?;
        }

        let stamp = format!(
            "{}-{}",
            session.started_at.format("%Y%m%dT%H%M%S"),
            std::process::id()
        );
        self.write_record(SUMMARY_PREFIX, &stamp, &session.summary)?;
        self.write_record(START_PREFIX, &stamp, &session.started_at_rfc3339())?;
        Ok(())
    }

    fn get(&self) -> Result<Session, StoreError> {
        let records = self.scan()?;
        self.load(&records)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let records = self.scan()?;
        // Start records go first: once they are gone the store reads as idle.
        for path in records
            .starts
            .iter()
            .chain(&records.summaries)
            .chain(&records.pending)
        {
            remove_record(path)?;
        }
        Ok(())
    }
}

/// Single-slot store with no persistence. Backs deterministic tests of
/// everything layered over [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: RefCell<Option<Session>>,
}

impl MemorySessionStore {
    pub fn with_session(session: Session) -> Self {
        Self {
            slot: RefCell::new(Some(session)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn put(&self, session: &Session) -> Result<(), StoreError> {
        let mut slot = self.slot.borrow_mut();
        if let Some(existing) = slot.as_ref() {
            return Err(StoreError::AlreadyActive(existing.clone()));
        }
        *slot = Some(session.clone());
        Ok(())
    }

    fn get(&self) -> Result<Session, StoreError> {
        self.slot
            .borrow()
            .clone()
            .ok_or(StoreError::NoActiveSession)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.slot.borrow_mut().take();
        Ok(())
    }
}

/// The `<stamp>` in `<prefix><stamp>.txt`, which pairs a start record with
/// its summary record.
fn record_stamp<'a>(path: &'a Path, prefix: &str) -> Option<&'a str> {
    path.file_name()?
        .to_str()?
        .strip_prefix(prefix)?
        .strip_suffix(RECORD_SUFFIX)
}

fn read_record(path: &Path) -> Result<String, StoreError> {
    fs::read_to_string(path).map_err(|source| io_error("read", path, source))
}

fn remove_record(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(io_error("remove", path, source)),
    }
}

fn io_error(action: &'static str, path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}
