//! Collision-free bulk-load file allocation.
//!
//! The bulk-load directory is shared by every archiving process on the host,
//! so in-process locking is not enough. Names combine the table, domain
//! marker, pid, host id, wall-clock millis and a process-wide counter, and
//! files are created with `create_new` so a name taken by a sibling process
//! is detected rather than overwritten. Failed attempts sleep a random
//! interval to fall out of step with whoever we collided with.

use gds_common::{ArchiveSession, Domain, Error, Result};
use gds_config::{ArchiveConfig, ExtendedTables};
use rand::Rng;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

/// Process-wide suffix counter; never reset while the process lives.
static FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The per-session parts of a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub domain: Domain,
    pub pid: u32,
    pub host_id: u32,
}

impl FileIdentity {
    pub fn from_session(session: &ArchiveSession) -> Self {
        FileIdentity {
            domain: session.domain,
            pid: session.pid,
            host_id: session.host_id,
        }
    }
}

/// A newly created, empty bulk-load file.
#[derive(Debug)]
pub struct AllocatedFile {
    pub path: PathBuf,
    pub file: File,
}

/// Retry policy for file and directory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub open_attempts: u32,
    pub directory_attempts: u32,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ArchiveConfig) -> Self {
        RetryPolicy {
            open_attempts: config.allocator.open_attempts.max(1),
            directory_attempts: config.allocator.directory_attempts.max(1),
            jitter: Duration::from_millis(config.allocator.jitter_ms),
        }
    }
}

/// Creates uniquely named bulk-load files.
#[derive(Debug)]
pub struct UniqueFileAllocator {
    identity: RwLock<FileIdentity>,
    extended: ExtendedTables,
    policy: RetryPolicy,
}

impl UniqueFileAllocator {
    pub fn new(identity: FileIdentity, extended: ExtendedTables, policy: RetryPolicy) -> Self {
        UniqueFileAllocator {
            identity: RwLock::new(identity),
            extended,
            policy,
        }
    }

    pub fn from_config(session: &ArchiveSession, config: &ArchiveConfig) -> Self {
        Self::new(
            FileIdentity::from_session(session),
            config.extended.clone(),
            RetryPolicy::from_config(config),
        )
    }

    /// Switch to a new session's identity.
    pub fn set_identity(&self, identity: FileIdentity) {
        *self.identity.write().unwrap_or_else(|e| e.into_inner()) = identity;
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Table name with the extended suffix applied when configured.
    pub fn actual_table_name(&self, table: &str) -> String {
        self.extended.actual_table_name(table)
    }

    /// Next candidate file name for a table; consumes one counter value.
    pub fn candidate_name(&self, table: &str) -> String {
        let identity = self
            .identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let unique = FILE_COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
        format!(
            "{}{}{}_{}{}_{:06}",
            self.actual_table_name(table),
            identity.domain.file_marker(),
            identity.pid,
            identity.host_id,
            millis,
            unique
        )
    }

    /// Create a new, empty file for `table` under `base`.
    ///
    /// Retries up to the configured number of attempts. Between attempts the
    /// base directory is re-verified and the thread sleeps a random interval.
    pub fn allocate(&self, table: &str, base: &Path) -> Result<AllocatedFile> {
        for attempt in 1..=self.policy.open_attempts {
            let path = base.join(self.candidate_name(table));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok(AllocatedFile { path, file }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!(
                        table,
                        path = %path.display(),
                        attempt,
                        "bulk-load file already exists, retrying"
                    );
                }
                Err(e) => {
                    warn!(
                        table,
                        path = %path.display(),
                        attempt,
                        error = %e,
                        status = %file_status(&path),
                        "cannot create bulk-load file, retrying"
                    );
                    make_directory_exist(base, self.policy.directory_attempts, self.policy.jitter);
                }
            }
            if attempt < self.policy.open_attempts {
                jitter_sleep(self.policy.jitter);
            }
        }

        let err = Error::FileAllocation {
            table: table.to_string(),
            base: base.to_path_buf(),
            attempts: self.policy.open_attempts,
        };
        error!(code = err.code(), error = %err, status = %file_status(base), "file allocation failed");
        Err(err)
    }
}

/// Ensure `dir` exists, retrying creation with jitter; false if it never appears.
pub fn make_directory_exist(dir: &Path, attempts: u32, jitter: Duration) -> bool {
    for attempt in 1..=attempts.max(1) {
        if dir.is_dir() {
            return true;
        }
        match fs::create_dir_all(dir) {
            Ok(()) => return true,
            Err(e) => {
                warn!(
                    dir = %dir.display(),
                    attempt,
                    error = %e,
                    "cannot create directory"
                );
                jitter_sleep(jitter);
            }
        }
    }
    dir.is_dir()
}

/// One-line diagnostic of what is at `path`.
pub fn file_status(path: &Path) -> String {
    match fs::metadata(path) {
        Ok(meta) => format!(
            "exists=true dir={} file={} len={} readonly={}",
            meta.is_dir(),
            meta.is_file(),
            meta.len(),
            meta.permissions().readonly()
        ),
        Err(e) => {
            let parent = path
                .parent()
                .map_or(false, |p| p.as_os_str().is_empty() || p.is_dir());
            format!("exists=false parent_dir={} error={}", parent, e.kind())
        }
    }
}

/// Remove a file, retrying with jitter; true once it is gone.
pub fn remove_with_retry(path: &Path, attempts: u32, jitter: Duration) -> bool {
    for attempt in 1..=attempts.max(1) {
        match fs::remove_file(path) {
            Ok(()) => return true,
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(e) => {
                warn!(path = %path.display(), attempt, error = %e, "cannot delete bulk-load file");
                jitter_sleep(jitter);
            }
        }
    }
    false
}

fn jitter_sleep(ceiling: Duration) {
    let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
    if ceiling_ms == 0 {
        return;
    }
    let ms = rand::rng().random_range(0..=ceiling_ms);
    thread::sleep(Duration::from_millis(ms));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn allocator(extended: ExtendedTables) -> UniqueFileAllocator {
        UniqueFileAllocator::new(
            FileIdentity {
                domain: Domain::Fsw,
                pid: 4321,
                host_id: 77,
            },
            extended,
            RetryPolicy {
                open_attempts: 3,
                directory_attempts: 2,
                jitter: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn test_candidate_name_layout() {
        let name = allocator(ExtendedTables::default()).candidate_name("Evr");
        assert!(name.starts_with("Evr_FSW_4321_77"), "{}", name);
        let counter = name.rsplit('_').next().unwrap();
        assert!(counter.len() >= 6);
        assert!(counter.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_extended_suffix_only_for_listed_tables() {
        let extended = ExtendedTables {
            enabled: true,
            postfix: "2".into(),
            tables: BTreeSet::from(["ChannelAggregate".to_string()]),
        };
        let alloc = allocator(extended);
        assert_eq!(alloc.actual_table_name("ChannelAggregate"), "ChannelAggregate2");
        assert!(alloc
            .candidate_name("ChannelAggregate")
            .starts_with("ChannelAggregate2_FSW_"));
        assert!(alloc.candidate_name("Frame").starts_with("Frame_FSW_"));
    }

    #[test]
    fn test_identity_switch() {
        let alloc = allocator(ExtendedTables::default());
        alloc.set_identity(FileIdentity {
            domain: Domain::Sse,
            pid: 1,
            host_id: 2,
        });
        assert!(alloc.candidate_name("SseEvr").starts_with("SseEvr_SSE_1_2"));
    }

    #[test]
    fn test_allocate_creates_empty_file() {
        let dir = TempDir::new().unwrap();
        let alloc = allocator(ExtendedTables::default());
        let allocated = alloc.allocate("Frame", dir.path()).unwrap();
        assert!(allocated.path.is_file());
        assert_eq!(fs::metadata(&allocated.path).unwrap().len(), 0);
    }

    #[test]
    fn test_allocate_recreates_missing_base() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("gone").join("ldi");
        let alloc = allocator(ExtendedTables::default());
        let allocated = alloc.allocate("Frame", &base).unwrap();
        assert!(allocated.path.starts_with(&base));
    }

    #[test]
    fn test_allocate_fails_when_base_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let err = allocator(ExtendedTables::default())
            .allocate("Frame", &blocker)
            .unwrap_err();
        assert_eq!(err.code(), 30);
    }

    #[test]
    fn test_file_status() {
        let dir = TempDir::new().unwrap();
        assert!(file_status(dir.path()).contains("dir=true"));
        assert!(file_status(&dir.path().join("none")).starts_with("exists=false"));
    }

    #[test]
    fn test_remove_with_retry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"row\n").unwrap();
        assert!(remove_with_retry(&path, 3, Duration::ZERO));
        assert!(!path.exists());
        assert!(remove_with_retry(&path, 3, Duration::ZERO));
    }
}
