//! File-per-token backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::data::SessionData;
use crate::error::{Error, Result};
use crate::store::{DEFAULT_MAX_AGE, SessionStore, effective_ttl};
use crate::token::{TokenSource, default_source};

/// Default file name prefix.
pub const DEFAULT_FILE_PREFIX: &str = "tokvault_";

/// On-disk record: the session data plus its absolute expiration.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    data: SessionData,
    /// `None` means the record never expires.
    #[serde(default)]
    expire: Option<DateTime<Utc>>,
}

/// Durable file-per-token store.
///
/// Each record lives at `dir/<prefix><token>` as a JSON document, rewritten
/// whole on every save. No cross-process locking is provided: concurrent
/// writers to the same token race and the last completed write wins. The
/// token is appended to the path unescaped, so tokens must not contain path
/// separators.
pub struct FileStore {
    dir: PathBuf,
    prefix: String,
    max_age: Option<Duration>,
    tokens: Arc<dyn TokenSource>,
}

impl FileStore {
    /// Create a file store rooted at `dir`, creating the directory with
    /// owner-only permissions when missing.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        create_private_dir(&dir)?;

        Ok(Self {
            dir,
            prefix: DEFAULT_FILE_PREFIX.to_string(),
            max_age: Some(DEFAULT_MAX_AGE),
            tokens: default_source(),
        })
    }

    /// Set the default record lifetime.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Records without a per-save ttl never expire.
    pub fn without_max_age(mut self) -> Self {
        self.max_age = None;
        self
    }

    /// Override the file name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Replace the token source (deterministic tokens in tests).
    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Full path of the record file for `token`.
    pub fn file_path(&self, token: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.prefix, token))
    }

    fn remove_file(&self, token: &str) -> Result<()> {
        match std::fs::remove_file(self.file_path(token)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn clear(&self, token: &str) -> Result<()> {
        self.remove_file(token)
    }

    async fn get(&self, token: &str) -> Result<SessionData> {
        let buf = match std::fs::read(self.file_path(token)) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NotFound),
            Err(e) => return Err(Error::Io(e)),
        };

        let record: FileRecord = serde_json::from_slice(&buf)?;

        if record.expire.is_some_and(|at| at <= Utc::now()) {
            trace!(token, "purging expired record file");
            // Expiry is the caller-relevant fact; a failed purge retries on
            // the next read.
            if let Err(e) = self.remove_file(token) {
                debug!(token, error = %e, "failed to delete expired record file");
            }
            return Err(Error::Expired);
        }

        Ok(record.data)
    }

    async fn save(&self, data: &mut SessionData, ttl: Option<Duration>) -> Result<()> {
        if data.token.is_empty() {
            data.regenerate(&*self.tokens);
        }

        // A lifetime too large for the calendar degrades to "never expires".
        let expire = effective_ttl(ttl, self.max_age).and_then(|d| {
            chrono::Duration::from_std(d)
                .ok()
                .and_then(|d| Utc::now().checked_add_signed(d))
        });

        let record = FileRecord {
            data: data.clone(),
            expire,
        };
        let buf = serde_json::to_vec(&record)?;

        let path = self.file_path(&data.token);
        write_private_file(&path, &buf)?;
        debug!(token = %data.token, path = %path.display(), "record saved");
        Ok(())
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    match std::fs::DirBuilder::new().recursive(true).mode(0o700).create(dir) {
        Ok(()) => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(Error::Io)
}

#[cfg(unix)]
fn write_private_file(path: &Path, buf: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(buf)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, buf: &[u8]) -> Result<()> {
    std::fs::write(path, buf).map_err(Error::Io)
}
