//! Session cache: the current chat session and its settled messages.
//!
//! One JSON file per key. Entries live for a fixed time-to-live; reading an
//! expired or unreadable entry behaves like a miss and deletes the file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cs_protocol::{ChatMessage, MessageIds, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Seconds since Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("session cache I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("session cache encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedSession {
    pub saved_at: u64,
    pub chat_session_id: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl CachedSession {
    pub fn new(chat_session_id: impl Into<String>) -> Self {
        Self {
            saved_at: epoch_secs(),
            chat_session_id: chat_session_id.into(),
            messages: Vec::new(),
        }
    }

    /// Append a finished exchange and restamp the entry.
    pub fn push_exchange(&mut self, question: &str, answer: &str, ids: Option<MessageIds>) {
        self.messages.push(
            ChatMessage::user(question).with_id(ids.and_then(|ids| ids.user_message_id)),
        );
        self.messages.push(
            ChatMessage::assistant(answer)
                .with_id(ids.map(|ids| ids.reserved_assistant_message_id)),
        );
        self.saved_at = epoch_secs();
    }

    /// Id of the newest assistant message, the natural parent of the next one.
    pub fn last_assistant_id(&self) -> Option<i64> {
        self.messages
            .iter()
            .rev()
            .filter(|msg| msg.role == Role::Assistant)
            .find_map(|msg| msg.message_id)
    }
}

pub struct SessionCache {
    dir: PathBuf,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(dir: PathBuf, ttl: Duration) -> Self {
        Self { dir, ttl }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }

    pub fn load(&self, key: &str) -> Result<Option<CachedSession>, CacheError> {
        self.load_at(key, epoch_secs())
    }

    /// Load as of `now` (seconds since epoch).
    pub fn load_at(&self, key: &str, now: u64) -> Result<Option<CachedSession>, CacheError> {
        let path = self.path_for(key);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let session: CachedSession = match serde_json::from_str(&contents) {
            Ok(session) => session,
            Err(e) => {
                log::warn!("discarding unreadable session cache {}: {e}", path.display());
                remove_if_present(&path)?;
                return Ok(None);
            }
        };

        if now.saturating_sub(session.saved_at) >= self.ttl.as_secs() {
            log::info!(
                "session cache {} expired (saved at {})",
                path.display(),
                session.saved_at
            );
            remove_if_present(&path)?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Write the entry atomically, creating the directory if needed.
    pub fn store(&self, key: &str, session: &CachedSession) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut file, session)?;
        file.flush()?;
        file.persist(self.path_for(key)).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn clear(&self, key: &str) -> Result<(), CacheError> {
        remove_if_present(&self.path_for(key))?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
