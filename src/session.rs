// MIT License - Copyright (c) 2026 Peter Wright

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Non-token session attributes returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub user: String,
    pub lang: String,
    #[serde(default)]
    pub legals: bool,
    #[serde(default)]
    pub change_password: bool,
    #[serde(default)]
    pub need_device_authorization: bool,
}

/// An authenticated cloud session.
///
/// Owned by the auth state machine: created on login, replaced on refresh,
/// destroyed on logout. The vendor invalidates tokens server-side after a
/// few minutes, so [`Session::age_secs`] is checked before reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The JWT hash token sent in the `auth` header.
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    pub data: SessionData,
    /// Unix timestamp of the login that produced this session.
    pub login_time: i64,
}

impl Session {
    /// Seconds elapsed since login, measured against `now`.
    pub fn age_secs(&self, now: i64) -> i64 {
        now - self.login_time
    }

    /// Whether the session is still inside its validity window at `now`.
    pub fn is_valid_at(&self, max_age_secs: i64, now: i64) -> bool {
        !self.token.is_empty() && self.age_secs(now) <= max_age_secs
    }

    /// Whether the session is still valid right now.
    pub fn is_valid(&self, max_age_secs: i64) -> bool {
        self.is_valid_at(max_age_secs, Utc::now().timestamp())
    }
}

/// Persistence collaborator for sessions.
///
/// One concrete implementation ([`FileSessionStore`]); tests substitute
/// their own.
pub trait SessionStore: Send + Sync {
    /// Load the persisted session, if any. A missing file is `Ok(None)`.
    fn load(&self) -> Result<Option<Session>>;
    /// Persist the session, replacing any previous one.
    fn save(&self, session: &Session) -> Result<()>;
    /// Delete the persisted session. Deleting a missing session is not an error.
    fn clear(&self) -> Result<()>;
}

/// File-backed session store.
///
/// The file is plain JSON keyed by user in its name (see
/// [`ClientConfig::session_file`](crate::config::ClientConfig::session_file)).
/// No file locking: concurrent writers race last-write-wins.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            debug!("No session file at {}", self.path.display());
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Session>(&text) {
            Ok(session) => {
                debug!("Session loaded from {}", self.path.display());
                Ok(Some(session))
            }
            Err(e) => {
                // A corrupt session file is recoverable by logging in again.
                warn!("Discarding unreadable session file {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, text)?;
        debug!("Session saved to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            debug!("Session file {} removed", self.path.display());
        }
        Ok(())
    }
}
