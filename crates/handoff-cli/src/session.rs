//! Session token storage for the client-side commands.
//!
//! The file lives at `{config_dir}/handoff/session.json` (override with
//! `HANDOFF_SESSION_FILE`) and is written with mode 0600 on unix.

use chrono::{DateTime, Utc};
use handoff_core::SessionToken;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

pub const SESSION_FILE_ENV: &str = "HANDOFF_SESSION_FILE";

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("no user config directory on this platform; set {SESSION_FILE_ENV}")]
    NoConfigDir,
    #[error("failed to access session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session file {path} is corrupt: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A session token for one tool host, as obtained by `handoff login`.
#[derive(Debug, Clone)]
pub struct Session {
    pub server: Url,
    token: SessionToken,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(server: Url, token: SessionToken, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            server,
            token,
            expires_at,
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| t <= Utc::now())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredSession {
    server: Url,
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    saved_at: DateTime<Utc>,
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `HANDOFF_SESSION_FILE` when set, otherwise the per-user config dir.
    pub fn from_env() -> Result<Self, SessionStoreError> {
        if let Some(p) = std::env::var_os(SESSION_FILE_ENV).filter(|p| !p.is_empty()) {
            return Ok(Self::at(p));
        }
        let dir = dirs::config_dir().ok_or(SessionStoreError::NoConfigDir)?;
        Ok(Self::at(dir.join("handoff").join("session.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io(source)),
        };
        let stored: StoredSession =
            serde_json::from_str(&raw).map_err(|source| SessionStoreError::Decode {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(Session::new(
            stored.server,
            SessionToken::new(stored.access_token),
            stored.expires_at,
        )))
    }

    pub fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io(e))?;
        }
        let stored = StoredSession {
            server: session.server.clone(),
            access_token: session.token.expose().to_string(),
            expires_at: session.expires_at,
            saved_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&stored).map_err(|source| {
            SessionStoreError::Decode {
                path: self.path.clone(),
                source,
            }
        })?;

        let mut file = open_private(&self.path).map_err(|e| self.io(e))?;
        file.write_all(&body).map_err(|e| self.io(e))?;
        file.sync_all().map_err(|e| self.io(e))?;
        tracing::debug!(event = "session_saved", path = %self.path.display());
        Ok(())
    }

    fn io(&self, source: std::io::Error) -> SessionStoreError {
        SessionStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
