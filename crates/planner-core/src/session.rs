use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Public identity returned by the auth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Bearer credential plus the identity it belongs to. The two only ever
/// travel together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticating,
    Authenticated,
}

/// The persisted `{token, user}` record.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[instrument(skip(self), fields(file = %self.path.display()))]
    pub fn load(&self) -> anyhow::Result<Option<Session>> {
        if !self.path.exists() {
            debug!("no persisted session");
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let session: Session = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", self.path.display()))?;
        if session.token.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(session))
    }

    #[instrument(skip(self, session), fields(file = %self.path.display()))]
    pub fn save(&self, session: &Session) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let mut temp = NamedTempFile::new_in(dir)?;
        let serialized = serde_json::to_string(session)?;
        writeln!(temp, "{serialized}")?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.path.display(), err))?;
        Ok(())
    }

    #[instrument(skip(self), fields(file = %self.path.display()))]
    pub fn remove(&self) -> anyhow::Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed removing {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// Holds the current session and gates mutating calls on it.
///
/// When authentication is not required every caller is treated as signed in
/// and no credential is attached to requests.
#[derive(Debug)]
pub struct SessionManager {
    required: bool,
    session: Option<Session>,
    authenticating: bool,
    file: Option<SessionFile>,
}

impl SessionManager {
    pub fn new(required: bool, file: Option<SessionFile>) -> Self {
        Self {
            required,
            session: None,
            authenticating: false,
            file,
        }
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn state(&self) -> AuthState {
        if self.session.is_some() {
            AuthState::Authenticated
        } else if self.authenticating {
            AuthState::Authenticating
        } else {
            AuthState::Anonymous
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|s| &s.user)
    }

    /// Whether task mutations may be sent right now.
    pub fn can_mutate(&self) -> bool {
        !self.required || self.session.is_some()
    }

    /// Reads the persisted session once; a broken file is discarded.
    #[instrument(skip(self))]
    pub fn restore(&mut self) -> bool {
        let Some(file) = self.file.as_ref() else {
            return false;
        };
        match file.load() {
            Ok(Some(session)) => {
                info!(user = %session.user.email, "restored session");
                self.session = Some(session);
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "discarding unreadable session file");
                if let Err(err) = file.remove() {
                    warn!(error = %format!("{err:#}"), "failed removing session file");
                }
                false
            }
        }
    }

    pub fn begin_authenticating(&mut self) {
        self.authenticating = true;
    }

    pub fn abort_authenticating(&mut self) {
        self.authenticating = false;
    }

    /// Installs token and user together and writes them through to disk.
    #[instrument(skip(self, session), fields(user = %session.user.email))]
    pub fn establish(&mut self, session: Session) {
        if let Some(file) = self.file.as_ref()
            && let Err(err) = file.save(&session)
        {
            warn!(error = %format!("{err:#}"), "failed persisting session");
        }
        self.session = Some(session);
        self.authenticating = false;
        info!("session established");
    }

    /// Drops token and user together and forgets the persisted copy.
    #[instrument(skip(self))]
    pub fn clear(&mut self) {
        let had_session = self.session.take().is_some();
        self.authenticating = false;
        if let Some(file) = self.file.as_ref()
            && let Err(err) = file.remove()
        {
            warn!(error = %format!("{err:#}"), "failed removing session file");
        }
        if had_session {
            info!("session cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn sample() -> Session {
        Session {
            token: "tok-1".to_string(),
            user: User {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
            },
        }
    }

    #[test]
    fn session_file_roundtrip_and_remove() {
        let temp = tempdir().expect("tempdir");
        let file = SessionFile::new(temp.path().join("nested").join("session.json"));

        assert_eq!(file.load().expect("load missing"), None);
        file.save(&sample()).expect("save");
        assert_eq!(file.load().expect("load saved"), Some(sample()));

        file.remove().expect("remove");
        assert!(!file.path().exists());
        file.remove().expect("remove twice");
    }

    #[test]
    fn establish_and_clear_move_token_and_user_together() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("session.json");
        let mut manager = SessionManager::new(true, Some(SessionFile::new(&path)));

        assert_eq!(manager.state(), AuthState::Anonymous);
        assert!(!manager.can_mutate());

        manager.begin_authenticating();
        assert_eq!(manager.state(), AuthState::Authenticating);

        manager.establish(sample());
        assert_eq!(manager.state(), AuthState::Authenticated);
        assert_eq!(manager.token(), Some("tok-1"));
        assert!(manager.user().is_some());
        assert!(path.exists());

        manager.clear();
        assert_eq!(manager.token(), None);
        assert_eq!(manager.user(), None);
        assert!(!path.exists());
    }

    #[test]
    fn restore_reads_persisted_session_and_drops_garbage() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("session.json");
        SessionFile::new(&path).save(&sample()).expect("seed");

        let mut manager = SessionManager::new(true, Some(SessionFile::new(&path)));
        assert!(manager.restore());
        assert_eq!(manager.session(), Some(&sample()));

        fs::write(&path, "{not json").expect("corrupt");
        let mut manager = SessionManager::new(true, Some(SessionFile::new(&path)));
        assert!(!manager.restore());
        assert_eq!(manager.state(), AuthState::Anonymous);
        assert!(!path.exists());
    }

    #[test]
    fn optional_auth_never_gates() {
        let manager = SessionManager::new(false, None);
        assert!(manager.can_mutate());
        assert_eq!(manager.token(), None);
    }
}
