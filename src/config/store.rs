//! Persistent storage for [`OperatorConfig`].

use std::io::{self, Write};
use cap_std::fs::OpenOptionsExt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::debug;

use super::OperatorConfig;

/// Directory under `$HOME` holding all `pf9ctl` state.
pub const STATE_DIR_NAME: &str = "pf9";
const DB_DIR_NAME: &str = "db";
const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_FILE_MODE: u32 = 0o600;

/// Errors raised while reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    /// Raised when the home directory cannot be determined.
    #[error("cannot determine the home directory")]
    NoHome,
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when existing content cannot be parsed.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Abstraction over configuration persistence for dependency injection.
pub trait CredentialStore: Send + Sync {
    /// Location of the configuration file.
    fn location(&self) -> &Utf8Path;

    /// Reads the stored configuration, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError`] when the file exists but cannot be read
    /// or decoded.
    fn load(&self) -> Result<Option<OperatorConfig>, ConfigStoreError>;

    /// Persists `config`, clearing the MFA token and obscuring the password.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError`] when the file cannot be written.
    fn save(&self, config: &OperatorConfig) -> Result<Utf8PathBuf, ConfigStoreError>;
}

/// Reads and writes `$HOME/pf9/db/config.json`.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    path: Utf8PathBuf,
}

impl ConfigStore {
    /// Builds a store for an explicit file path.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Builds a store rooted at `home`.
    #[must_use]
    pub fn in_home(home: &Utf8Path) -> Self {
        Self::new(
            home.join(STATE_DIR_NAME)
                .join(DB_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        )
    }

    /// Builds a store rooted at the current user's home directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError::NoHome`] when `$HOME` is unavailable.
    pub fn for_current_user() -> Result<Self, ConfigStoreError> {
        state_dir().map(|dir| {
            Self::new(dir.join(DB_DIR_NAME).join(CONFIG_FILE_NAME))
        })
    }
}

/// Returns `$HOME/pf9`, the directory for logs, caches and the config DB.
///
/// # Errors
///
/// Returns [`ConfigStoreError::NoHome`] when `$HOME` is unavailable or not
/// valid UTF-8.
pub fn state_dir() -> Result<Utf8PathBuf, ConfigStoreError> {
    let raw_home = dirs::home_dir().ok_or(ConfigStoreError::NoHome)?;
    let home = Utf8PathBuf::from_path_buf(raw_home).map_err(|_| ConfigStoreError::NoHome)?;
    Ok(home.join(STATE_DIR_NAME))
}

impl CredentialStore for ConfigStore {
    fn location(&self) -> &Utf8Path {
        &self.path
    }

    fn load(&self) -> Result<Option<OperatorConfig>, ConfigStoreError> {
        let Some(contents) = read_config(&self.path)? else {
            return Ok(None);
        };
        let mut config: OperatorConfig =
            serde_json::from_str(&contents).map_err(|err| ConfigStoreError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        config.password = reveal_password(&self.path, &config.password)?;
        config.mfa_token.clear();
        debug!(path = %self.path, "loaded stored configuration");
        Ok(Some(config))
    }

    fn save(&self, config: &OperatorConfig) -> Result<Utf8PathBuf, ConfigStoreError> {
        let mut on_disk = config.clone();
        on_disk.mfa_token.clear();
        on_disk.password = STANDARD.encode(config.password.as_bytes());

        let rendered =
            serde_json::to_string_pretty(&on_disk).map_err(|err| ConfigStoreError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        write_config(&self.path, &rendered)?;
        debug!(path = %self.path, "stored configuration");
        Ok(self.path.clone())
    }
}

fn reveal_password(path: &Utf8Path, stored: &str) -> Result<String, ConfigStoreError> {
    if stored.is_empty() {
        return Ok(String::new());
    }
    let parse_err = |message: String| ConfigStoreError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let bytes = STANDARD
        .decode(stored.trim())
        .map_err(|err| parse_err(format!("password is not base64: {err}")))?;
    String::from_utf8(bytes).map_err(|err| parse_err(format!("password is not UTF-8: {err}")))
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), ConfigStoreError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| ConfigStoreError::Io {
        path: path.to_path_buf(),
        message: String::from("configuration file path is missing a filename"),
    })?;
    Ok((parent, file_name))
}

fn read_config(path: &Utf8Path) -> Result<Option<String>, ConfigStoreError> {
    let (parent, file_name) = split_path(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(ConfigStoreError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            });
        }
    };

    match dir.read_to_string(file_name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ConfigStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

/// Writes `contents` to a private staging file, then renames it over
/// `path`. The password never sits in a file with looser permissions.
fn write_config(path: &Utf8Path, contents: &str) -> Result<(), ConfigStoreError> {
    let (parent, file_name) = split_path(path)?;
    let io_err = |at: &Utf8Path, err: &io::Error| ConfigStoreError::Io {
        path: at.to_path_buf(),
        message: err.to_string(),
    };

    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| io_err(parent, &err))?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| io_err(parent, &err))?;

    let staging = format!(".{file_name}.tmp");
    let staging_path = parent.join(&staging);
    match dir.remove_file(&staging) {
        Ok(()) => debug!(path = %staging_path, "removed stale staging file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(&staging_path, &err)),
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true).mode(CONFIG_FILE_MODE);
    let written = dir.open_with(&staging, &options).and_then(|mut file| {
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    });
    if let Err(err) = written {
        if let Err(cleanup) = dir.remove_file(&staging) {
            debug!(path = %staging_path, error = %cleanup, "failed to remove staging file");
        }
        return Err(io_err(&staging_path, &err));
    }

    dir.rename(&staging, &dir, file_name)
        .map_err(|err| io_err(path, &err))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::{ConfigStore, CredentialStore};
    use crate::config::OperatorConfig;

    fn temp_store() -> (TempDir, ConfigStore) {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("temp dir: {err}"));
        let home = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()));
        (tmp, ConfigStore::in_home(&home))
    }

    fn sample() -> OperatorConfig {
        OperatorConfig {
            account_url: String::from("https://acme.platform9.io"),
            username: String::from("ops@acme.io"),
            password: String::from("hunter2"),
            mfa_token: String::from("123456"),
            ..OperatorConfig::default()
        }
    }

    #[test]
    fn load_returns_none_when_file_is_absent() {
        let (_tmp, store) = temp_store();
        let loaded = store
            .load()
            .unwrap_or_else(|err| panic!("load: {err}"));
        assert!(loaded.is_none());
    }

    #[test]
    fn save_obscures_password_and_drops_mfa() {
        let (_tmp, store) = temp_store();
        let path = store
            .save(&sample())
            .unwrap_or_else(|err| panic!("save: {err}"));

        let raw = std::fs::read_to_string(&path).unwrap_or_else(|err| panic!("read: {err}"));
        assert!(!raw.contains("hunter2"), "password stored in clear: {raw}");
        assert!(raw.contains("aHVudGVyMg=="), "password not base64: {raw}");
        assert!(raw.contains(r#""mfa_token": """#), "mfa persisted: {raw}");
        assert!(raw.contains(r#""fqdn": "https://acme.platform9.io""#));

        let mode = std::fs::metadata(&path)
            .unwrap_or_else(|err| panic!("metadata: {err}"))
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn load_rejects_password_that_is_not_base64() {
        let (_tmp, store) = temp_store();
        let path = store.location().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap_or_else(|err| panic!("mkdir: {err}"));
        }
        std::fs::write(&path, r#"{"fqdn":"x","password":"%%%"}"#)
            .unwrap_or_else(|err| panic!("write: {err}"));

        let err = store
            .load()
            .err()
            .unwrap_or_else(|| panic!("expected a parse error"));
        assert!(err.to_string().contains("base64"), "unexpected error: {err}");
    }
}
