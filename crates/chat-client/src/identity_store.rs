//! Persistence for the current user identity between launches.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use chat_core::User;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityStoreError {
    #[error("failed {action} identity file {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("identity file {path} is not valid: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("identity store backend failure: {0}")]
    Backend(String),
}

/// Load/save/clear for the single persisted user record.
pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Result<Option<User>, IdentityStoreError>;

    fn save(&self, user: &User) -> Result<(), IdentityStoreError>;

    fn clear(&self) -> Result<(), IdentityStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryIdentityStore {
    data: Arc<RwLock<Option<User>>>,
}

impl InMemoryIdentityStore {
    pub fn with_user(user: User) -> Self {
        Self {
            data: Arc::new(RwLock::new(Some(user))),
        }
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn load(&self) -> Result<Option<User>, IdentityStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| IdentityStoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.clone())
    }

    fn save(&self, user: &User) -> Result<(), IdentityStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| IdentityStoreError::Backend("poisoned lock".to_owned()))?;
        *data = Some(user.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), IdentityStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| IdentityStoreError::Backend("poisoned lock".to_owned()))?;
        *data = None;
        Ok(())
    }
}

/// JSON file store. Writes go through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, action: &'static str, source: std::io::Error) -> IdentityStoreError {
        IdentityStoreError::Io {
            action,
            path: self.path.clone(),
            source,
        }
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<User>, IdentityStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error("reading", err)),
        };

        serde_json::from_str::<User>(&raw)
            .map(Some)
            .map_err(|source| IdentityStoreError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, user: &User) -> Result<(), IdentityStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| self.io_error("creating directory for", err))?;
        }

        let encoded = serde_json::to_vec(user).map_err(|source| IdentityStoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let temp_path = temp_path_for(&self.path);
        fs::write(&temp_path, encoded).map_err(|err| self.io_error("writing temp", err))?;

        if let Err(rename_err) = fs::rename(&temp_path, &self.path) {
            // Windows does not allow replacing existing files via rename.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(_) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(self.io_error("replacing", rename_err));
                }
            }
            fs::rename(&temp_path, &self.path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                self.io_error("writing", err)
            })?;
        }

        Ok(())
    }

    fn clear(&self) -> Result<(), IdentityStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error("deleting", err)),
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("current-user.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::UserStatus;
    use std::env;

    fn unique_temp_path(label: &str) -> PathBuf {
        let now_nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        env::temp_dir()
            .join(format!("chat-client-{label}-{now_nanos}"))
            .join("current-user.json")
    }

    fn alice() -> User {
        User {
            id: "u1".to_owned(),
            name: "Alice".to_owned(),
            avatar: Some("https://cdn.example.org/alice.png".to_owned()),
            status: UserStatus::Online,
            bio: None,
            room_ids: vec!["g1".to_owned(), "r1".to_owned()],
        }
    }

    #[test]
    fn file_store_round_trip() {
        let store = FileIdentityStore::new(unique_temp_path("identity"));
        assert!(store.load().expect("missing file is not an error").is_none());

        store.save(&alice()).expect("save should work");
        let loaded = store
            .load()
            .expect("load should work")
            .expect("identity should be present");
        assert_eq!(loaded, alice());

        store.clear().expect("clear should work");
        assert!(store.load().expect("load after clear should work").is_none());
        store.clear().expect("clearing twice is fine");
    }

    #[test]
    fn file_store_reports_corrupt_json() {
        let path = unique_temp_path("corrupt");
        fs::create_dir_all(path.parent().expect("temp path has a parent"))
            .expect("create temp dir");
        fs::write(&path, b"{not json").expect("write corrupt file");

        let err = FileIdentityStore::new(&path)
            .load()
            .expect_err("corrupt file should fail");
        assert!(matches!(err, IdentityStoreError::Corrupt { .. }));
    }

    #[test]
    fn in_memory_store_round_trip() {
        let store = InMemoryIdentityStore::default();
        assert!(store.load().expect("load").is_none());

        store.save(&alice()).expect("save");
        assert_eq!(store.load().expect("load"), Some(alice()));

        store.clear().expect("clear");
        assert!(store.load().expect("load").is_none());
    }
}
