use std::{collections::BTreeMap, fs, io};

use anyhow::{bail, Context};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cfg::Config;

use super::PreferenceStore;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct Scope {
    room: String,
    plugin: String,
    key: String,
}

impl Scope {
    fn new(room: &str, plugin: &str, key: &str) -> Self {
        Self {
            room: room.to_string(),
            plugin: plugin.to_string(),
            key: key.to_string(),
        }
    }
}

type Data = BTreeMap<Scope, String>;

/// Preference store kept in memory and written to disk after every change.
#[derive(Debug)]
pub struct FileStore {
    data: RwLock<Data>,
    save_path: String,
}

impl FileStore {
    pub fn new(config: &Config) -> Result<Self, anyhow::Error> {
        let path = shellexpand::full_with_context_no_errors(
            &config.storage.path,
            || dirs::home_dir().and_then(|p| p.to_str().map(|s| s.to_string())),
            |f| std::env::var(f).ok(),
        )
        .to_string();

        Self::open(path)
    }

    pub fn open(path: String) -> Result<Self, anyhow::Error> {
        match fs::read(&path) {
            Ok(r) => Ok(Self {
                data: RwLock::new(
                    postcard::from_bytes(&r)
                        .with_context(|| format!("corrupted preference database {}", path))?,
                ),
                save_path: path,
            }),
            Err(err) => match err.kind() {
                // The only case where we can accept an error is when the db does not exists
                io::ErrorKind::NotFound => {
                    debug!("init: preference database {}", path);
                    Ok(Self {
                        data: RwLock::new(Data::default()),
                        save_path: path,
                    })
                }
                _ => bail!(err),
            },
        }
    }

    fn persist(&self, data: &Data) -> Result<(), anyhow::Error> {
        let bytes = postcard::to_allocvec(data)?;
        fs::write(&self.save_path, bytes)
            .with_context(|| format!("failed to write {}", self.save_path))?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for FileStore {
    async fn get(
        &self,
        room: &str,
        plugin: &str,
        key: &str,
        default: Option<&str>,
    ) -> Result<String, anyhow::Error> {
        let data = self.data.read().await;

        match (data.get(&Scope::new(room, plugin, key)), default) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(default)) => Ok(default.to_string()),
            (None, None) => bail!("preference {} is not set", key),
        }
    }

    async fn set(&self, room: &str, plugin: &str, key: &str, value: &str) -> Result<(), anyhow::Error> {
        let mut data = self.data.write().await;
        let mut updated = data.clone();
        updated.insert(Scope::new(room, plugin, key), value.to_string());

        // Persist the db before exposing the change
        self.persist(&updated)?;
        *data = updated;

        Ok(())
    }

    async fn remove(&self, room: &str, plugin: &str, key: &str) -> Result<bool, anyhow::Error> {
        let mut data = self.data.write().await;
        let scope = Scope::new(room, plugin, key);
        if !data.contains_key(&scope) {
            return Ok(false);
        }

        let mut updated = data.clone();
        updated.remove(&scope);
        self.persist(&updated)?;
        *data = updated;

        Ok(true)
    }

    async fn list(&self, room: &str, plugin: &str) -> Result<Vec<(String, String)>, anyhow::Error> {
        let data = self.data.read().await;

        Ok(data
            .iter()
            .filter(|(scope, _)| scope.room == room && scope.plugin == plugin)
            .map(|(scope, value)| (scope.key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use temp_dir::TempDir;

    use super::FileStore;
    use crate::prefs::PreferenceStore;

    fn path(dir: &TempDir) -> String {
        dir.child("prefs.db").to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn missing_database_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(path(&dir)).unwrap();

        assert!(store.get("room", "plugin", "key", None).await.is_err());
        assert_eq!(store.get("room", "plugin", "key", Some("x")).await.unwrap(), "x");
        assert!(store.list("room", "plugin").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn values_survive_a_reopen() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(path(&dir)).unwrap();
        store.set("room", "plugin", "calendar-id", "cal").await.unwrap();
        store.set("room", "plugin", "autoreply", "true").await.unwrap();
        store.set("other", "plugin", "autoreply", "false").await.unwrap();
        drop(store);

        let store = FileStore::open(path(&dir)).unwrap();
        assert_eq!(store.get("room", "plugin", "calendar-id", None).await.unwrap(), "cal");
        assert_eq!(
            store.list("room", "plugin").await.unwrap(),
            vec![
                ("autoreply".to_string(), "true".to_string()),
                ("calendar-id".to_string(), "cal".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn remove_reports_what_it_did() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(path(&dir)).unwrap();
        store.set("room", "plugin", "timezone", "UTC").await.unwrap();

        assert!(store.remove("room", "plugin", "timezone").await.unwrap());
        assert!(!store.remove("room", "plugin", "timezone").await.unwrap());
        assert_eq!(
            store.get("room", "plugin", "timezone", Some("America/Los_Angeles")).await.unwrap(),
            "America/Los_Angeles"
        );
    }

    #[test]
    fn corrupted_database_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.child("prefs.db"), [0xff, 0xff, 0xff]).unwrap();

        assert!(FileStore::open(path(&dir)).is_err());
    }
}
