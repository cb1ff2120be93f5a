//! # rf-prefs-local
//! rusty-forum/crates/rf-plugins/rf-prefs-local/src/lib.rs
//! JSON-file implementation of `PreferenceStore`.
//! The whole file is one flat string map, rewritten on every `set`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use rf_core::traits::PreferenceStore;
use tokio::fs;
use tokio::sync::Mutex;

pub struct JsonPreferenceStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonPreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// A missing file is an empty map; a corrupt one is logged and treated the same.
    async fn read_map(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(map) => Ok(map),
            Err(err) => {
                log::warn!("preference file {} is not valid JSON, starting fresh: {err}", self.path.display());
                Ok(BTreeMap::new())
            }
        }
    }
}

#[async_trait]
impl PreferenceStore for JsonPreferenceStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_map().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        // Write to a sibling file first so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&map)?)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).await?;
        log::debug!("preference {key} = {value}");
        Ok(())
    }
}
