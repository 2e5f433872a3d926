//! Bearer-token store backing `api-keys.yaml` (§3.7, §6). Remote TCP
//! connections authenticate with a bearer token checked against this store;
//! the local Unix-socket listener skips this entirely (implicitly trusted).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub label: String,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ApiKeyFile {
    #[serde(default)]
    keys: BTreeMap<String, ApiKey>,
}

pub struct ApiKeyStore {
    path: PathBuf,
    keys: parking_lot::RwLock<ApiKeyFile>,
}

impl ApiKeyStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let path_clone = path.clone();
        let file = tokio::task::spawn_blocking(move || -> Result<ApiKeyFile> {
            match std::fs::read_to_string(&path_clone) {
                Ok(raw) => Ok(serde_yaml::from_str(&raw)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ApiKeyFile::default()),
                Err(e) => Err(Error::from(e)),
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("api key load task panicked: {e}")))??;
        Ok(Self { path, keys: parking_lot::RwLock::new(file) })
    }

    /// `token_hash` is the hex-encoded blake3 digest of the raw bearer
    /// token; the raw token itself is never persisted.
    pub fn authenticate(&self, token_hash: &str) -> bool {
        let mut file = self.keys.write();
        match file.keys.get_mut(token_hash) {
            Some(key) if !key.revoked => {
                key.last_used_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    pub fn issue(&self, label: impl Into<String>, token_hash: impl Into<String>) -> Result<()> {
        let token_hash = token_hash.into();
        let mut file = self.keys.write();
        file.keys.insert(
            token_hash.clone(),
            ApiKey { label: label.into(), token_hash, created_at: Utc::now(), revoked: false, last_used_at: None },
        );
        self.persist(&file)
    }

    pub fn revoke(&self, label: &str) -> Result<()> {
        let mut file = self.keys.write();
        for key in file.keys.values_mut().filter(|k| k.label == label) {
            key.revoked = true;
        }
        self.persist(&file)
    }

    fn persist(&self, file: &ApiKeyFile) -> Result<()> {
        let raw = serde_yaml::to_string(file)?;
        let tmp_path = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp_path, raw)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

pub fn hash_token(raw: &str) -> String {
    blake3::hash(raw.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(dir.path().join("api-keys.yaml")).await.unwrap();
        assert!(!store.authenticate(&hash_token("nope")));
    }

    #[tokio::test]
    async fn issued_token_authenticates_until_revoked() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(dir.path().join("api-keys.yaml")).await.unwrap();
        let hash = hash_token("super-secret");
        store.issue("ci", hash.clone()).unwrap();
        assert!(store.authenticate(&hash));
        store.revoke("ci").unwrap();
        assert!(!store.authenticate(&hash));
    }
}
