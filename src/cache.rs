use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

use crate::error::DispatchError;
use crate::models::{Completion, Request};

// Folded into every fingerprint; bump to invalidate existing entries when
// the record layout changes.
const CACHE_SCHEMA_VERSION: u32 = 1;

/// Content fingerprint of a request.
///
/// Covers the model identifier, the normalized message sequence and the
/// sorted parameter items, so two requests that differ only in parameter
/// insertion order hash identically.
pub fn fingerprint(request: &Request) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.model.as_bytes());
    hasher.update([0u8]);
    for message in &request.messages {
        hasher.update(message.role.as_str().as_bytes());
        hasher.update([b'=']);
        hasher.update(message.content.as_bytes());
        hasher.update([0u8]);
    }
    for item in request.parameters.canonical_items() {
        hasher.update(item.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(format!("schema_version={CACHE_SCHEMA_VERSION}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Durable record, one file per fingerprint. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub fingerprint: String,
    pub model: String,
    /// Truncated prompt text, kept for debugging only
    pub prompt: String,
    pub response: Completion,
    pub created_at: DateTime<Utc>,
}

/// Content-addressed response cache: a DashMap hot layer over one JSON
/// record per fingerprint on disk. Lookups never touch the network;
/// successful completions are the only thing ever stored.
pub struct CacheStore {
    hot: DashMap<String, Completion>,
    dir: PathBuf,
}

impl CacheStore {
    /// Open the store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DispatchError> {
        let dir = dir.into();
        if dir.exists() && !dir.is_dir() {
            return Err(DispatchError::Validation(format!(
                "cache path {} is not a directory",
                dir.display()
            )));
        }
        fs::create_dir_all(&dir)?;
        Ok(Self {
            hot: DashMap::new(),
            dir,
        })
    }

    fn record_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    /// Look up a cached completion. A missing or unreadable record is a
    /// miss; a corrupt one is logged and treated as a miss as well.
    pub fn lookup(&self, fingerprint: &str) -> Option<Completion> {
        if let Some(hit) = self.hot.get(fingerprint) {
            return Some(hit.clone());
        }
        let raw = fs::read_to_string(self.record_path(fingerprint)).ok()?;
        match serde_json::from_str::<CacheRecord>(&raw) {
            Ok(record) => {
                self.hot.insert(fingerprint.to_string(), record.response.clone());
                Some(record.response)
            }
            Err(err) => {
                warn!(%fingerprint, %err, "corrupt cache record, treating as miss");
                None
            }
        }
    }

    /// Persist a successful completion under its fingerprint.
    ///
    /// The record goes through a temp file and an atomic rename, so
    /// concurrent writers of distinct fingerprints never touch each other
    /// and a reader never observes a partial record. Same-fingerprint
    /// writers produce identical content, last writer wins.
    pub fn store(
        &self,
        fingerprint: &str,
        request: &Request,
        response: &Completion,
    ) -> Result<(), DispatchError> {
        let record = CacheRecord {
            fingerprint: fingerprint.to_string(),
            model: request.model.clone(),
            prompt: request.prompt_summary(),
            response: response.clone(),
            created_at: Utc::now(),
        };
        let tmp = self.dir.join(format!(".{fingerprint}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(&record)?)?;
        fs::rename(&tmp, self.record_path(fingerprint))?;
        self.hot.insert(fingerprint.to_string(), response.clone());
        Ok(())
    }

    /// Remove every record, durable and hot.
    pub fn clear(&self) -> Result<(), DispatchError> {
        self.hot.clear();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Number of durable records.
    pub fn len(&self) -> Result<usize, DispatchError> {
        let mut count = 0;
        for entry in fs::read_dir(&self.dir)? {
            if entry?.path().extension().is_some_and(|ext| ext == "json") {
                count += 1;
            }
        }
        Ok(count)
    }
}
