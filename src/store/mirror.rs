//! Out-of-process backup mirror.
//!
//! Datasets are mirrored to a remote blob endpoint on a per-dataset
//! cooldown so a chatty save path does not hammer the remote. When the
//! remote is unreachable the payload falls back to local files, and
//! restore checks the remote first, then the fallbacks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::config::MirrorConfig;

/// Backup mirror over an HTTP blob endpoint with local fallbacks.
pub struct Mirror {
    config: MirrorConfig,
    client: reqwest::Client,
    last_backup: Mutex<HashMap<String, Instant>>,
}

impl Mirror {
    pub fn new(config: MirrorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            last_backup: Mutex::new(HashMap::new()),
        }
    }

    /// Mirror a dataset snapshot, respecting the cooldown.
    ///
    /// Returns `true` when the payload landed somewhere (remote or
    /// fallback). Failures are logged; the caller's save has already
    /// succeeded locally and does not depend on the mirror.
    pub async fn backup(&self, dataset: &str, value: &serde_json::Value) -> bool {
        let mut last = self.last_backup.lock().await;
        if let Some(at) = last.get(dataset)
            && at.elapsed() < self.config.cooldown
        {
            return false;
        }

        let mut stored = self.push_remote(dataset, value).await;
        if !stored {
            tracing::warn!(dataset, "Remote mirror unreachable, using local fallback");
            stored = self.write_fallback(dataset, value).await;
        }
        if stored {
            last.insert(dataset.to_string(), Instant::now());
        } else {
            tracing::warn!(dataset, "Mirror backup failed on all targets");
        }
        stored
    }

    /// Fetch the most recent mirrored snapshot, remote first.
    pub async fn restore(&self, dataset: &str) -> Option<serde_json::Value> {
        if let Some(value) = self.fetch_remote(dataset).await {
            tracing::info!(dataset, "Restored snapshot from remote mirror");
            return Some(value);
        }
        for dir in &self.config.fallback_dirs {
            let path = fallback_path(dir, dataset);
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => match serde_json::from_str(&raw) {
                    Ok(value) => {
                        tracing::info!(dataset, path = %path.display(), "Restored snapshot from local fallback");
                        return Some(value);
                    }
                    Err(e) => {
                        tracing::debug!(dataset, path = %path.display(), "Fallback unparsable: {}", e);
                    }
                },
                Err(_) => continue,
            }
        }
        None
    }

    async fn push_remote(&self, dataset: &str, value: &serde_json::Value) -> bool {
        if self.config.endpoint.is_empty() {
            return false;
        }
        let url = format!("{}/{}", self.config.endpoint.trim_end_matches('/'), dataset);
        let mut request = self.client.put(&url).json(value);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::debug!(dataset, status = %response.status(), "Remote mirror rejected backup");
                false
            }
            Err(e) => {
                tracing::debug!(dataset, "Remote mirror request failed: {}", e);
                false
            }
        }
    }

    async fn fetch_remote(&self, dataset: &str) -> Option<serde_json::Value> {
        if self.config.endpoint.is_empty() {
            return None;
        }
        let url = format!("{}/{}", self.config.endpoint.trim_end_matches('/'), dataset);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }

    async fn write_fallback(&self, dataset: &str, value: &serde_json::Value) -> bool {
        let payload = match serde_json::to_string_pretty(value) {
            Ok(payload) => payload,
            Err(_) => return false,
        };
        for dir in &self.config.fallback_dirs {
            let path = fallback_path(dir, dataset);
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                tracing::debug!(path = %dir.display(), "Fallback dir unavailable: {}", e);
                continue;
            }
            match tokio::fs::write(&path, &payload).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::debug!(path = %path.display(), "Fallback write failed: {}", e);
                }
            }
        }
        false
    }
}

fn fallback_path(dir: &PathBuf, dataset: &str) -> PathBuf {
    dir.join(format!("{dataset}_backup.json"))
}
