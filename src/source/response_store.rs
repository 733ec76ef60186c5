//! Saves raw provider response bytes to `{root}/{endpoint}/{timestamp}_{suffix}.json`
//! for offline analysis.
//!
//! Errors are logged and swallowed. Saving is best-effort and must never
//! interrupt a scan.

use std::path::PathBuf;

use tokio::fs;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ResponseStore {
    root: PathBuf,
}

impl ResponseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write `bytes` under `endpoint`.
    ///
    /// - `endpoint`: sub-directory name, e.g. `"feed"`.
    /// - `suffix`: appended after the timestamp, e.g. `"50.06_19.94"`. Pass `""` to omit.
    pub async fn save(&self, endpoint: &str, suffix: &str, bytes: &[u8]) {
        let ts = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let filename = if suffix.is_empty() {
            format!("{ts}.json")
        } else {
            format!("{ts}_{suffix}.json")
        };

        let dir = self.root.join(endpoint);
        let path = dir.join(filename);

        if let Err(e) = fs::create_dir_all(&dir).await {
            warn!(path = %path.display(), error = %e, "response_store: failed to create directory");
            return;
        }

        let content = pretty_or_raw(bytes);
        if let Err(e) = fs::write(&path, &content).await {
            warn!(path = %path.display(), error = %e, "response_store: failed to write response file");
        } else {
            tracing::debug!(path = %path.display(), bytes = content.len(), "response_store: saved");
        }
    }
}

/// Pretty-print the JSON if valid; fall back to raw bytes otherwise.
fn pretty_or_raw(bytes: &[u8]) -> Vec<u8> {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|v| serde_json::to_vec_pretty(&v).ok())
        .unwrap_or_else(|| bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_json_is_kept_verbatim() {
        assert_eq!(pretty_or_raw(b"not json"), b"not json".to_vec());
    }

    #[test]
    fn valid_json_is_pretty_printed() {
        let out = String::from_utf8(pretty_or_raw(br#"{"a":1}"#)).unwrap();
        assert!(out.contains('\n'));
    }

    #[tokio::test]
    async fn save_writes_under_endpoint_dir() {
        let root = std::env::temp_dir().join(format!("aqi-responses-{}", uuid::Uuid::new_v4()));
        let store = ResponseStore::new(&root);
        store.save("feed", "1.0_2.0", br#"{"status":"ok"}"#).await;

        let mut entries = fs::read_dir(store.root.join("feed")).await.unwrap();
        let entry = entries.next_entry().await.unwrap().expect("one file");
        assert!(entry.file_name().to_string_lossy().ends_with("_1.0_2.0.json"));

        let _ = fs::remove_dir_all(&root).await;
    }
}
