//! Append-only audit log: one JSON object per line.
//!
//! Logging must never break a handler, so write failures are reported via the
//! log facade and otherwise swallowed.

use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct AuditLog {
    path: PathBuf,
    // serializes appends so concurrent handlers do not interleave lines
    guard: Mutex<()>,
}

impl AuditLog {
    /// Open (creating if missing) the log file at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::File::create(&path).await?;
            log::info!("audit log created at {}", path.display());
        }
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry: `{timestamp, kind, status, ...detail}`. `detail`
    /// should be a JSON object; its fields are inlined into the entry.
    pub async fn append(&self, kind: &str, status: &str, detail: serde_json::Value) {
        let mut entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "kind": kind,
            "status": status,
        });
        if let (Some(map), serde_json::Value::Object(extra)) = (entry.as_object_mut(), detail) {
            for (k, v) in extra {
                map.insert(k, v);
            }
        }
        let mut line = entry.to_string();
        line.push('\n');

        let _guard = self.guard.lock().await;
        let result = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await;
        match result {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    log::warn!("audit log write failed ({}): {}", self.path.display(), e);
                }
            }
            Err(e) => {
                log::warn!("audit log open failed ({}): {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_one_json_line_per_entry() {
        let dir = std::env::temp_dir().join(format!("pibot-audit-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("logs.json");
        let audit = AuditLog::open(&path).await.expect("open audit log");

        audit
            .append("AI_INTERACTION", "SUCCESS", json!({ "interactionId": "abc" }))
            .await;
        audit
            .append("COMMAND_EXECUTION", "FAILURE", json!({ "reason": "unauthorized" }))
            .await;

        let content = tokio::fs::read_to_string(&path).await.expect("read log");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("valid json");
        assert_eq!(first["kind"], "AI_INTERACTION");
        assert_eq!(first["status"], "SUCCESS");
        assert_eq!(first["interactionId"], "abc");
        assert!(first["timestamp"].is_string());
    }
}
