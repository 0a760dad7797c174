//! Durable file adapter.
//!
//! One JSON document per event. Writes go to a hidden temporary file in the
//! target directory and are renamed into place, so a reader never sees a
//! partially written document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{SinkError, TransportSink};
use crate::serialize::SerializedPayload;

const MAX_MESSAGE_LEN: usize = 120;

/// Writes each event to `<dir>/<message>_<category>_<event id>_<time>.json`.
///
/// Only the message part is shortened; category, event id and time are
/// always kept whole so distinct events never share a file.
#[derive(Debug, Clone)]
pub struct DurableFileSink {
    dir: PathBuf,
}

impl DurableFileSink {
    /// Creates a sink writing into `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path for `payload`.
    #[must_use]
    pub fn path_for(&self, payload: &SerializedPayload) -> PathBuf {
        let message: String = payload.message.chars().take(MAX_MESSAGE_LEN).collect();
        let stem = format!(
            "{}_{}_{}_{}",
            message,
            payload.category,
            payload.event_id,
            payload.received_at.format("%Y%m%dT%H%M%S%.6fZ"),
        );
        self.dir.join(format!("{}.json", sanitize_file_stem(&stem)))
    }
}

#[async_trait]
impl TransportSink for DurableFileSink {
    async fn send(&self, payload: &SerializedPayload) -> Result<(), SinkError> {
        let bytes =
            serde_json::to_vec_pretty(&payload.data).map_err(|e| SinkError::Encode(e.to_string()))?;
        let path = self.path_for(payload);
        write_atomic(&path, &bytes).await?;
        tracing::debug!(path = %path.display(), event_id = %payload.event_id, "event written");
        Ok(())
    }

    async fn close(&self) {}
}

/// Replaces every character outside `[A-Za-z0-9-_. ]` with `_`.
#[must_use]
pub fn sanitize_file_stem(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Writes `bytes` to `path` through a temporary file in the same directory.
///
/// The temporary file is removed if any step fails.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::EventCategory;

    fn payload() -> SerializedPayload {
        let Some(received_at) = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).single() else {
            panic!("valid timestamp");
        };
        SerializedPayload {
            category: EventCategory::ResultReady,
            event_id: "id:1/2".into(),
            message: "Result 1 ready".into(),
            generated_at: None,
            received_at,
            data: serde_json::json!({"EventId": "id:1/2"}),
        }
    }

    fn tmp_files(dir: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            panic!("dir should be readable");
        };
        entries
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[test]
    fn stem_replaces_separators_and_colons() {
        assert_eq!(sanitize_file_stem("a:b/c\\d e.f"), "a_b_c_d e.f");
    }

    #[test]
    fn path_is_composed_from_payload() {
        let sink = DurableFileSink::new("logs");
        let path = sink.path_for(&payload());
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            panic!("file name expected");
        };
        assert_eq!(
            name,
            "Result 1 ready_result_ready_id_1_2_20240506T070809.000000Z.json"
        );
    }

    #[tokio::test]
    async fn long_messages_keep_event_ids_apart() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let sink = DurableFileSink::new(dir.path());
        let message = format!("Tightening result ready for joint {}", "J".repeat(200));
        for id in ["evt-A", "evt-B"] {
            let event = SerializedPayload {
                event_id: id.into(),
                message: message.clone(),
                ..payload()
            };
            let name = sink.path_for(&event).to_string_lossy().into_owned();
            assert!(name.contains(id), "{name} should carry {id}");
            assert!(name.ends_with("_20240506T070809.000000Z.json"));
            let Ok(()) = sink.send(&event).await else {
                panic!("send should succeed");
            };
        }
        let Ok(entries) = std::fs::read_dir(dir.path()) else {
            panic!("dir should be readable");
        };
        assert_eq!(entries.count(), 2);
    }

    #[tokio::test]
    async fn send_writes_complete_document_and_no_temp_file() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let sink = DurableFileSink::new(dir.path().join("results"));
        let Ok(()) = sink.send(&payload()).await else {
            panic!("send should succeed");
        };

        let path = sink.path_for(&payload());
        let Ok(text) = std::fs::read_to_string(&path) else {
            panic!("document should exist");
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
            panic!("document should be complete JSON");
        };
        assert_eq!(value.get("EventId"), Some(&serde_json::json!("id:1/2")));
        assert_eq!(tmp_files(sink.dir()), 0);
    }

    #[tokio::test]
    async fn interrupted_write_leaves_previous_document_intact() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let path = dir.path().join("doc.json");
        let Ok(()) = write_atomic(&path, b"{\"v\":1}").await else {
            panic!("first write should succeed");
        };
        // A writer that died before its rename leaves only a temp file behind.
        let Ok(()) = std::fs::write(dir.path().join(".doc.json.dead.tmp"), b"{\"v\":") else {
            panic!("temp write");
        };
        let Ok(text) = std::fs::read_to_string(&path) else {
            panic!("document should exist");
        };
        assert_eq!(text, "{\"v\":1}");
    }

    #[tokio::test]
    async fn failed_rename_cleans_up_temp_file() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let target = dir.path().join("occupied.json");
        let Ok(()) = std::fs::create_dir_all(target.join("child")) else {
            panic!("dir setup");
        };

        assert!(write_atomic(&target, b"{}").await.is_err());
        assert_eq!(tmp_files(dir.path()), 0);
    }
}
