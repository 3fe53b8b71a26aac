// ABOUTME: File-backed gateway: appends message records as JSONL lines, one batch per write.
// ABOUTME: Audio updates rewrite the file atomically via tmp + rename.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::gateway::{PersistenceGateway, recent_normal};
use super::record::{AudioAttachment, MessageRecord};

/// Stores records in a single JSONL file.
pub struct JsonlGateway {
    path: PathBuf,
    state: Mutex<JsonlState>,
}

struct JsonlState {
    next_id: u64,
    parked: Vec<AudioAttachment>,
}

impl JsonlGateway {
    /// Open (or create) the store at `path`, continuing its id sequence.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let next_id = read_records(&path)?
            .iter()
            .filter_map(|r| r.message_id)
            .max()
            .unwrap_or(0);
        Ok(Self {
            path,
            state: Mutex::new(JsonlState {
                next_id,
                parked: Vec::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored record, in file order.
    pub fn records(&self) -> anyhow::Result<Vec<MessageRecord>> {
        read_records(&self.path)
    }
}

#[async_trait]
impl PersistenceGateway for JsonlGateway {
    async fn save_all(&self, mut records: Vec<MessageRecord>) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;

        let mut buf = String::new();
        let mut next_id = state.next_id;
        for record in &mut records {
            next_id += 1;
            record.message_id = Some(next_id);
            if let Some(pos) = state.parked.iter().position(|a| record.matches(a)) {
                record.audio_path = Some(state.parked.remove(pos).audio_path);
            }
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        // The whole batch goes out in one write so a reader never sees half a turn.
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buf.as_bytes())?;
        file.flush()?;

        state.next_id = next_id;
        Ok(())
    }

    async fn update_audio_metadata(&self, attachment: AudioAttachment) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;

        let mut records = read_records(&self.path)?;
        let Some(record) = records.iter_mut().find(|r| r.matches(&attachment)) else {
            state.parked.push(attachment);
            return Ok(());
        };
        record.audio_path = Some(attachment.audio_path);

        let mut content = String::new();
        for record in &records {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }
        let tmp_path = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp_path, &content)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    async fn find_recent(
        &self,
        device_id: &str,
        role_id: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<MessageRecord>> {
        let _state = self.state.lock().await;
        let records = read_records(&self.path)?;
        Ok(recent_normal(records.iter(), device_id, role_id, limit))
    }
}

fn read_records(path: &Path) -> anyhow::Result<Vec<MessageRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
        .collect()
}
