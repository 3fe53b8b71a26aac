// ABOUTME: PersistenceGateway trait: durable batch writer and audio-metadata updater.
// ABOUTME: Includes MemoryGateway, an in-process store that also serves history queries.

use std::sync::Mutex;

use async_trait::async_trait;

use super::record::{AudioAttachment, MessageRecord};
use crate::conversation::MessageKind;

/// Durable storage for dialogue turns.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Store every record or none of them.
    async fn save_all(&self, records: Vec<MessageRecord>) -> anyhow::Result<()>;

    /// Attach an audio file to a stored message. An attachment that arrives
    /// before its message is held until the message is saved.
    async fn update_audio_metadata(&self, attachment: AudioAttachment) -> anyhow::Result<()>;

    /// The most recent `normal` records of a device/role pair, oldest first.
    async fn find_recent(
        &self,
        device_id: &str,
        role_id: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<MessageRecord>>;
}

/// Gateway that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    records: Vec<MessageRecord>,
    batches: Vec<Vec<u64>>,
    parked: Vec<AudioAttachment>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, in save order.
    pub fn records(&self) -> Vec<MessageRecord> {
        self.lock().records.clone()
    }

    /// Message ids grouped by the batch that stored them.
    pub fn batches(&self) -> Vec<Vec<u64>> {
        self.lock().batches.clone()
    }

    /// Attachments still waiting for their message.
    pub fn parked_attachments(&self) -> Vec<AudioAttachment> {
        self.lock().parked.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn save_all(&self, records: Vec<MessageRecord>) -> anyhow::Result<()> {
        let mut state = self.lock();
        let mut ids = Vec::with_capacity(records.len());
        for mut record in records {
            state.next_id += 1;
            record.message_id = Some(state.next_id);
            ids.push(state.next_id);

            if let Some(pos) = state.parked.iter().position(|a| record.matches(a)) {
                let attachment = state.parked.remove(pos);
                record.audio_path = Some(attachment.audio_path);
            }
            state.records.push(record);
        }
        state.batches.push(ids);
        Ok(())
    }

    async fn update_audio_metadata(&self, attachment: AudioAttachment) -> anyhow::Result<()> {
        let mut state = self.lock();
        match state.records.iter_mut().find(|r| r.matches(&attachment)) {
            Some(record) => record.audio_path = Some(attachment.audio_path),
            None => state.parked.push(attachment),
        }
        Ok(())
    }

    async fn find_recent(
        &self,
        device_id: &str,
        role_id: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<MessageRecord>> {
        let state = self.lock();
        Ok(recent_normal(state.records.iter(), device_id, role_id, limit))
    }
}

/// Select the newest `limit` normal records for a device/role pair and return
/// them oldest first, user before assistant when creation times tie.
pub(crate) fn recent_normal<'a>(
    records: impl Iterator<Item = &'a MessageRecord>,
    device_id: &str,
    role_id: i64,
    limit: usize,
) -> Vec<MessageRecord> {
    let mut matching: Vec<MessageRecord> = records
        .filter(|r| r.device_id == device_id && r.role_id == role_id)
        .filter(|r| r.kind == MessageKind::Normal)
        .cloned()
        .collect();
    matching.sort_by_key(|r| (r.created_at_millis, sender_rank(r)));
    let skip = matching.len().saturating_sub(limit);
    matching.split_off(skip)
}

fn sender_rank(record: &MessageRecord) -> u8 {
    match record.sender {
        crate::conversation::Role::User => 0,
        _ => 1,
    }
}
