// ABOUTME: Persisted message records and the audio-attachment update that follows a turn.
// ABOUTME: Also holds the device-id and creation-time key conventions shared with audio file paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::{Message, MessageKind, Role};

/// Layout of the creation-time key used in audio file names and attachment lookups.
const CREATED_AT_KEY_FORMAT: &str = "%Y-%m-%dT%H%M%S%.3f";

/// The durable shape of one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Assigned by the gateway on save; `None` until then.
    #[serde(default)]
    pub message_id: Option<u64>,
    pub device_id: String,
    pub session_id: String,
    pub role_id: i64,
    pub sender: Role,
    pub text: String,
    pub kind: MessageKind,
    /// Creation time truncated to whole seconds, as epoch milliseconds.
    pub created_at: i64,
    /// Full-precision creation time. Two turns inside one second share
    /// `created_at` but never this value.
    pub created_at_millis: i64,
    pub token_count: u32,
    pub first_completion_latency_ms: u32,
    pub first_audio_latency_ms: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
}

impl MessageRecord {
    /// Record for `message` as sent within a session.
    pub fn from_message(
        message: &Message,
        device_id: &str,
        session_id: &str,
        role_id: i64,
        kind: MessageKind,
    ) -> Self {
        Self {
            message_id: None,
            device_id: device_id.to_string(),
            session_id: session_id.to_string(),
            role_id,
            sender: message.role,
            text: message.text.clone(),
            kind,
            created_at: truncate_to_second(message.created_at_millis),
            created_at_millis: message.created_at_millis,
            token_count: message.token_count,
            first_completion_latency_ms: message.first_completion_latency_ms,
            first_audio_latency_ms: message.first_audio_latency_ms,
            audio_path: None,
        }
    }

    pub fn with_token_count(mut self, tokens: u32) -> Self {
        self.token_count = tokens;
        self
    }

    pub fn with_first_completion_latency(mut self, latency_ms: u32) -> Self {
        self.first_completion_latency_ms = latency_ms;
        self
    }

    /// Rebuild the context message this record was made from.
    pub fn to_message(&self) -> Message {
        let base = match self.sender {
            Role::Assistant => Message::assistant(&self.text),
            Role::System => Message::system(&self.text),
            Role::User | Role::Tool => Message::user(&self.text),
        };
        Message {
            role: self.sender,
            token_count: self.token_count,
            first_completion_latency_ms: self.first_completion_latency_ms,
            first_audio_latency_ms: self.first_audio_latency_ms,
            kind: self.kind,
            ..base.at(self.created_at_millis)
        }
    }

    /// Whether an audio attachment addresses this record.
    pub fn matches(&self, attachment: &AudioAttachment) -> bool {
        self.device_id == attachment.device_id
            && self.role_id == attachment.role_id
            && self.sender == attachment.sender
            && self.created_at_millis == attachment.created_at_millis
    }
}

/// "Attach this audio file to that message" update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioAttachment {
    /// Normalized (colon-separated) device id.
    pub device_id: String,
    pub role_id: i64,
    pub sender: Role,
    pub kind: MessageKind,
    /// Human-readable key, identical to the one embedded in the audio file name.
    pub created_at_key: String,
    pub created_at_millis: i64,
    pub audio_path: String,
}

/// Epoch milliseconds truncated to the whole second.
pub fn truncate_to_second(millis: i64) -> i64 {
    millis.div_euclid(1000) * 1000
}

/// Millisecond-precision creation key, e.g. `2026-03-01T093005.120`.
pub fn created_at_key(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .format(CREATED_AT_KEY_FORMAT)
        .to_string()
}

/// Device ids are MAC-style (`aa:bb:cc`); colons are not welcome in paths.
pub fn device_path_segment(device_id: &str) -> String {
    device_id.replace(':', "-")
}

/// Inverse of [`device_path_segment`].
pub fn normalize_device_id(device_id: &str) -> String {
    device_id.replace('-', ":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_drops_sub_second_part() {
        assert_eq!(truncate_to_second(1_700_000_000_999), 1_700_000_000_000);
        assert_eq!(truncate_to_second(1_700_000_000_000), 1_700_000_000_000);
        assert_eq!(truncate_to_second(-1), -1000);
    }

    #[test]
    fn created_at_key_keeps_millis() {
        assert_eq!(created_at_key(0), "1970-01-01T000000.000");
        assert_eq!(created_at_key(1_120), "1970-01-01T000001.120");
    }

    #[test]
    fn device_segment_round_trips() {
        let segment = device_path_segment("aa:bb:cc:dd");
        assert_eq!(segment, "aa-bb-cc-dd");
        assert_eq!(normalize_device_id(&segment), "aa:bb:cc:dd");
    }

    #[test]
    fn record_keeps_both_precisions() {
        let msg = Message::user("hello").at(5_432);
        let record = MessageRecord::from_message(&msg, "dev", "s", 2, MessageKind::Normal);
        assert_eq!(record.created_at, 5_000);
        assert_eq!(record.created_at_millis, 5_432);
        assert_eq!(record.sender, Role::User);
        assert!(record.message_id.is_none());
    }

    #[test]
    fn to_message_restores_role_and_time() {
        let msg = Message::assistant("hi there").at(9_001);
        let record = MessageRecord::from_message(&msg, "dev", "s", 2, MessageKind::Normal)
            .with_token_count(12);
        let back = record.to_message();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.text, "hi there");
        assert_eq!(back.created_at_millis, 9_001);
        assert_eq!(back.token_count, 12);
    }

    #[test]
    fn attachment_matches_on_full_precision_time() {
        let record = MessageRecord::from_message(
            &Message::user("q").at(1_500),
            "aa:bb",
            "s",
            1,
            MessageKind::Normal,
        );
        let mut attachment = AudioAttachment {
            device_id: "aa:bb".into(),
            role_id: 1,
            sender: Role::User,
            kind: MessageKind::Normal,
            created_at_key: created_at_key(1_500),
            created_at_millis: 1_500,
            audio_path: "a.wav".into(),
        };
        assert!(record.matches(&attachment));
        attachment.created_at_millis = 1_400;
        assert!(!record.matches(&attachment));
    }
}
