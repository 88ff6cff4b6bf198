mod registry;
mod types;

use chrono::{DateTime, Utc};
use zbus::zvariant::OwnedObjectPath;

pub use registry::SmsRegistry;
pub use types::{ConcatInfo, SmsPart, SmsState};

use super::ModemError;

/// A short message, single-part or reassembled from concatenated parts.
#[derive(Debug, Clone)]
pub struct SmsMessage {
    path: OwnedObjectPath,
    state: SmsState,
    multipart: bool,
    reference: u16,
    total_parts: u8,
    parts: Vec<SmsPart>,
    received_at: DateTime<Utc>,
}

impl SmsMessage {
    /// Create a single-part message from its only fragment.
    pub(crate) fn single(path: OwnedObjectPath, part: SmsPart, state: SmsState) -> Self {
        Self {
            path,
            state,
            multipart: false,
            reference: 0,
            total_parts: 1,
            parts: vec![part],
            received_at: Utc::now(),
        }
    }

    /// Create a multipart message seeded with its first-seen fragment.
    pub(crate) fn multipart(
        path: OwnedObjectPath,
        part: SmsPart,
        info: ConcatInfo,
        state: SmsState,
    ) -> Self {
        Self {
            path,
            state,
            multipart: true,
            reference: info.reference,
            total_parts: info.total,
            parts: vec![part],
            received_at: Utc::now(),
        }
    }

    /// Object path identity of this message.
    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    /// Whether the message arrived over the air or from storage.
    pub fn state(&self) -> SmsState {
        self.state
    }

    /// Whether this is a concatenated message.
    pub fn is_multipart(&self) -> bool {
        self.multipart
    }

    /// Concatenation reference number; 0 for single-part messages.
    pub fn reference(&self) -> u16 {
        self.reference
    }

    /// Declared part count; 1 for single-part messages.
    pub fn total_parts(&self) -> u8 {
        self.total_parts
    }

    /// The fragments held so far, in sequence order.
    pub fn parts(&self) -> &[SmsPart] {
        &self.parts
    }

    /// When the first fragment was taken in.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Whether every declared part is held.
    pub fn is_complete(&self) -> bool {
        self.parts.len() == usize::from(self.total_parts)
    }

    /// Whether any held fragment occupies the given storage slot.
    pub fn contains_index(&self, storage_index: u32) -> bool {
        self.parts
            .iter()
            .any(|part| part.storage_index == storage_index)
    }

    /// Storage slots occupied by the held fragments.
    pub fn part_indexes(&self) -> Vec<u32> {
        self.parts.iter().map(|part| part.storage_index).collect()
    }

    /// The reassembled payload, available only once complete.
    pub fn assembled_payload(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut payload = Vec::new();
        for part in &self.parts {
            payload.extend_from_slice(&part.payload);
        }
        Some(payload)
    }

    /// Merge another fragment of the same logical message.
    ///
    /// Rejections leave the message untouched.
    pub(crate) fn merge_part(&mut self, part: SmsPart) -> Result<(), ModemError> {
        let Some(info) = part.concat else {
            return Err(ModemError::InvariantViolation(
                "single-part fragment offered to a multipart message".into(),
            ));
        };

        if self.is_complete() {
            return Err(ModemError::AlreadyExists {
                what: format!("every declared part of message {}", self.path),
            });
        }
        if info.sequence > self.total_parts {
            return Err(ModemError::ProtocolFailure {
                operation: "sms part merge",
                reason: format!(
                    "sequence {} exceeds declared total {}",
                    info.sequence, self.total_parts
                ),
            });
        }
        if self.sequence_held(info.sequence) {
            return Err(ModemError::AlreadyExists {
                what: format!("part {} of message {}", info.sequence, self.path),
            });
        }

        let position = self
            .parts
            .iter()
            .take_while(|held| held.concat.is_some_and(|held| held.sequence < info.sequence))
            .count();
        self.parts.insert(position, part);
        Ok(())
    }

    fn sequence_held(&self, sequence: u8) -> bool {
        self.parts
            .iter()
            .any(|part| part.concat.is_some_and(|held| held.sequence == sequence))
    }
}
