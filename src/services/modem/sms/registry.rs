use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{debug, instrument};
use zbus::zvariant::OwnedObjectPath;

use crate::services::modem::{
    ModemError, ModemEvent, ObjectPaths, ObjectPublisher, PublishedObject,
};

use super::{ConcatInfo, SmsMessage, SmsPart, SmsState};

/// The set of all short messages held for one modem.
///
/// The registry is the reassembly point for concatenated messages: one
/// fragment arrives at a time and is merged into the message carrying the
/// matching reference number. No two held fragments anywhere in the
/// registry share a storage index.
pub struct SmsRegistry {
    messages: RwLock<HashMap<OwnedObjectPath, SmsMessage>>,
    paths: Arc<ObjectPaths>,
    publisher: Arc<dyn ObjectPublisher>,
    events_tx: broadcast::Sender<ModemEvent>,
}

impl SmsRegistry {
    pub(crate) fn new(
        paths: Arc<ObjectPaths>,
        publisher: Arc<dyn ObjectPublisher>,
        events_tx: broadcast::Sender<ModemEvent>,
    ) -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            paths,
            publisher,
            events_tx,
        }
    }

    /// Merge one incoming fragment, returning the identity of the message
    /// it landed in.
    ///
    /// A single-part fragment registers a message and announces it
    /// immediately. A multipart fragment merges into the message with the
    /// matching reference, or seeds a new one; the announcement fires
    /// exactly once, at the merge that completes the message.
    ///
    /// # Errors
    /// `DuplicateIndex` when the fragment's storage slot is already held
    /// anywhere in the registry; `AlreadyExists` for a repeated sequence
    /// number or an already-complete message; `ProtocolFailure` for a
    /// malformed concatenation header. Rejections mutate nothing.
    #[instrument(skip(self, part), fields(index = part.storage_index))]
    pub async fn take_part(
        &self,
        part: SmsPart,
        received: bool,
    ) -> Result<OwnedObjectPath, ModemError> {
        let state = if received {
            SmsState::Received
        } else {
            SmsState::Stored
        };

        let (message_path, announced) = {
            let mut messages = self.messages.write().await;

            if messages
                .values()
                .any(|message| message.contains_index(part.storage_index))
            {
                return Err(ModemError::DuplicateIndex {
                    index: part.storage_index,
                });
            }

            match part.concat {
                Some(info) => {
                    Self::validate_concat(info)?;
                    self.merge_multipart(&mut messages, part, info, state)?
                }
                None => {
                    let path = self.paths.next_sms();
                    let message = SmsMessage::single(path.clone(), part, state);
                    messages.insert(path.clone(), message);
                    (path.clone(), Some((path, state)))
                }
            }
        };

        if let Some((path, state)) = announced {
            self.announce(path, state).await;
        }

        Ok(message_path)
    }

    /// Remove a message, returning it for device-side cleanup.
    ///
    /// Removal happens before any device command is issued, so a
    /// concurrent duplicate delete finds nothing; it is never rolled back.
    ///
    /// # Errors
    /// `NotFound` when no message has this identity.
    pub(crate) async fn remove(&self, path: &OwnedObjectPath) -> Result<SmsMessage, ModemError> {
        self.messages
            .write()
            .await
            .remove(path)
            .ok_or_else(|| ModemError::NotFound {
                kind: "SMS",
                identity: path.to_string(),
            })
    }

    /// Snapshot of a message by identity.
    pub async fn message(&self, path: &OwnedObjectPath) -> Option<SmsMessage> {
        self.messages.read().await.get(path).cloned()
    }

    /// Identities of every registered message.
    pub async fn message_paths(&self) -> Vec<OwnedObjectPath> {
        self.messages.read().await.keys().cloned().collect()
    }

    /// Number of registered messages, complete or not.
    pub async fn count(&self) -> usize {
        self.messages.read().await.len()
    }

    fn validate_concat(info: ConcatInfo) -> Result<(), ModemError> {
        if info.total == 0 || info.sequence == 0 || info.sequence > info.total {
            return Err(ModemError::ProtocolFailure {
                operation: "sms part merge",
                reason: format!(
                    "malformed concatenation header: sequence {} of {}",
                    info.sequence, info.total
                ),
            });
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn merge_multipart(
        &self,
        messages: &mut HashMap<OwnedObjectPath, SmsMessage>,
        part: SmsPart,
        info: ConcatInfo,
        state: SmsState,
    ) -> Result<(OwnedObjectPath, Option<(OwnedObjectPath, SmsState)>), ModemError> {
        if let Some((path, message)) = messages
            .iter_mut()
            .find(|(_, message)| message.is_multipart() && message.reference() == info.reference)
        {
            let path = path.clone();
            message.merge_part(part)?;
            let announced = message
                .is_complete()
                .then(|| (path.clone(), message.state()));
            Ok((path, announced))
        } else {
            let path = self.paths.next_sms();
            let message = SmsMessage::multipart(path.clone(), part, info, state);
            // Declared totals of one complete immediately.
            let announced = message.is_complete().then(|| (path.clone(), state));
            messages.insert(path.clone(), message);
            Ok((path, announced))
        }
    }

    async fn announce(&self, path: OwnedObjectPath, state: SmsState) {
        debug!(sms = %path, "Message complete, announcing");
        self.publisher
            .publish(PublishedObject::Sms(path.clone()))
            .await;
        let _ = self.events_tx.send(ModemEvent::SmsAdded {
            sms: path,
            received: state == SmsState::Received,
        });
    }
}
