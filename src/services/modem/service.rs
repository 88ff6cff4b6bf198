use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, instrument, warn};
use zbus::zvariant::OwnedObjectPath;

use crate::config::ModemConfig;

use super::{
    BearerStatus, CommandTransport, ModemError, ModemEvent, ObjectPaths, ObjectPublisher,
    PublishedObject,
    modem::Modem,
    sms::SmsPart,
};

/// Top-level modem management service.
///
/// Tracks the modems handed over by the discovery collaborator, assigns
/// object-path identities, announces lifecycle to the exposure layer, and
/// routes unsolicited notifications to the owning entity.
pub struct ModemService {
    modems: RwLock<HashMap<OwnedObjectPath, Arc<Modem>>>,
    paths: Arc<ObjectPaths>,
    publisher: Arc<dyn ObjectPublisher>,
    events_tx: broadcast::Sender<ModemEvent>,
    config: ModemConfig,
}

impl ModemService {
    /// Create a service with default configuration.
    pub fn new(publisher: Arc<dyn ObjectPublisher>) -> Self {
        Self::with_config(publisher, ModemConfig::default())
    }

    /// Create a service with explicit configuration.
    pub fn with_config(publisher: Arc<dyn ObjectPublisher>, config: ModemConfig) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity);

        Self {
            modems: RwLock::new(HashMap::new()),
            paths: Arc::new(ObjectPaths::default()),
            publisher,
            events_tx,
            config,
        }
    }

    /// Subscribe to service events.
    pub fn events(&self) -> broadcast::Receiver<ModemEvent> {
        self.events_tx.subscribe()
    }

    /// Service events as a stream.
    ///
    /// A slow consumer that falls behind the channel capacity skips the
    /// missed events and keeps going.
    pub fn event_stream(&self) -> impl Stream<Item = ModemEvent> + Send {
        let mut events_rx = self.events_tx.subscribe();
        stream! {
            loop {
                match events_rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Event consumer lagged, skipping missed events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Register a modem discovered on `port` and run its first-time setup.
    ///
    /// Returns `None` when the port matches the ignore configuration.
    ///
    /// # Errors
    /// Returns the initialization failure; the modem is not registered.
    #[instrument(skip(self, transport))]
    pub async fn add_modem(
        &self,
        port: &str,
        transport: Arc<dyn CommandTransport>,
    ) -> Result<Option<Arc<Modem>>, ModemError> {
        if self.should_ignore_port(port) {
            info!("Ignoring modem port based on configuration");
            return Ok(None);
        }

        let path = self.paths.next_modem();
        let modem = Modem::new(
            path.clone(),
            port.to_string(),
            transport,
            Duration::from_secs(self.config.command_timeout_secs),
            Arc::clone(&self.paths),
            Arc::clone(&self.publisher),
            self.events_tx.clone(),
        );

        modem.initialize().await?;

        self.modems
            .write()
            .await
            .insert(path.clone(), Arc::clone(&modem));
        self.publisher
            .publish(PublishedObject::Modem(path.clone()))
            .await;
        let _ = self.events_tx.send(ModemEvent::ModemAdded(path));

        info!("Modem registered");
        Ok(Some(modem))
    }

    /// Remove a modem, tearing down its bearers.
    ///
    /// # Errors
    /// `NotFound` when no modem has this identity.
    #[instrument(skip(self))]
    pub async fn remove_modem(&self, path: &OwnedObjectPath) -> Result<(), ModemError> {
        let modem = self
            .modems
            .write()
            .await
            .remove(path)
            .ok_or_else(|| ModemError::NotFound {
                kind: "modem",
                identity: path.to_string(),
            })?;

        modem.dispose().await;
        self.publisher
            .unpublish(PublishedObject::Modem(path.clone()))
            .await;
        let _ = self.events_tx.send(ModemEvent::ModemRemoved(path.clone()));

        info!("Modem removed");
        Ok(())
    }

    /// Look up a modem by identity.
    pub async fn modem(&self, path: &OwnedObjectPath) -> Option<Arc<Modem>> {
        self.modems.read().await.get(path).cloned()
    }

    /// Identities of every registered modem.
    pub async fn modem_paths(&self) -> Vec<OwnedObjectPath> {
        self.modems.read().await.keys().cloned().collect()
    }

    /// Deliver an unsolicited bearer status report.
    ///
    /// Reports for unknown bearers are logged and dropped; stale hardware
    /// chatter is not an error.
    pub async fn notify_bearer_status(&self, bearer: &OwnedObjectPath, status: BearerStatus) {
        let modems: Vec<_> = self.modems.read().await.values().cloned().collect();
        for modem in modems {
            if modem.notify_bearer_status(bearer, status).await {
                return;
            }
        }
        debug!(bearer = %bearer, ?status, "Status report for unknown bearer, ignoring");
    }

    /// Deliver a raw SMS fragment for the given modem.
    ///
    /// # Errors
    /// `NotFound` for an unknown modem; otherwise the registry's
    /// rejection.
    pub async fn take_sms_part(
        &self,
        modem: &OwnedObjectPath,
        part: SmsPart,
        received: bool,
    ) -> Result<OwnedObjectPath, ModemError> {
        let modem = self
            .modem(modem)
            .await
            .ok_or_else(|| ModemError::NotFound {
                kind: "modem",
                identity: modem.to_string(),
            })?;
        modem.sms.take_part(part, received).await
    }

    fn should_ignore_port(&self, port: &str) -> bool {
        self.config
            .ignored_ports
            .iter()
            .any(|pattern| port.contains(pattern))
    }
}
