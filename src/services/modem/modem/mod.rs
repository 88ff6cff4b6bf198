use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, instrument, warn};
use zbus::zvariant::OwnedObjectPath;

use crate::services::common::Property;

use super::{
    BearerStatus, CommandTransport, ModemError, ModemEvent, ObjectPaths, ObjectPublisher,
    PublishedObject,
    bearer::{Bearer, BearerProperties},
    capability::{CapabilityFlow, CapabilitySupport},
    sequencer::{self, CancelToken, OperationContext, Step, StepOutcome},
    sms::SmsRegistry,
};

/// One managed modem device.
///
/// Owns the command transport for its ports, the bearers configured on it,
/// and the SMS registry. All per-modem operations are cooperative state
/// machines driven on the caller's task; separate modems proceed fully in
/// parallel and share no mutable state.
pub struct Modem {
    path: OwnedObjectPath,
    port: String,
    transport: Arc<dyn CommandTransport>,
    command_timeout: Duration,

    /// Whether the radio stack is powered and ready.
    pub enabled: Property<bool>,

    /// Short messages held for this modem.
    pub sms: SmsRegistry,

    bearers: RwLock<HashMap<OwnedObjectPath, Arc<Bearer>>>,
    time_support: Mutex<CapabilitySupport>,
    paths: Arc<ObjectPaths>,
    publisher: Arc<dyn ObjectPublisher>,
    events_tx: broadcast::Sender<ModemEvent>,
}

impl Modem {
    pub(crate) fn new(
        path: OwnedObjectPath,
        port: String,
        transport: Arc<dyn CommandTransport>,
        command_timeout: Duration,
        paths: Arc<ObjectPaths>,
        publisher: Arc<dyn ObjectPublisher>,
        events_tx: broadcast::Sender<ModemEvent>,
    ) -> Arc<Self> {
        let sms = SmsRegistry::new(
            Arc::clone(&paths),
            Arc::clone(&publisher),
            events_tx.clone(),
        );

        Arc::new(Self {
            path,
            port,
            transport,
            command_timeout,
            enabled: Property::new(false),
            sms,
            bearers: RwLock::new(HashMap::new()),
            time_support: Mutex::new(CapabilitySupport::default()),
            paths,
            publisher,
            events_tx,
        })
    }

    /// Object path identity of this modem.
    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    /// Name of the control port this modem was registered with.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// First-time setup after registration.
    ///
    /// Runs the init command sequence, then probes each capability
    /// interface. An unsupported capability is logged and skipped; its
    /// interface is simply never published.
    ///
    /// # Errors
    /// Returns the failing init step's error, or a capability probe's
    /// transport error.
    #[instrument(skip(self), fields(modem = %self.path))]
    pub(crate) async fn initialize(self: &Arc<Self>) -> Result<(), ModemError> {
        let mut ctx = OperationContext::new("modem initialize");
        sequencer::run(self, &mut ctx, &init_steps()).await?;

        match self.initialize_time().await {
            Ok(()) => {}
            Err(ModemError::Unsupported { capability }) => {
                debug!(capability, "Capability not supported, interface not published");
            }
            Err(error) => return Err(error),
        }

        info!("Modem initialized");
        Ok(())
    }

    /// Power up the radio stack.
    ///
    /// # Errors
    /// Returns the failing step's error or `Cancelled`.
    #[instrument(skip(self, cancel), fields(modem = %self.path))]
    pub async fn enable(self: &Arc<Self>, cancel: CancelToken) -> Result<(), ModemError> {
        if self.enabled.get() {
            return Ok(());
        }
        let mut ctx = OperationContext::new("modem enable").with_cancel(cancel);
        sequencer::run(self, &mut ctx, &enable_steps()).await?;
        self.enabled.set(true);
        info!("Modem enabled");
        Ok(())
    }

    /// Power down the radio stack, disconnecting bearers first.
    ///
    /// # Errors
    /// Returns the failing step's error; bearer disconnect failures are
    /// logged and do not block the power-down.
    #[instrument(skip(self, cancel), fields(modem = %self.path))]
    pub async fn disable(self: &Arc<Self>, cancel: CancelToken) -> Result<(), ModemError> {
        if !self.enabled.get() {
            return Ok(());
        }

        let bearers: Vec<_> = self.bearers.read().await.values().cloned().collect();
        for bearer in bearers {
            if let Err(error) = bearer.disconnect().await {
                warn!(bearer = %bearer.path(), "Bearer disconnect before disable failed: {error}");
            }
        }

        let mut ctx = OperationContext::new("modem disable").with_cancel(cancel);
        sequencer::run(self, &mut ctx, &disable_steps()).await?;
        self.enabled.set(false);
        info!("Modem disabled");
        Ok(())
    }

    /// Initialize the network-time capability interface.
    ///
    /// The support probe runs at most once per modem instance; later calls
    /// reuse the cached answer.
    ///
    /// # Errors
    /// `Unsupported` when the device lacks a clock, or the probe's
    /// transport error.
    pub async fn initialize_time(self: &Arc<Self>) -> Result<(), ModemError> {
        time_capability().initialize(self, &self.time_support).await?;
        self.publisher
            .publish(PublishedObject::Interface {
                modem: self.path.clone(),
                name: "time",
            })
            .await;
        Ok(())
    }

    /// Enable network time reporting.
    ///
    /// # Errors
    /// `Unsupported` when the capability was never successfully
    /// initialized; the failing step's error otherwise.
    pub async fn enable_time(self: &Arc<Self>) -> Result<(), ModemError> {
        self.require_time_support().await?;
        let mut ctx = OperationContext::new("time enable");
        time_capability().enable(self, &mut ctx).await
    }

    /// Disable network time reporting.
    ///
    /// # Errors
    /// `Unsupported` when the capability was never successfully
    /// initialized; the failing step's error otherwise.
    pub async fn disable_time(self: &Arc<Self>) -> Result<(), ModemError> {
        self.require_time_support().await?;
        let mut ctx = OperationContext::new("time disable");
        time_capability().disable(self, &mut ctx).await
    }

    /// Create a bearer with the given properties and publish it.
    pub async fn create_bearer(&self, properties: BearerProperties) -> Arc<Bearer> {
        let path = self.paths.next_bearer();
        let bearer = Bearer::new(
            path.clone(),
            properties,
            Arc::clone(&self.transport),
            self.command_timeout,
            self.events_tx.clone(),
        );

        self.bearers
            .write()
            .await
            .insert(path.clone(), Arc::clone(&bearer));
        self.publisher
            .publish(PublishedObject::Bearer(path.clone()))
            .await;
        let _ = self.events_tx.send(ModemEvent::BearerAdded {
            modem: self.path.clone(),
            bearer: path,
        });

        bearer
    }

    /// Release a bearer, tearing down any outstanding connect attempt.
    ///
    /// # Errors
    /// `NotFound` when no bearer has this identity.
    pub async fn remove_bearer(&self, path: &OwnedObjectPath) -> Result<(), ModemError> {
        let bearer = self
            .bearers
            .write()
            .await
            .remove(path)
            .ok_or_else(|| ModemError::NotFound {
                kind: "bearer",
                identity: path.to_string(),
            })?;

        bearer.dispose().await;
        self.publisher
            .unpublish(PublishedObject::Bearer(path.clone()))
            .await;
        let _ = self.events_tx.send(ModemEvent::BearerRemoved {
            modem: self.path.clone(),
            bearer: path.clone(),
        });

        Ok(())
    }

    /// Look up a bearer by identity.
    pub async fn bearer(&self, path: &OwnedObjectPath) -> Option<Arc<Bearer>> {
        self.bearers.read().await.get(path).cloned()
    }

    /// Identities of every bearer on this modem.
    pub async fn bearer_paths(&self) -> Vec<OwnedObjectPath> {
        self.bearers.read().await.keys().cloned().collect()
    }

    /// Delete a short message.
    ///
    /// The message leaves the registry before any device command is
    /// issued and the removal is never rolled back; a device-side delete
    /// failure is still surfaced to the caller, after the `deleted`
    /// notification has gone out.
    ///
    /// # Errors
    /// `NotFound` when no message has this identity; otherwise the first
    /// failing storage-delete command's error.
    #[instrument(skip(self), fields(modem = %self.path, sms = %path))]
    pub async fn delete_sms(&self, path: &OwnedObjectPath) -> Result<(), ModemError> {
        let removed = self.sms.remove(path).await?;

        let mut failure = None;
        for index in removed.part_indexes() {
            if let Err(error) = self
                .transport
                .send(&format!("AT+CMGD={index}"), self.command_timeout)
                .await
            {
                warn!(index, "Storage delete failed: {error}");
                failure.get_or_insert(error);
            }
        }

        self.publisher
            .unpublish(PublishedObject::Sms(path.clone()))
            .await;
        let _ = self
            .events_tx
            .send(ModemEvent::SmsDeleted { sms: path.clone() });

        match failure {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    /// Route an unsolicited bearer status report.
    ///
    /// Returns whether a bearer with this identity lives on this modem.
    pub(crate) async fn notify_bearer_status(
        &self,
        bearer: &OwnedObjectPath,
        status: BearerStatus,
    ) -> bool {
        let Some(bearer) = self.bearer(bearer).await else {
            return false;
        };
        bearer.handle_status(status).await;
        true
    }

    /// Tear down every bearer; called when the modem is removed.
    pub(crate) async fn dispose(&self) {
        let bearers: Vec<_> = self.bearers.write().await.drain().collect();
        for (path, bearer) in bearers {
            bearer.dispose().await;
            self.publisher
                .unpublish(PublishedObject::Bearer(path))
                .await;
        }
    }

    async fn require_time_support(&self) -> Result<(), ModemError> {
        let support = self.time_support.lock().await;
        if support.is_checked() && support.is_supported() {
            Ok(())
        } else {
            Err(ModemError::Unsupported { capability: "time" })
        }
    }
}

fn command_step(name: &'static str, command: &'static str) -> Step<Modem> {
    Step::new(name, move |modem: Arc<Modem>, _| {
        Box::pin(async move {
            modem.transport.send(command, modem.command_timeout).await?;
            Ok(StepOutcome::Advance)
        })
    })
}

fn init_steps() -> Vec<Step<Modem>> {
    vec![
        command_step("disable-echo", "ATE0"),
        command_step("verbose-errors", "AT+CMEE=1"),
    ]
}

fn enable_steps() -> Vec<Step<Modem>> {
    vec![command_step("radio-on", "AT+CFUN=1")]
}

fn disable_steps() -> Vec<Step<Modem>> {
    vec![command_step("radio-off", "AT+CFUN=0")]
}

fn time_capability() -> CapabilityFlow<Modem> {
    CapabilityFlow {
        name: "time",
        probe: Some(Box::new(|modem: Arc<Modem>| {
            Box::pin(async move {
                // A modem without a usable clock rejects the query.
                match modem.transport.send("AT+CCLK?", modem.command_timeout).await {
                    Ok(_) => Ok(true),
                    Err(ModemError::ProtocolFailure { .. }) => Ok(false),
                    Err(error) => Err(error),
                }
            })
        })),
        enable_steps: vec![command_step("enable-time-reporting", "AT+CTZR=1")],
        disable_steps: vec![command_step("disable-time-reporting", "AT+CTZR=0")],
    }
}
