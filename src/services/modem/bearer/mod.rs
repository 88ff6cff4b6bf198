mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, oneshot};
use tracing::{debug, error, info, instrument, warn};
use zbus::zvariant::OwnedObjectPath;

pub use types::{
    BearerIpFamily, BearerProperties, BearerState, IpConfig, IpMethod, MAX_DNS_SERVERS,
};

use crate::services::common::Property;

use super::{
    BearerStatus, CommandTransport, ModemError, ModemEvent,
    sequencer::{self, CancelToken, OperationContext, Step, StepOutcome},
};

/// How long a dial waits for the network to confirm before giving up.
///
/// The only hard timeout owned by this core; individual command sends use
/// the short per-command transport timeout instead.
pub const CONNECT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

/// What an outstanding connect attempt resolved with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectResolution {
    Connected,
    Failed(&'static str),
    TimedOut,
    Cancelled,
}

/// The single outstanding dial attempt for a bearer.
///
/// Taking the record out of its slot is the act of resolving it; whoever
/// takes it delivers exactly one resolution, and later resolvers find the
/// slot empty.
struct ConnectAttempt {
    outcome_tx: oneshot::Sender<ConnectResolution>,
}

/// One packet-data session configuration and its live connection state.
pub struct Bearer {
    path: OwnedObjectPath,
    properties: BearerProperties,
    transport: Arc<dyn CommandTransport>,
    command_timeout: Duration,

    /// Current connection state.
    pub state: Property<BearerState>,

    /// IPv4 configuration, present only while connected.
    pub ipv4_config: Property<Option<IpConfig>>,

    /// IPv6 configuration, present only while connected.
    pub ipv6_config: Property<Option<IpConfig>>,

    pending: Mutex<Option<ConnectAttempt>>,
    dial_cancel: Mutex<Option<CancelToken>>,
    events_tx: broadcast::Sender<ModemEvent>,
}

impl Bearer {
    pub(crate) fn new(
        path: OwnedObjectPath,
        properties: BearerProperties,
        transport: Arc<dyn CommandTransport>,
        command_timeout: Duration,
        events_tx: broadcast::Sender<ModemEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            path,
            properties,
            transport,
            command_timeout,
            state: Property::new(BearerState::Idle),
            ipv4_config: Property::new(None),
            ipv6_config: Property::new(None),
            pending: Mutex::new(None),
            dial_cancel: Mutex::new(None),
            events_tx,
        })
    }

    /// Object path identity of this bearer.
    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    /// The immutable properties this bearer was created with.
    pub fn properties(&self) -> &BearerProperties {
        &self.properties
    }

    /// Dial the data session.
    ///
    /// Dials are serialized per bearer: while a connect attempt is
    /// outstanding a second dial is rejected before any record is created.
    /// `cancel` cancels cooperatively; cancelling during the confirmation
    /// wait triggers a best-effort device-side reset before the error is
    /// delivered.
    ///
    /// # Errors
    /// `AlreadyExists` when a dial is outstanding or the bearer is not
    /// idle; `Timeout` when the network never confirms; `Cancelled` on
    /// cooperative cancellation; the failing command's error otherwise.
    #[instrument(skip(self, cancel), fields(bearer = %self.path))]
    pub async fn connect(self: &Arc<Self>, cancel: CancelToken) -> Result<(), ModemError> {
        {
            let pending = self.pending.lock().await;
            if pending.is_some() {
                return Err(ModemError::AlreadyExists {
                    what: "pending connect attempt".into(),
                });
            }
            let state = self.state.get();
            if state != BearerState::Idle {
                return Err(ModemError::AlreadyExists {
                    what: format!("connection (bearer is {state:?})"),
                });
            }
            self.set_state(BearerState::Connecting);
        }

        *self.dial_cancel.lock().await = Some(cancel.clone());

        let mut ctx = OperationContext::new("bearer connect").with_cancel(cancel);
        let result = sequencer::run(self, &mut ctx, &dial_steps()).await;

        *self.dial_cancel.lock().await = None;

        match result {
            Ok(()) => {
                self.apply_connected_config();
                self.set_state(BearerState::Connected);
                info!("Bearer connected");
                Ok(())
            }
            Err(error) => {
                // A record surviving a failed dial would leak its handles.
                self.pending.lock().await.take();
                self.set_state(BearerState::Idle);
                warn!("Bearer connect failed: {error}");
                Err(error)
            }
        }
    }

    /// Tear down the data session.
    ///
    /// During connection setup this synthesizes a cancellation of the
    /// pending attempt instead of racing a second protocol disconnect
    /// against it. Disconnecting an idle bearer is a no-op.
    ///
    /// # Errors
    /// Returns the deactivation command's error; the bearer then remains
    /// connected.
    #[instrument(skip(self), fields(bearer = %self.path))]
    pub async fn disconnect(&self) -> Result<(), ModemError> {
        match self.state.get() {
            BearerState::Idle | BearerState::Disconnecting => Ok(()),
            BearerState::Connecting => {
                if let Some(token) = self.dial_cancel.lock().await.clone() {
                    token.cancel();
                }
                self.resolve_pending(ConnectResolution::Cancelled).await;
                Ok(())
            }
            BearerState::Connected => {
                self.set_state(BearerState::Disconnecting);
                match self
                    .transport
                    .send(
                        &self.properties.deactivation_command(),
                        self.command_timeout,
                    )
                    .await
                {
                    Ok(_) => {
                        self.clear_connected_config();
                        self.set_state(BearerState::Idle);
                        info!("Bearer disconnected");
                        Ok(())
                    }
                    Err(error) => {
                        self.set_state(BearerState::Connected);
                        Err(error)
                    }
                }
            }
        }
    }

    /// Apply an unsolicited status report from the device.
    pub(crate) async fn handle_status(&self, status: BearerStatus) {
        match status {
            BearerStatus::Connected => {
                if !self.resolve_pending(ConnectResolution::Connected).await {
                    debug!("Unsolicited connected report with no pending attempt, ignoring");
                }
            }
            BearerStatus::ConnectionFailed => {
                if !self
                    .resolve_pending(ConnectResolution::Failed(
                        "network reported connection failure",
                    ))
                    .await
                {
                    debug!("Unsolicited failure report with no pending attempt, ignoring");
                }
            }
            BearerStatus::Disconnected => {
                if self
                    .resolve_pending(ConnectResolution::Failed(
                        "disconnected during connection setup",
                    ))
                    .await
                {
                    return;
                }
                // Asynchronous drop notice; legitimate whether or not the
                // bearer thought it was connected.
                self.clear_connected_config();
                self.set_state(BearerState::Idle);
                info!("Bearer dropped by the network");
            }
        }
    }

    /// Release the bearer, tearing down any outstanding connect attempt.
    pub(crate) async fn dispose(&self) {
        if let Some(token) = self.dial_cancel.lock().await.take() {
            token.cancel();
        }
        self.resolve_pending(ConnectResolution::Cancelled).await;
    }

    /// Resolve the outstanding connect attempt, if any.
    ///
    /// Clears the record before delivering, so a racing resolver finds it
    /// already gone. Returns whether this call performed the resolution.
    async fn resolve_pending(&self, resolution: ConnectResolution) -> bool {
        let Some(attempt) = self.pending.lock().await.take() else {
            return false;
        };
        let _ = attempt.outcome_tx.send(resolution);
        true
    }

    async fn install_attempt(&self) -> Result<oneshot::Receiver<ConnectResolution>, ModemError> {
        let mut pending = self.pending.lock().await;
        if pending.is_some() {
            error!("Connect attempt installed while one is outstanding");
            return Err(ModemError::InvariantViolation(
                "a pending connect record is already installed".into(),
            ));
        }
        let (outcome_tx, outcome_rx) = oneshot::channel();
        *pending = Some(ConnectAttempt { outcome_tx });
        Ok(outcome_rx)
    }

    async fn step_define_context(&self) -> Result<StepOutcome, ModemError> {
        let command = self.properties.context_definition_command();
        self.transport.send(&command, self.command_timeout).await?;
        Ok(StepOutcome::Advance)
    }

    async fn step_authenticate(&self) -> Result<StepOutcome, ModemError> {
        // Single attempt; a credentials rejection is terminal.
        let command = self.properties.authentication_command();
        self.transport.send(&command, self.command_timeout).await?;
        Ok(StepOutcome::Advance)
    }

    async fn step_activate(&self) -> Result<StepOutcome, ModemError> {
        // Deactivation legitimately errors when the context is already
        // inactive; the result is not surfaced.
        if let Err(error) = self
            .transport
            .send(
                &self.properties.deactivation_command(),
                self.command_timeout,
            )
            .await
        {
            debug!("Ignoring pre-activation deactivate failure: {error}");
        }

        let command = self.properties.activation_command();
        self.transport.send(&command, self.command_timeout).await?;
        Ok(StepOutcome::Advance)
    }

    async fn step_await_confirmation(
        &self,
        cancel: Option<CancelToken>,
    ) -> Result<StepOutcome, ModemError> {
        let mut outcome_rx = self.install_attempt().await?;

        let resolution = tokio::select! {
            outcome = &mut outcome_rx => Self::delivered(outcome),
            () = tokio::time::sleep(CONNECT_CONFIRMATION_TIMEOUT) => {
                self.resolve_pending(ConnectResolution::TimedOut).await;
                Self::delivered(outcome_rx.await)
            }
            () = wait_for_cancel(&cancel) => {
                self.resolve_pending(ConnectResolution::Cancelled).await;
                Self::delivered(outcome_rx.await)
            }
        };

        match resolution {
            ConnectResolution::Connected => Ok(StepOutcome::Done),
            ConnectResolution::Failed(reason) => Err(ModemError::ProtocolFailure {
                operation: "bearer connect",
                reason: reason.into(),
            }),
            ConnectResolution::TimedOut => {
                self.reset_device_context().await;
                Err(ModemError::Timeout {
                    operation: "connection confirmation",
                })
            }
            ConnectResolution::Cancelled => {
                self.reset_device_context().await;
                Err(ModemError::Cancelled)
            }
        }
    }

    fn delivered(
        outcome: Result<ConnectResolution, oneshot::error::RecvError>,
    ) -> ConnectResolution {
        // The sender is consumed exactly once by resolve_pending; a
        // dropped sender means the bearer is being torn down.
        outcome.unwrap_or(ConnectResolution::Cancelled)
    }

    async fn reset_device_context(&self) {
        // Best effort: device-side context state is suspect after a failed
        // or abandoned dial.
        self.transport
            .send_ignoring_reply(&self.properties.deactivation_command())
            .await;
    }

    fn apply_connected_config(&self) {
        // Generic bearers hand the link to PPP; concrete address details
        // arrive from the net-configuration collaborator afterwards.
        if self.properties.ip_family.contains(BearerIpFamily::IPV4) {
            self.ipv4_config.set(Some(IpConfig::ppp()));
        }
        if self.properties.ip_family.contains(BearerIpFamily::IPV6) {
            self.ipv6_config.set(Some(IpConfig::ppp()));
        }
    }

    fn clear_connected_config(&self) {
        self.ipv4_config.set(None);
        self.ipv6_config.set(None);
    }

    fn set_state(&self, state: BearerState) {
        if self.state.get() == state {
            return;
        }
        self.state.set(state);
        let _ = self.events_tx.send(ModemEvent::BearerStateChanged {
            bearer: self.path.clone(),
            state,
        });
    }
}

async fn wait_for_cancel(cancel: &Option<CancelToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => futures::future::pending().await,
    }
}

fn dial_steps() -> Vec<Step<Bearer>> {
    vec![
        Step::new("define-context", |bearer: Arc<Bearer>, _| {
            Box::pin(async move { bearer.step_define_context().await })
        }),
        Step::new("authenticate", |bearer: Arc<Bearer>, _| {
            Box::pin(async move { bearer.step_authenticate().await })
        }),
        Step::new("deactivate-activate", |bearer: Arc<Bearer>, _| {
            Box::pin(async move { bearer.step_activate().await })
        }),
        Step::new("await-confirmation", |bearer: Arc<Bearer>, cancel| {
            Box::pin(async move { bearer.step_await_confirmation(cancel).await })
        }),
    ]
}
