use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    ModemError,
    sequencer::{self, OperationContext, Step},
};

/// Cached outcome of a capability support probe.
///
/// `checked` gates re-querying, independent of `supported`: a capability
/// probed once is never probed again on the same instance, whatever the
/// answer was.
#[derive(Debug, Default, Clone, Copy)]
pub struct CapabilitySupport {
    checked: bool,
    supported: bool,
}

impl CapabilitySupport {
    /// Whether the support probe has run on this instance.
    pub fn is_checked(&self) -> bool {
        self.checked
    }

    /// Whether the capability is supported. Meaningless until checked.
    pub fn is_supported(&self) -> bool {
        self.supported
    }
}

/// Support probe hook: answers "does this device support the capability".
pub type SupportProbe<E> =
    Box<dyn Fn(Arc<E>) -> BoxFuture<'static, Result<bool, ModemError>> + Send + Sync>;

/// A capability interface's flows: initialize, enable, disable.
///
/// Hooks are optional; an absent probe means unconditional support, and
/// empty step lists make enable/disable no-ops beyond their bookkeeping.
pub struct CapabilityFlow<E> {
    /// Capability name, used for errors, logs, and interface publication.
    pub name: &'static str,

    /// Optional support probe, run at most once per modem instance.
    pub probe: Option<SupportProbe<E>>,

    /// Steps run by [`enable`](CapabilityFlow::enable).
    pub enable_steps: Vec<Step<E>>,

    /// Steps run by [`disable`](CapabilityFlow::disable).
    pub disable_steps: Vec<Step<E>>,
}

impl<E: Send + Sync + 'static> CapabilityFlow<E> {
    /// First-time initialization.
    ///
    /// Runs the support probe if this instance has not been checked yet and
    /// caches the answer. A probe transport failure propagates without
    /// marking the instance checked, so a later initialize may retry the
    /// query.
    ///
    /// # Errors
    /// Returns `Unsupported` when the device lacks the capability, or the
    /// probe's own error.
    pub async fn initialize(
        &self,
        entity: &Arc<E>,
        support: &Mutex<CapabilitySupport>,
    ) -> Result<(), ModemError> {
        let mut cached = support.lock().await;

        if !cached.checked {
            let supported = match &self.probe {
                None => true,
                Some(probe) => probe(Arc::clone(entity)).await?,
            };
            cached.checked = true;
            cached.supported = supported;
            debug!(capability = self.name, supported, "Capability support probed");
        }

        if cached.supported {
            Ok(())
        } else {
            Err(ModemError::Unsupported {
                capability: self.name,
            })
        }
    }

    /// Run the enable step list to completion.
    ///
    /// # Errors
    /// Returns the failing step's error.
    pub async fn enable(
        &self,
        entity: &Arc<E>,
        ctx: &mut OperationContext,
    ) -> Result<(), ModemError> {
        sequencer::run(entity, ctx, &self.enable_steps).await
    }

    /// Run the disable step list to completion.
    ///
    /// # Errors
    /// Returns the failing step's error.
    pub async fn disable(
        &self,
        entity: &Arc<E>,
        ctx: &mut OperationContext,
    ) -> Result<(), ModemError> {
        sequencer::run(entity, ctx, &self.disable_steps).await
    }
}
