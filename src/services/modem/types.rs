use std::sync::atomic::{AtomicU32, Ordering};

use zbus::zvariant::{ObjectPath, OwnedObjectPath};

use super::bearer::BearerState;

/// Unsolicited bearer status report delivered by the notification layer.
///
/// These arrive outside any command/response exchange and are routed to the
/// owning bearer, where they race against timers and cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerStatus {
    /// The data session came up.
    Connected,

    /// The network refused or tore down the session during setup.
    ConnectionFailed,

    /// The data session dropped.
    Disconnected,
}

/// Objects handed to the external exposure layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishedObject {
    /// A modem object.
    Modem(OwnedObjectPath),

    /// A bearer object.
    Bearer(OwnedObjectPath),

    /// An SMS message object.
    Sms(OwnedObjectPath),

    /// A capability interface on a modem object.
    Interface {
        /// Path of the owning modem.
        modem: OwnedObjectPath,
        /// Interface name.
        name: &'static str,
    },
}

/// Events emitted to observers of the modem service.
#[derive(Debug, Clone)]
pub enum ModemEvent {
    /// A modem was registered and initialized.
    ModemAdded(OwnedObjectPath),

    /// A modem was removed.
    ModemRemoved(OwnedObjectPath),

    /// A bearer was created on a modem.
    BearerAdded {
        /// Owning modem path.
        modem: OwnedObjectPath,
        /// New bearer path.
        bearer: OwnedObjectPath,
    },

    /// A bearer was released.
    BearerRemoved {
        /// Owning modem path.
        modem: OwnedObjectPath,
        /// Removed bearer path.
        bearer: OwnedObjectPath,
    },

    /// A bearer changed connection state.
    BearerStateChanged {
        /// Bearer path.
        bearer: OwnedObjectPath,
        /// New state.
        state: BearerState,
    },

    /// An SMS message became available (single-part arrival or the
    /// completing part of a multipart message).
    SmsAdded {
        /// Message path.
        sms: OwnedObjectPath,
        /// Whether the message arrived over the air, as opposed to being
        /// read back from modem storage.
        received: bool,
    },

    /// An SMS message was deleted.
    SmsDeleted {
        /// Message path.
        sms: OwnedObjectPath,
    },
}

/// Allocates stable object-path identities for published entities.
///
/// Counters only ever move forward; identities are never reused within a
/// service instance.
#[derive(Debug, Default)]
pub struct ObjectPaths {
    modems: AtomicU32,
    bearers: AtomicU32,
    sms: AtomicU32,
}

const MODEM_PATH_BASE: &str = "/org/wwand/Modem";
const BEARER_PATH_BASE: &str = "/org/wwand/Bearer";
const SMS_PATH_BASE: &str = "/org/wwand/SMS";

impl ObjectPaths {
    /// Mint the next modem path.
    pub fn next_modem(&self) -> OwnedObjectPath {
        Self::path(MODEM_PATH_BASE, self.modems.fetch_add(1, Ordering::Relaxed))
    }

    /// Mint the next bearer path.
    pub fn next_bearer(&self) -> OwnedObjectPath {
        Self::path(BEARER_PATH_BASE, self.bearers.fetch_add(1, Ordering::Relaxed))
    }

    /// Mint the next SMS path.
    pub fn next_sms(&self) -> OwnedObjectPath {
        Self::path(SMS_PATH_BASE, self.sms.fetch_add(1, Ordering::Relaxed))
    }

    fn path(base: &str, index: u32) -> OwnedObjectPath {
        // Paths built from a fixed base and a counter are always valid.
        ObjectPath::from_string_unchecked(format!("{base}/{index}")).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_monotonic_and_unique() {
        let paths = ObjectPaths::default();
        let a = paths.next_bearer();
        let b = paths.next_bearer();
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "/org/wwand/Bearer/0");
        assert_eq!(b.as_str(), "/org/wwand/Bearer/1");
    }
}
