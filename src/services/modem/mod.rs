//! Cellular modem management service.
//!
//! Drives modem hardware through an abstract command transport: bearer
//! dial/disconnect lifecycle, multipart SMS reassembly, and capability
//! interface flows, all built on a shared step-driven operation engine.

/// Bearer entities and the connection state machine.
pub mod bearer;

mod capability;
mod error;

/// Modem entities.
pub mod modem;

mod publisher;

/// The step-driven operation engine.
pub mod sequencer;

mod service;

/// SMS message entities and the fragment reassembler.
pub mod sms;

mod transport;
mod types;

pub use capability::{CapabilityFlow, CapabilitySupport, SupportProbe};
pub use error::ModemError;
pub use modem::Modem;
pub use publisher::{NullPublisher, ObjectPublisher};
pub use sequencer::{CancelToken, OperationContext, Step, StepOutcome};
pub use service::ModemService;
pub use transport::CommandTransport;
pub use types::{BearerStatus, ModemEvent, ObjectPaths, PublishedObject};
