//! wwand - Cellular modem management core.
//!
//! wwand drives cellular modem hardware through an abstract command
//! transport: it negotiates multi-step operations against a device and
//! carries them to completion in the presence of latency, partial failure,
//! and external cancellation. The main pieces are:
//!
//! - A step-driven operation engine shared by every long-running flow
//! - The bearer connection lifecycle (dial, confirm, disconnect)
//! - Multipart SMS reassembly with duplicate and overflow detection
//! - Generic capability initialize/enable/disable flows
//!
//! Serial I/O, device discovery, and the D-Bus export layer live outside
//! this crate; they plug in through the [`services::modem::CommandTransport`]
//! and [`services::modem::ObjectPublisher`] capabilities.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wwand::services::modem::{ModemService, NullPublisher};
//!
//! // Create the service; modems are registered by the discovery layer.
//! let service = ModemService::new(Arc::new(NullPublisher));
//! let _events = service.events();
//! ```

/// Service configuration loading and defaults.
pub mod config;

/// Core error types and result aliases.
pub mod core;

/// Reactive services for modem integration.
pub mod services;

/// Tracing initialization for embedding applications.
pub mod tracing_config;

/// Re-exported core types for convenience.
pub use core::{Result, WwandError};
