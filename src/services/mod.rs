//! Reactive services for modem integration.

/// Shared reactive primitives used across services.
pub mod common;

/// Cellular modem management service.
pub mod modem;
