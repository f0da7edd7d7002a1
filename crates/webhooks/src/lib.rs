//! Gateway webhook ingestion.
//!
//! Deliveries are verified, parsed and applied at most once per event id.
//! The ledger row is written in the same version-guarded update as the
//! transition it caused.

pub mod config;
pub mod error;
pub mod event;
pub mod processor;
pub mod signature;

pub use config::WebhookConfig;
pub use error::{Result, WebhookError};
pub use event::{EventAction, GatewayEvent};
pub use processor::{WebhookProcessor, WebhookReceipt};
pub use signature::SignatureVerifier;
