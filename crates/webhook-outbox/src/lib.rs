//! Webhook delivery for the household outbox.
//!
//! This crate provides:
//! - WebhookSender: one authenticated POST per event, bounded by a timeout
//! - Dispatcher: normalizes notifications, routes by kind, records outcomes
//! - OutboxSweeper: polls pending rows and retries failed ones with backoff

mod dispatcher;
mod error;
mod sender;
mod sweeper;

pub use dispatcher::{DispatchError, DispatchOutcome, DispatchRequest, Dispatcher, OUTBOX_TABLE};
pub use error::{OutboxError, OutboxResult};
pub use sender::{
    build_envelope, message_for, wire_type, SendOutcome, SenderConfig, WebhookDelivery,
    WebhookSender, EVENT_ID_HEADER, SECRET_HEADER, SOURCE,
};
pub use sweeper::{compute_backoff, is_due, OutboxSweeper, SweepReport, SweeperConfig};

#[cfg(any(test, feature = "testing"))]
pub mod test_support;
