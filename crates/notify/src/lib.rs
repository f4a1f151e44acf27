//! Notification delivery for job status changes.
//!
//! The ledger publishes every transition on its broadcast feed; the
//! forwarder in [`feed`] turns those into notifications and the
//! [`Dispatcher`] delivers them to configured channels. The dashboard and
//! any other UI live outside this crate.

pub mod dispatcher;
pub mod feed;
pub mod traits;
pub mod webhook;

pub use dispatcher::Dispatcher;
pub use feed::spawn_feed_forwarder;
pub use traits::{DispatchResult, Notification, Notifier, NotifyError};
pub use webhook::WebhookNotifier;
