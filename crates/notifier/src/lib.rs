//! Alert Notification
//!
//! Sends alerts to family members over per-recipient channels and records
//! delivery state on the alert.

mod dispatcher;
mod sender;

pub use dispatcher::{DispatchMode, DispatchReport, Dispatcher};
pub use sender::{ChannelSender, LogSender, SendError, SendOutcome};
