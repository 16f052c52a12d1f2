//! Sequential Alert Dispatcher
//!
//! Recipients are notified one after another so each status update can be
//! attributed to exactly one send attempt. A failed recipient never stops
//! the others.

use crate::sender::ChannelSender;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, warn};
use vitals_types::{AlertRecord, DeliveryStatus};

/// Which recipients a dispatch pass targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// First delivery: recipients still pending
    Initial,
    /// Escalation reminder: everyone who has not acknowledged or failed
    Escalation,
}

impl DispatchMode {
    fn targets(self, status: DeliveryStatus) -> bool {
        match self {
            DispatchMode::Initial => status == DeliveryStatus::Pending,
            DispatchMode::Escalation => !status.is_terminal(),
        }
    }
}

/// Per-pass delivery summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Provider accepted the message
    pub sent: usize,
    /// Provider refused the message
    pub failed: usize,
    /// Transport error; recipient left untouched
    pub errored: usize,
    /// Not targeted by this pass
    pub skipped: usize,
}

/// Sends one alert to all of its recipients
pub struct Dispatcher {
    sender: Arc<dyn ChannelSender>,
}

impl Dispatcher {
    /// Create a dispatcher over a channel sender
    pub fn new(sender: Arc<dyn ChannelSender>) -> Self {
        Self { sender }
    }

    /// Notify the alert's recipients and record their delivery state.
    ///
    /// Resolved alerts are never dispatched.
    pub async fn dispatch(&self, alert: &mut AlertRecord, mode: DispatchMode) -> DispatchReport {
        let mut report = DispatchReport::default();

        if alert.is_resolved {
            debug!("Alert {} is resolved, not dispatching", alert.id);
            report.skipped = alert.recipients.len();
            return report;
        }

        for index in 0..alert.recipients.len() {
            let (user_ref, channel, status) = {
                let r = &alert.recipients[index];
                (r.user_ref.clone(), r.channel, r.status)
            };
            if !mode.targets(status) {
                report.skipped += 1;
                continue;
            }

            let result = self.sender.send(channel, &user_ref, alert).await;

            match result {
                Ok(outcome) if outcome.success => {
                    let first = alert.recipients[index]
                        .mark_sent(Utc::now(), outcome.provider_message_id.clone());
                    if !first {
                        debug!(
                            "Alert {}: reminder to {} accepted as {}",
                            alert.id,
                            user_ref,
                            outcome.provider_message_id.as_deref().unwrap_or("-")
                        );
                    }
                    report.sent += 1;
                    metrics::counter!("vitals_notifications_total", "channel" => channel.as_str(), "outcome" => "sent")
                        .increment(1);
                }
                Ok(outcome) => {
                    warn!(
                        "Alert {}: {} refused {} for {}: {}",
                        alert.id,
                        channel.as_str(),
                        user_ref,
                        alert.alert_type.as_str(),
                        outcome.error.as_deref().unwrap_or("no reason given")
                    );
                    // An escalation reminder failing does not undo the earlier delivery
                    if mode == DispatchMode::Initial {
                        alert.recipients[index].mark_failed();
                    }
                    report.failed += 1;
                    metrics::counter!("vitals_notifications_total", "channel" => channel.as_str(), "outcome" => "failed")
                        .increment(1);
                }
                Err(e) => {
                    error!("Alert {}: send to {} failed: {}", alert.id, user_ref, e);
                    report.errored += 1;
                    metrics::counter!("vitals_notifications_total", "channel" => channel.as_str(), "outcome" => "error")
                        .increment(1);
                }
            }
        }

        debug!(
            "Alert {} dispatched: {} sent, {} failed, {} errored, {} skipped",
            alert.id, report.sent, report.failed, report.errored, report.skipped
        );
        report
    }
}
