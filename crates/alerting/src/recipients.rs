//! Recipient Resolution

use tracing::{debug, warn};
use vitals_types::{Channel, FamilyMembership, Recipient, Severity};

/// Recipients chosen for one alert
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecipients {
    /// Family group the alert is attached to
    pub group_id: Option<String>,
    pub recipients: Vec<Recipient>,
}

/// Expands family memberships into a severity-mapped recipient list
#[derive(Debug, Clone, Copy, Default)]
pub struct RecipientResolver;

impl RecipientResolver {
    pub fn new() -> Self {
        Self
    }

    /// Channel used to reach family members for a given severity
    pub fn channel_for(severity: Severity) -> Channel {
        match severity {
            Severity::Emergency => Channel::Call,
            Severity::High => Channel::Sms,
            _ => Channel::Push,
        }
    }

    /// Resolve recipients from the memberships of the user's family groups.
    ///
    /// Only the first group is used: members of any other group the user
    /// belongs to are not notified.
    pub fn resolve(&self, memberships: &[FamilyMembership], severity: Severity) -> ResolvedRecipients {
        let Some(first) = memberships.first() else {
            debug!("User has no family group, alert has no recipients");
            return ResolvedRecipients {
                group_id: None,
                recipients: Vec::new(),
            };
        };
        let group_id = first.group_id.clone();

        let skipped_groups = memberships
            .iter()
            .filter(|m| m.group_id != group_id)
            .count();
        if skipped_groups > 0 {
            warn!(
                "Alert routed to group {} only; {} memberships in other groups not notified",
                group_id, skipped_groups
            );
        }

        let channel = Self::channel_for(severity);
        let recipients = memberships
            .iter()
            .filter(|m| m.group_id == group_id && m.receives_alerts())
            .map(|m| Recipient::new(m.user_ref.clone(), channel))
            .collect();

        ResolvedRecipients {
            group_id: Some(group_id),
            recipients,
        }
    }
}
