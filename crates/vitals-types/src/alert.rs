//! Alert drafts, persisted records, and per-recipient delivery state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Highest escalation level an alert can reach
pub const MAX_ESCALATION_LEVEL: u8 = 5;

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Emergency,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }
}

/// What triggered an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HeartRateHigh,
    HeartRateLow,
    BloodPressureHigh,
    OxygenLow,
    TemperatureHigh,
    TemperatureLow,
    FallDetection,
    EmergencyButton,
    BatteryLow,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeartRateHigh => "heart_rate_high",
            Self::HeartRateLow => "heart_rate_low",
            Self::BloodPressureHigh => "blood_pressure_high",
            Self::OxygenLow => "oxygen_low",
            Self::TemperatureHigh => "temperature_high",
            Self::TemperatureLow => "temperature_low",
            Self::FallDetection => "fall_detection",
            Self::EmergencyButton => "emergency_button",
            Self::BatteryLow => "battery_low",
        }
    }

    /// Types that escalate on the short SLA whatever their severity
    pub fn is_time_critical(&self) -> bool {
        matches!(
            self,
            Self::FallDetection | Self::EmergencyButton | Self::HeartRateHigh | Self::HeartRateLow
        )
    }
}

/// Action suggested to whoever receives the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    CallEmergencyServices,
    ContactUser,
    CheckLocation,
    RecheckMeasurement,
    MonitorClosely,
    ConsultDoctor,
    ChargeDevice,
}

/// Alert produced by threshold evaluation, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub user_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub health_snapshot: serde_json::Value,
    pub suggested_actions: Vec<SuggestedAction>,
}

/// Notification channel for one recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    Sms,
    Email,
    Call,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Call => "call",
        }
    }
}

/// Delivery state of one recipient
///
/// Moves forward along `Pending → Sent → Delivered → Read → Acknowledged`;
/// `Failed` can be reached from any state short of `Acknowledged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Acknowledged,
    Failed,
}

impl DeliveryStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Acknowledged => 4,
            Self::Failed => 5,
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Acknowledged | Self::Failed)
    }

    fn can_advance_to(self, next: DeliveryStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// One (family member, channel) delivery target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_ref: String,
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Most recent accepted send, reminders included
    #[serde(default)]
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Provider id of the most recent accepted send
    pub provider_message_id: Option<String>,
}

impl Recipient {
    pub fn new(user_ref: impl Into<String>, channel: Channel) -> Self {
        Self {
            user_ref: user_ref.into(),
            channel,
            status: DeliveryStatus::Pending,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            acknowledged_at: None,
            last_sent_at: None,
            provider_message_id: None,
        }
    }

    fn advance(&mut self, next: DeliveryStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Record a successful hand-off to the channel provider.
    ///
    /// The first send moves `Pending` to `Sent` and stamps `sent_at`. Every
    /// send, reminders included, updates `last_sent_at` and the provider id.
    /// Returns true only if the status moved.
    pub fn mark_sent(&mut self, at: DateTime<Utc>, provider_message_id: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let moved = self.advance(DeliveryStatus::Sent);
        if moved {
            self.sent_at = Some(at);
        }
        self.last_sent_at = Some(at);
        self.provider_message_id = provider_message_id;
        moved
    }

    pub fn mark_delivered(&mut self, at: DateTime<Utc>) -> bool {
        let moved = self.advance(DeliveryStatus::Delivered);
        if moved {
            self.delivered_at = Some(at);
        }
        moved
    }

    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        let moved = self.advance(DeliveryStatus::Read);
        if moved {
            self.read_at = Some(at);
        }
        moved
    }

    pub fn acknowledge(&mut self, at: DateTime<Utc>) -> bool {
        let moved = self.advance(DeliveryStatus::Acknowledged);
        if moved {
            self.acknowledged_at = Some(at);
        }
        moved
    }

    pub fn mark_failed(&mut self) -> bool {
        self.advance(DeliveryStatus::Failed)
    }

    /// Fold another copy of this recipient in, keeping whichever state is
    /// further along. Returns true if anything changed.
    pub fn merge(&mut self, other: &Recipient) -> bool {
        let before = self.clone();
        self.advance(other.status);
        self.sent_at = self.sent_at.or(other.sent_at);
        self.delivered_at = self.delivered_at.or(other.delivered_at);
        self.read_at = self.read_at.or(other.read_at);
        self.acknowledged_at = self.acknowledged_at.or(other.acknowledged_at);
        if other.last_sent_at > self.last_sent_at {
            self.last_sent_at = other.last_sent_at;
            self.provider_message_id = other.provider_message_id.clone();
        }
        *self != before
    }
}

/// Persisted alert with recipients and escalation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub user_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub health_snapshot: serde_json::Value,
    pub suggested_actions: Vec<SuggestedAction>,
    /// Reading that triggered the alert
    pub reading_ref: Option<Uuid>,
    pub family_group_ref: Option<String>,
    pub recipients: Vec<Recipient>,
    pub is_resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    /// Never decreases, capped at [`MAX_ESCALATION_LEVEL`]
    pub escalation_level: u8,
    pub created_at: DateTime<Utc>,
}

impl AlertRecord {
    /// Finalize a draft into a record
    pub fn from_draft(
        draft: AlertDraft,
        reading_ref: Option<Uuid>,
        family_group_ref: Option<String>,
        recipients: Vec<Recipient>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: draft.user_id,
            alert_type: draft.alert_type,
            severity: draft.severity,
            title: draft.title,
            message: draft.message,
            health_snapshot: draft.health_snapshot,
            suggested_actions: draft.suggested_actions,
            reading_ref,
            family_group_ref,
            recipients,
            is_resolved: false,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            escalation_level: 0,
            created_at,
        }
    }

    /// Age of the alert at `now` (zero if `now` precedes creation)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).max(Duration::zero())
    }

    /// Mark the alert resolved. Returns false if it already was.
    pub fn resolve(
        &mut self,
        resolved_by: impl Into<String>,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        if self.is_resolved {
            return false;
        }
        self.is_resolved = true;
        self.resolved_by = Some(resolved_by.into());
        self.resolved_at = Some(at);
        self.resolution_notes = notes;
        true
    }

    /// Raise the escalation level to `level`. Lower levels and resolved
    /// alerts are left untouched.
    pub fn raise_escalation(&mut self, level: u8) -> bool {
        let level = level.min(MAX_ESCALATION_LEVEL);
        if self.is_resolved || level <= self.escalation_level {
            return false;
        }
        self.escalation_level = level;
        true
    }

    pub fn recipient_mut(&mut self, user_ref: &str) -> Option<&mut Recipient> {
        self.recipients.iter_mut().find(|r| r.user_ref == user_ref)
    }

    /// Whether the age-based sweep can still raise this alert
    pub fn can_escalate(&self) -> bool {
        !self.is_resolved
            && self.escalation_level < MAX_ESCALATION_LEVEL
            && (self.alert_type.is_time_critical() || self.severity >= Severity::Critical)
    }

    /// Fold a concurrently modified copy of this alert into the record.
    ///
    /// Nothing moves backwards: resolution sticks with whoever resolved
    /// first, the level only rises while unresolved, and each recipient keeps
    /// its furthest delivery state. Returns true if anything changed.
    pub fn merge(&mut self, other: &AlertRecord) -> bool {
        let mut changed = self.raise_escalation(other.escalation_level);

        if other.is_resolved && !self.is_resolved {
            self.is_resolved = true;
            self.resolved_by = other.resolved_by.clone();
            self.resolved_at = other.resolved_at;
            self.resolution_notes = other.resolution_notes.clone();
            changed = true;
        }

        for theirs in &other.recipients {
            match self.recipient_mut(&theirs.user_ref) {
                Some(ours) => changed |= ours.merge(theirs),
                None => {
                    self.recipients.push(theirs.clone());
                    changed = true;
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> AlertDraft {
        AlertDraft {
            user_id: "user-1".into(),
            alert_type: AlertType::HeartRateLow,
            severity: Severity::Emergency,
            title: "Heart rate low".into(),
            message: "35 bpm".into(),
            health_snapshot: serde_json::json!({"bpm": 35.0}),
            suggested_actions: vec![SuggestedAction::CallEmergencyServices],
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert!(Severity::Critical < Severity::Emergency);
    }

    #[test]
    fn test_recipient_moves_forward_only() {
        let now = Utc::now();
        let mut recipient = Recipient::new("mom", Channel::Call);

        assert!(recipient.mark_sent(now, Some("msg-1".into())));
        assert!(recipient.mark_read(now));
        assert!(!recipient.mark_delivered(now));
        assert_eq!(recipient.status, DeliveryStatus::Read);
        assert!(recipient.acknowledge(now));
        assert!(!recipient.mark_failed());
        assert_eq!(recipient.status, DeliveryStatus::Acknowledged);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut recipient = Recipient::new("dad", Channel::Sms);
        assert!(recipient.mark_failed());
        assert!(!recipient.mark_sent(Utc::now(), None));
        assert_eq!(recipient.status, DeliveryStatus::Failed);
        assert!(recipient.sent_at.is_none());
    }

    #[test]
    fn test_resolve_is_terminal() {
        let now = Utc::now();
        let mut record = AlertRecord::from_draft(draft(), None, Some("fam-1".into()), vec![], now);

        assert!(record.raise_escalation(2));
        assert!(record.resolve("mom", Some("called her".into()), now));
        assert!(!record.resolve("dad", None, now));
        assert_eq!(record.resolved_by.as_deref(), Some("mom"));
        assert!(!record.raise_escalation(4));
        assert_eq!(record.escalation_level, 2);
    }

    #[test]
    fn test_escalation_never_decreases() {
        let mut record = AlertRecord::from_draft(draft(), None, None, vec![], Utc::now());
        assert!(record.raise_escalation(3));
        assert!(!record.raise_escalation(1));
        assert!(record.raise_escalation(9));
        assert_eq!(record.escalation_level, MAX_ESCALATION_LEVEL);
    }

    #[test]
    fn test_reminder_updates_provider_id_only() {
        let first = Utc::now();
        let later = first + Duration::minutes(3);
        let mut recipient = Recipient::new("mom", Channel::Call);

        assert!(recipient.mark_sent(first, Some("msg-1".into())));
        assert!(!recipient.mark_sent(later, Some("msg-2".into())));
        assert_eq!(recipient.status, DeliveryStatus::Sent);
        assert_eq!(recipient.sent_at, Some(first));
        assert_eq!(recipient.last_sent_at, Some(later));
        assert_eq!(recipient.provider_message_id.as_deref(), Some("msg-2"));
    }

    #[test]
    fn test_merge_keeps_resolution_and_furthest_status() {
        let now = Utc::now();
        let recipients = vec![Recipient::new("mom", Channel::Call), Recipient::new("sis", Channel::Call)];
        let mut stored = AlertRecord::from_draft(draft(), None, Some("fam-1".into()), recipients, now);

        // A sweep working on a stale copy sends to both and raises the level
        let mut sweep = stored.clone();
        sweep.raise_escalation(1);
        for r in &mut sweep.recipients {
            r.mark_sent(now, Some(format!("msg-{}", r.user_ref)));
        }

        // Meanwhile mom acknowledges and resolves
        stored.recipient_mut("mom").unwrap().acknowledge(now);
        stored.resolve("mom", Some("on my way".into()), now);

        assert!(stored.merge(&sweep));
        assert!(stored.is_resolved);
        assert_eq!(stored.resolved_by.as_deref(), Some("mom"));
        assert_eq!(stored.escalation_level, 0);
        assert_eq!(stored.recipients[0].status, DeliveryStatus::Acknowledged);
        assert_eq!(stored.recipients[0].provider_message_id.as_deref(), Some("msg-mom"));
        assert_eq!(stored.recipients[1].status, DeliveryStatus::Sent);
        assert!(!stored.merge(&sweep));
    }

    #[test]
    fn test_merge_does_not_override_first_resolver() {
        let now = Utc::now();
        let mut stored = AlertRecord::from_draft(draft(), None, None, vec![], now);
        let mut other = stored.clone();
        stored.raise_escalation(2);
        stored.resolve("mom", None, now);
        other.resolve("dad", None, now + Duration::seconds(5));

        assert!(!stored.merge(&other));
        assert_eq!(stored.resolved_by.as_deref(), Some("mom"));
        assert_eq!(stored.escalation_level, 2);
    }

    #[test]
    fn test_can_escalate() {
        let now = Utc::now();
        let mut record = AlertRecord::from_draft(draft(), None, None, vec![], now);
        assert!(record.can_escalate());
        record.raise_escalation(MAX_ESCALATION_LEVEL);
        assert!(!record.can_escalate());

        let battery = AlertDraft {
            alert_type: AlertType::BatteryLow,
            severity: Severity::Medium,
            ..draft()
        };
        assert!(!AlertRecord::from_draft(battery, None, None, vec![], now).can_escalate());

        let racing_heart = AlertDraft {
            alert_type: AlertType::HeartRateHigh,
            severity: Severity::High,
            ..draft()
        };
        assert!(AlertRecord::from_draft(racing_heart, None, None, vec![], now).can_escalate());
    }

    #[test]
    fn test_age_is_never_negative() {
        let now = Utc::now();
        let record = AlertRecord::from_draft(draft(), None, None, vec![], now);
        assert_eq!(record.age(now - Duration::minutes(1)), Duration::zero());
        assert_eq!(record.age(now + Duration::minutes(3)), Duration::minutes(3));
    }
}
