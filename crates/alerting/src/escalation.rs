//! Alert Escalation Policy
//!
//! Escalation is evaluated lazily from an alert's age; nothing ticks in the
//! background. The level is `floor(age / sla)`, capped and never lowered.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use vitals_types::{AlertRecord, AlertType, Severity, MAX_ESCALATION_LEVEL};

/// Escalation SLAs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// SLA for falls, emergency buttons, and heart rate alerts (seconds)
    pub critical_type_sla_seconds: u64,
    /// SLA for any other `emergency` alert (seconds)
    pub emergency_sla_seconds: u64,
    /// SLA for `critical` alerts (seconds)
    pub critical_sla_seconds: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            critical_type_sla_seconds: 300, // 5 minutes
            emergency_sla_seconds: 120,     // 2 minutes
            critical_sla_seconds: 600,      // 10 minutes
        }
    }
}

/// Where an alert sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Created,
    Escalating(u8),
    Resolved,
}

/// Age-based escalation policy
pub struct EscalationPolicy {
    config: EscalationConfig,
}

impl EscalationPolicy {
    /// Create a new policy with given config
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    /// SLA before the alert escalates, or `None` if it never auto-escalates
    pub fn sla(&self, alert_type: AlertType, severity: Severity) -> Option<Duration> {
        let seconds = if alert_type.is_time_critical() {
            self.config.critical_type_sla_seconds
        } else {
            match severity {
                Severity::Emergency => self.config.emergency_sla_seconds,
                Severity::Critical => self.config.critical_sla_seconds,
                _ => return None,
            }
        };
        Some(Duration::seconds(seconds as i64))
    }

    /// Level the alert should be at, given its age at `now`
    pub fn target_level(&self, alert: &AlertRecord, now: DateTime<Utc>) -> u8 {
        let Some(sla) = self.sla(alert.alert_type, alert.severity) else {
            return alert.escalation_level;
        };
        let sla_ms = sla.num_milliseconds().max(1);
        let periods = alert.age(now).num_milliseconds() / sla_ms;
        let target = periods.min(MAX_ESCALATION_LEVEL as i64) as u8;
        target.max(alert.escalation_level)
    }

    /// Whether the alert is overdue for its next escalation level
    pub fn needs_escalation(&self, alert: &AlertRecord, now: DateTime<Utc>) -> bool {
        if alert.is_resolved {
            return false;
        }
        let Some(sla) = self.sla(alert.alert_type, alert.severity) else {
            return false;
        };
        alert.age(now) > sla && self.target_level(alert, now) > alert.escalation_level
    }

    /// Raise the alert to its target level. Returns true if the level changed.
    pub fn escalate(&self, alert: &mut AlertRecord, now: DateTime<Utc>) -> bool {
        if !self.needs_escalation(alert, now) {
            return false;
        }
        let target = self.target_level(alert, now);
        let raised = alert.raise_escalation(target);
        if raised {
            info!(
                "Alert {} ({}) escalated to level {}",
                alert.id,
                alert.alert_type.as_str(),
                alert.escalation_level
            );
        }
        raised
    }

    /// Current lifecycle state
    pub fn state(alert: &AlertRecord) -> EscalationState {
        if alert.is_resolved {
            EscalationState::Resolved
        } else if alert.escalation_level == 0 {
            EscalationState::Created
        } else {
            EscalationState::Escalating(alert.escalation_level)
        }
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::new(EscalationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vitals_types::AlertDraft;

    fn alert(alert_type: AlertType, severity: Severity, created_at: DateTime<Utc>) -> AlertRecord {
        let draft = AlertDraft {
            user_id: "user-1".into(),
            alert_type,
            severity,
            title: "t".into(),
            message: "m".into(),
            health_snapshot: serde_json::Value::Null,
            suggested_actions: vec![],
        };
        AlertRecord::from_draft(draft, None, None, vec![], created_at)
    }

    #[test]
    fn test_emergency_after_three_minutes() {
        let policy = EscalationPolicy::default();
        let now = Utc::now();
        let mut record = alert(AlertType::OxygenLow, Severity::Emergency, now - Duration::minutes(3));

        assert!(policy.needs_escalation(&record, now));
        assert!(record.resolve("mom", None, now));
        assert!(!policy.needs_escalation(&record, now));
        assert!(!policy.needs_escalation(&record, now + Duration::hours(10)));
    }

    #[test]
    fn test_critical_types_use_five_minutes() {
        let policy = EscalationPolicy::default();
        let now = Utc::now();
        let record = alert(AlertType::FallDetection, Severity::Emergency, now - Duration::minutes(3));
        assert!(!policy.needs_escalation(&record, now));
        assert!(policy.needs_escalation(&record, now + Duration::minutes(3)));

        // Warning-band heart rate alerts are still in the critical type set
        let hr = alert(AlertType::HeartRateHigh, Severity::High, now - Duration::minutes(6));
        assert!(policy.needs_escalation(&hr, now));
    }

    #[test]
    fn test_critical_severity_uses_ten_minutes() {
        let policy = EscalationPolicy::default();
        let now = Utc::now();
        let record = alert(AlertType::OxygenLow, Severity::Critical, now - Duration::minutes(9));
        assert!(!policy.needs_escalation(&record, now));
        assert!(policy.needs_escalation(&record, now + Duration::minutes(2)));
    }

    #[test]
    fn test_low_severities_never_escalate() {
        let policy = EscalationPolicy::default();
        let now = Utc::now();
        for severity in [Severity::Low, Severity::Medium, Severity::High] {
            let record = alert(AlertType::BatteryLow, severity, now - Duration::days(2));
            assert!(!policy.needs_escalation(&record, now));
        }
    }

    #[test]
    fn test_escalate_steps_by_age() {
        let policy = EscalationPolicy::default();
        let created = Utc::now();
        let mut record = alert(AlertType::BloodPressureHigh, Severity::Emergency, created);
        assert_eq!(EscalationPolicy::state(&record), EscalationState::Created);

        assert!(policy.escalate(&mut record, created + Duration::seconds(150)));
        assert_eq!(record.escalation_level, 1);
        assert!(!policy.escalate(&mut record, created + Duration::seconds(200)));
        assert!(policy.escalate(&mut record, created + Duration::minutes(7)));
        assert_eq!(record.escalation_level, 3);
        assert_eq!(EscalationPolicy::state(&record), EscalationState::Escalating(3));

        assert!(policy.escalate(&mut record, created + Duration::hours(1)));
        assert_eq!(record.escalation_level, MAX_ESCALATION_LEVEL);
        assert!(!policy.needs_escalation(&record, created + Duration::hours(2)));
    }

    proptest! {
        #[test]
        fn escalation_is_monotonic(
            offsets in proptest::collection::vec(0i64..7200, 1..20),
            resolve_at in proptest::option::of(0usize..20),
        ) {
            let policy = EscalationPolicy::default();
            let created = Utc::now();
            let mut record = alert(AlertType::OxygenLow, Severity::Emergency, created);
            let mut offsets = offsets;
            offsets.sort_unstable();

            let mut previous = record.escalation_level;
            let mut frozen: Option<u8> = None;
            for (i, secs) in offsets.into_iter().enumerate() {
                if resolve_at == Some(i) {
                    record.resolve("mom", None, created + Duration::seconds(secs));
                    frozen = Some(record.escalation_level);
                }
                policy.escalate(&mut record, created + Duration::seconds(secs));
                prop_assert!(record.escalation_level >= previous);
                if let Some(level) = frozen {
                    prop_assert_eq!(record.escalation_level, level);
                }
                previous = record.escalation_level;
            }
        }
    }
}
