//! End-to-end alerting scenarios over the in-memory repository

use async_trait::async_trait;
use chrono::{Duration, Utc};
use notifier::{ChannelSender, SendError, SendOutcome};
use pipeline::{DeliveryReceipt, Limits, Pipeline, PipelineConfig, PipelineError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use storage::{MemoryRepository, Storage};
use vitals_types::{
    AlertRecord, AlertType, Channel, DeliveryStatus, FamilyMembership, FamilyRole, Permissions,
    Severity,
};

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(Channel, String)>>,
}

impl RecordingSender {
    fn sent(&self) -> Vec<(Channel, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send(
        &self,
        channel: Channel,
        recipient_user_id: &str,
        _alert: &AlertRecord,
    ) -> Result<SendOutcome, SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel, recipient_user_id.to_string()));
        Ok(SendOutcome::accepted(format!("msg-{}", recipient_user_id)))
    }
}

type Interference = Box<dyn Fn(&mut AlertRecord) + Send + Sync>;

/// Sender that, on its n-th call, changes the stored alert the way a
/// concurrent request handler would
struct InterferingSender {
    repo: Arc<MemoryRepository>,
    on_call: usize,
    calls: AtomicUsize,
    interfere: Interference,
}

#[async_trait]
impl ChannelSender for InterferingSender {
    async fn send(
        &self,
        _channel: Channel,
        recipient_user_id: &str,
        alert: &AlertRecord,
    ) -> Result<SendOutcome, SendError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.on_call {
            let mut stored = self.repo.get_alert(alert.id).await.unwrap().unwrap();
            (self.interfere)(&mut stored);
            self.repo.update_alert(&stored).await.unwrap();
        }
        Ok(SendOutcome::accepted(format!("msg-{}", recipient_user_id)))
    }
}

fn member(group: &str, user: &str, receive_alerts: bool, view: bool, active: bool) -> FamilyMembership {
    FamilyMembership {
        group_id: group.into(),
        user_ref: user.into(),
        role: FamilyRole::Member,
        permissions: Permissions {
            receive_alerts,
            view_health_data: view,
            ..Default::default()
        },
        is_active: active,
    }
}

struct Harness {
    pipeline: Pipeline,
    repo: Arc<MemoryRepository>,
    sender: Arc<RecordingSender>,
}

fn seeded_repo() -> Arc<MemoryRepository> {
    let repo = Arc::new(MemoryRepository::new());
    for m in [
        member("fam-a", "grandpa", false, true, true),
        member("fam-a", "mom", true, true, true),
        member("fam-a", "dad", true, true, false),
        member("fam-a", "aunt", false, false, true),
        member("fam-a", "sis", true, true, true),
        member("fam-b", "uncle", true, true, true),
        member("fam-b", "grandpa", false, true, true),
    ] {
        repo.add_membership(m).unwrap();
    }
    repo
}

/// Grandpa belongs to two families; only the first one is notified
fn harness() -> Harness {
    let repo = seeded_repo();
    let sender = Arc::new(RecordingSender::default());
    let pipeline = Pipeline::new(
        PipelineConfig::default(),
        repo.clone(),
        repo.clone(),
        sender.clone(),
    );
    Harness {
        pipeline,
        repo,
        sender,
    }
}

async fn only_alert(h: &Harness) -> AlertRecord {
    let alerts = h.repo.query_family_alerts("fam-a", 10).await.unwrap();
    assert_eq!(alerts.len(), 1);
    alerts.into_iter().next().unwrap()
}

#[tokio::test]
async fn low_heart_rate_calls_first_family() {
    let h = harness();

    let receipt = h
        .pipeline
        .submit_reading("grandpa", "watch-1", "apple_watch", "heart_rate", &json!({"bpm": 35}))
        .await
        .unwrap();
    assert_eq!(receipt.alerts_generated, 1);

    let alert = only_alert(&h).await;
    assert_eq!(alert.alert_type, AlertType::HeartRateLow);
    assert_eq!(alert.severity, Severity::Emergency);
    assert_eq!(alert.reading_ref, Some(receipt.reading_id));
    assert_eq!(alert.family_group_ref.as_deref(), Some("fam-a"));

    let recipients: Vec<_> = alert
        .recipients
        .iter()
        .map(|r| (r.user_ref.as_str(), r.channel, r.status))
        .collect();
    assert_eq!(
        recipients,
        vec![
            ("mom", Channel::Call, DeliveryStatus::Sent),
            ("sis", Channel::Call, DeliveryStatus::Sent),
        ]
    );
    assert_eq!(
        h.sender.sent(),
        vec![(Channel::Call, "mom".to_string()), (Channel::Call, "sis".to_string())]
    );

    let readings = h.repo.readings_for("grandpa").unwrap();
    assert!(readings[0].processed && readings[0].anomaly);
}

#[tokio::test]
async fn elevated_blood_pressure_is_high_over_sms() {
    let h = harness();
    let receipt = h
        .pipeline
        .submit_reading(
            "grandpa",
            "cuff-1",
            "omron",
            "blood_pressure",
            &json!({"systolic": 150, "diastolic": 95}),
        )
        .await
        .unwrap();
    assert_eq!(receipt.alerts_generated, 1);

    let alert = only_alert(&h).await;
    assert_eq!(alert.alert_type, AlertType::BloodPressureHigh);
    assert_eq!(alert.severity, Severity::High);
    assert!(alert.recipients.iter().all(|r| r.channel == Channel::Sms));
}

#[tokio::test]
async fn low_battery_is_always_medium() {
    let h = harness();
    for level in [8, 2] {
        h.pipeline
            .submit_reading("grandpa", "watch-1", "apple_watch", "battery_level", &json!({"level": level}))
            .await
            .unwrap();
    }

    let alerts = h.repo.query_family_alerts("fam-a", 10).await.unwrap();
    assert_eq!(alerts.len(), 2);
    for alert in alerts {
        assert_eq!(alert.alert_type, AlertType::BatteryLow);
        assert_eq!(alert.severity, Severity::Medium);
        assert!(alert.recipients.iter().all(|r| r.channel == Channel::Push));
    }
}

#[tokio::test]
async fn normal_heart_rate_raises_nothing() {
    let h = harness();
    let receipt = h
        .pipeline
        .submit_reading("grandpa", "watch-1", "apple_watch", "heart_rate", &json!({"heartRate": "88"}))
        .await
        .unwrap();

    assert_eq!(receipt.alerts_generated, 0);
    assert_eq!(h.repo.alert_count(), 0);
    assert!(h.sender.sent().is_empty());
}

#[tokio::test]
async fn payload_without_value_is_rejected() {
    let h = harness();
    let result = h
        .pipeline
        .submit_reading("grandpa", "watch-1", "apple_watch", "heart_rate", &json!({"foo": 1}))
        .await;

    assert!(matches!(result, Err(PipelineError::Validation(_))));
    assert_eq!(h.repo.reading_count(), 0);
}

#[tokio::test]
async fn unresolved_emergency_escalates_until_resolved() {
    let h = harness();
    h.pipeline
        .submit_reading("grandpa", "ring-1", "oura", "oxygen_saturation", &json!({"spo2": 85}))
        .await
        .unwrap();
    let alert = only_alert(&h).await;
    assert_eq!(alert.severity, Severity::Emergency);

    let three_minutes = alert.created_at + Duration::minutes(3);
    assert!(h
        .pipeline
        .escalation_policy()
        .needs_escalation(&alert, three_minutes));

    let summary = h.pipeline.check_escalations(three_minutes).await.unwrap();
    assert_eq!(summary.escalated, 1);
    assert_eq!(summary.notified, 2);
    let escalated = h.repo.get_alert(alert.id).await.unwrap().unwrap();
    assert_eq!(escalated.escalation_level, 1);

    let resolved = h
        .pipeline
        .resolve_alert(alert.id, "mom", Some("She was asleep, sensor slipped".into()))
        .await
        .unwrap();
    assert!(resolved.is_resolved);

    let later = alert.created_at + Duration::minutes(30);
    assert!(!h.pipeline.escalation_policy().needs_escalation(&resolved, later));
    let summary = h.pipeline.check_escalations(later).await.unwrap();
    assert_eq!(summary.scanned, 0);
    assert_eq!(h.repo.get_alert(alert.id).await.unwrap().unwrap().escalation_level, 1);
}

#[tokio::test]
async fn escalation_skips_acknowledged_recipients() {
    let h = harness();
    h.pipeline
        .submit_reading("grandpa", "ring-1", "oura", "oxygen_saturation", &json!({"spo2": 85}))
        .await
        .unwrap();
    let alert = only_alert(&h).await;

    let acked = h.pipeline.acknowledge_alert(alert.id, "mom").await.unwrap();
    assert_eq!(
        acked.recipients[0].status,
        DeliveryStatus::Acknowledged
    );

    let before = h.sender.sent().len();
    h.pipeline
        .check_escalations(Utc::now() + Duration::minutes(5))
        .await
        .unwrap();
    let reminders = &h.sender.sent()[before..];
    assert_eq!(reminders, &[(Channel::Call, "sis".to_string())]);
}

#[tokio::test]
async fn only_active_members_resolve() {
    let h = harness();
    h.pipeline
        .submit_reading("grandpa", "watch-1", "apple_watch", "heart_rate", &json!({"bpm": 160}))
        .await
        .unwrap();
    let alert = only_alert(&h).await;

    for outsider in ["uncle", "dad"] {
        assert!(matches!(
            h.pipeline.resolve_alert(alert.id, outsider, None).await,
            Err(PipelineError::NotAuthorized { .. })
        ));
    }

    let first = h.pipeline.resolve_alert(alert.id, "mom", None).await.unwrap();
    let second = h.pipeline.resolve_alert(alert.id, "sis", None).await.unwrap();
    assert_eq!(second.resolved_by.as_deref(), Some("mom"));
    assert_eq!(second.resolved_at, first.resolved_at);

    assert!(matches!(
        h.pipeline.resolve_alert(uuid::Uuid::new_v4(), "mom", None).await,
        Err(PipelineError::AlertNotFound(_))
    ));
}

#[tokio::test]
async fn delivery_receipts_move_forward_only() {
    let h = harness();
    h.pipeline
        .submit_reading("grandpa", "watch-1", "apple_watch", "heart_rate", &json!({"bpm": 160}))
        .await
        .unwrap();
    let alert = only_alert(&h).await;

    h.pipeline
        .record_receipt(alert.id, "mom", DeliveryReceipt::Read)
        .await
        .unwrap();
    let after = h
        .pipeline
        .record_receipt(alert.id, "mom", DeliveryReceipt::Delivered)
        .await
        .unwrap();
    assert_eq!(after.recipients[0].status, DeliveryStatus::Read);
    assert!(after.recipients[0].delivered_at.is_none());

    assert!(matches!(
        h.pipeline.acknowledge_alert(alert.id, "uncle").await,
        Err(PipelineError::NotRecipient { .. })
    ));
}

#[tokio::test]
async fn family_feed_requires_health_data_permission() {
    let h = harness();
    h.pipeline
        .submit_reading("grandpa", "watch-1", "apple_watch", "heart_rate", &json!({"bpm": 160}))
        .await
        .unwrap();

    let feed = h.pipeline.family_alerts("fam-a", "mom", 20).await.unwrap();
    assert_eq!(feed.len(), 1);

    for denied in ["aunt", "uncle", "dad"] {
        assert!(matches!(
            h.pipeline.family_alerts("fam-a", denied, 20).await,
            Err(PipelineError::NotAuthorized { .. })
        ));
    }
}

fn interfering_pipeline(
    on_call: usize,
    interfere: Interference,
) -> (Pipeline, Arc<MemoryRepository>) {
    let repo = seeded_repo();
    let sender = Arc::new(InterferingSender {
        repo: repo.clone(),
        on_call,
        calls: AtomicUsize::new(0),
        interfere,
    });
    let pipeline = Pipeline::new(PipelineConfig::default(), repo.clone(), repo.clone(), sender);
    (pipeline, repo)
}

#[tokio::test]
async fn resolution_during_reminder_survives_the_sweep() {
    // Calls 1 and 2 are the initial sends, call 3 is the first reminder
    let (pipeline, repo) = interfering_pipeline(
        3,
        Box::new(|alert: &mut AlertRecord| {
            alert.resolve("mom", Some("on my way".into()), Utc::now());
        }),
    );
    pipeline
        .submit_reading("grandpa", "ring-1", "oura", "oxygen_saturation", &json!({"spo2": 85}))
        .await
        .unwrap();
    let alert = repo.query_family_alerts("fam-a", 1).await.unwrap().remove(0);

    let summary = pipeline
        .check_escalations(alert.created_at + Duration::minutes(3))
        .await
        .unwrap();
    assert_eq!(summary.escalated, 1);

    let stored = repo.get_alert(alert.id).await.unwrap().unwrap();
    assert!(stored.is_resolved);
    assert_eq!(stored.resolved_by.as_deref(), Some("mom"));
    assert_eq!(stored.resolution_notes.as_deref(), Some("on my way"));
    assert_eq!(stored.escalation_level, 0);

    let later = pipeline
        .check_escalations(alert.created_at + Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(later.scanned, 0);
}

#[tokio::test]
async fn acknowledgement_during_initial_dispatch_is_kept() {
    // Mom acknowledges while the call to sis is still going out
    let (pipeline, repo) = interfering_pipeline(
        2,
        Box::new(|alert: &mut AlertRecord| {
            alert.recipient_mut("mom").unwrap().acknowledge(Utc::now());
        }),
    );
    let receipt = pipeline
        .submit_reading("grandpa", "watch-1", "apple_watch", "heart_rate", &json!({"bpm": 35}))
        .await
        .unwrap();
    assert_eq!(receipt.alerts_generated, 1);

    let alert = repo.query_family_alerts("fam-a", 1).await.unwrap().remove(0);
    let statuses: Vec<_> = alert
        .recipients
        .iter()
        .map(|r| (r.user_ref.as_str(), r.status))
        .collect();
    assert_eq!(
        statuses,
        vec![("mom", DeliveryStatus::Acknowledged), ("sis", DeliveryStatus::Sent)]
    );
    assert_eq!(alert.recipients[0].provider_message_id.as_deref(), Some("msg-mom"));
}

#[tokio::test]
async fn settled_alerts_do_not_crowd_out_overdue_ones() {
    let repo = seeded_repo();
    let config = PipelineConfig {
        limits: Limits {
            escalation_scan: 3,
            ..Limits::default()
        },
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(
        config,
        repo.clone(),
        repo.clone(),
        Arc::new(RecordingSender::default()),
    );

    for level in [9, 8, 7] {
        pipeline
            .submit_reading("grandpa", "watch-1", "apple_watch", "battery_level", &json!({"level": level}))
            .await
            .unwrap();
    }
    pipeline
        .submit_reading("grandpa", "ring-1", "oura", "oxygen_saturation", &json!({"spo2": 85}))
        .await
        .unwrap();
    assert_eq!(repo.alert_count(), 4);

    let summary = pipeline
        .check_escalations(Utc::now() + Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.escalated, 1);

    let feed = repo.query_family_alerts("fam-a", 10).await.unwrap();
    let oxygen = feed
        .iter()
        .find(|a| a.alert_type == AlertType::OxygenLow)
        .unwrap();
    assert!(oxygen.escalation_level > 0);
}
