//! Vitals Pipeline Types
//!
//! Types shared by every stage of the pipeline: canonical readings, alert
//! drafts and records, recipients, and family memberships.

mod alert;
mod family;
mod reading;

pub use alert::{
    AlertDraft, AlertRecord, AlertType, Channel, DeliveryStatus, Recipient, Severity,
    SuggestedAction, MAX_ESCALATION_LEVEL,
};
pub use family::{FamilyMembership, FamilyRole, Permissions};
pub use reading::{DataType, GeoPoint, Reading, VitalPayload};
