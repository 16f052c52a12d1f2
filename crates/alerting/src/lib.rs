//! Alerting System
//!
//! Provides threshold evaluation, age-based escalation, and recipient
//! resolution for vital-sign alerts.

mod escalation;
mod recipients;
mod thresholds;

pub use escalation::{EscalationConfig, EscalationPolicy, EscalationState};
pub use recipients::{RecipientResolver, ResolvedRecipients};
pub use thresholds::{ThresholdConfig, ThresholdEvaluator};
