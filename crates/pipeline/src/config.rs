use alerting::{EscalationConfig, ThresholdConfig};
use data_validator::QualityConfig;
use serde::{Deserialize, Serialize};

/// Configuration for every evaluation stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub thresholds: ThresholdConfig,
    pub quality: QualityConfig,
    pub escalation: EscalationConfig,
    pub limits: Limits,
}

/// Query bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Escalation candidates examined per sweep
    pub escalation_scan: usize,
    /// Largest page a family feed may request
    pub family_feed_max: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            escalation_scan: 500,
            family_feed_max: 100,
        }
    }
}
