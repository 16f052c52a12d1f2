//! Reading Quality Assessment

use crate::error::ValidationError;
use crate::normalizer::NormalizedSample;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vitals_types::VitalPayload;

/// Quality scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Starting score for streamed (Bluetooth/device) samples
    pub streamed_base: f64,
    /// Starting score for manually validated samples
    pub manual_base: f64,
    /// Weight applied to `confidence - 0.5`
    pub confidence_weight: f64,
    /// Penalty per missing required field
    pub missing_field_penalty: f64,
    /// Penalty per value outside its physiological range
    pub out_of_range_penalty: f64,
    /// Scores never drop below this floor
    pub min_score: f64,
    /// Heart rate physiological range (bpm)
    pub heart_rate_range: (f64, f64),
    /// Systolic pressure range (mmHg)
    pub systolic_range: (f64, f64),
    /// Diastolic pressure range (mmHg)
    pub diastolic_range: (f64, f64),
    /// Oxygen saturation range (%)
    pub oxygen_range: (f64, f64),
    /// Body temperature range (°C)
    pub temperature_range: (f64, f64),
    /// Battery level range (%)
    pub battery_range: (f64, f64),
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            streamed_base: 0.8,
            manual_base: 1.0,
            confidence_weight: 0.4,
            missing_field_penalty: 0.5,
            out_of_range_penalty: 0.3,
            min_score: 0.1,
            heart_rate_range: (30.0, 220.0),
            systolic_range: (50.0, 260.0),
            diastolic_range: (30.0, 160.0),
            oxygen_range: (50.0, 100.0),
            temperature_range: (30.0, 45.0),
            battery_range: (0.0, 100.0),
        }
    }
}

/// Where a sample came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleSource {
    /// Streamed from a wearable or Bluetooth device
    Streamed,
    /// Entered and validated by a person
    Manual,
}

impl SampleSource {
    /// Devices registered with type `manual` are manual entries
    pub fn from_device_type(device_type: &str) -> Self {
        if device_type.eq_ignore_ascii_case("manual") {
            Self::Manual
        } else {
            Self::Streamed
        }
    }
}

/// Result of quality assessment
#[derive(Debug, Clone, PartialEq)]
pub struct QualityAssessment {
    /// Score in [min_score, 1.0]
    pub score: f64,
    /// Human-readable issue descriptions
    pub issues: Vec<String>,
}

/// Scores reading reliability
pub struct QualityAssessor {
    config: QualityConfig,
}

impl QualityAssessor {
    /// Create a new assessor with given config
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Score a normalized sample
    pub fn assess(&self, sample: &NormalizedSample, source: SampleSource) -> QualityAssessment {
        let mut score = match source {
            SampleSource::Streamed => self.config.streamed_base,
            SampleSource::Manual => self.config.manual_base,
        };

        if let Some(confidence) = sample.confidence {
            score = (score + (confidence - 0.5) * self.config.confidence_weight).min(1.0);
        }

        let (present, required, missing) = completeness(&sample.payload);
        if required > 0 {
            score *= present as f64 / required as f64;
        }

        let mut errors: Vec<ValidationError> =
            missing.into_iter().map(ValidationError::MissingField).collect();
        let missing_count = errors.len();
        errors.extend(self.range_errors(&sample.payload));
        let out_of_range_count = errors.len() - missing_count;

        score -= missing_count as f64 * self.config.missing_field_penalty;
        score -= out_of_range_count as f64 * self.config.out_of_range_penalty;
        let score = score.clamp(self.config.min_score, 1.0);

        if !errors.is_empty() {
            debug!("Quality issues: {:?}", errors);
        }

        QualityAssessment {
            score,
            issues: errors.iter().map(ToString::to_string).collect(),
        }
    }

    /// Validate a single value against a range
    pub fn validate_range(
        &self,
        field: &'static str,
        value: f64,
        range: (f64, f64),
    ) -> Result<(), ValidationError> {
        if value < range.0 || value > range.1 {
            Err(ValidationError::OutOfRange {
                field,
                value,
                min: range.0,
                max: range.1,
            })
        } else {
            Ok(())
        }
    }

    fn range_errors(&self, payload: &VitalPayload) -> Vec<ValidationError> {
        let c = &self.config;
        let checks: Vec<(&'static str, f64, (f64, f64))> = match payload {
            VitalPayload::HeartRate { bpm } => vec![("heart_rate", *bpm, c.heart_rate_range)],
            VitalPayload::BloodPressure {
                systolic,
                diastolic,
                ..
            } => systolic
                .map(|v| ("systolic", v, c.systolic_range))
                .into_iter()
                .chain(diastolic.map(|v| ("diastolic", v, c.diastolic_range)))
                .collect(),
            VitalPayload::OxygenSaturation { percent } => {
                vec![("oxygen_saturation", *percent, c.oxygen_range)]
            }
            VitalPayload::Temperature { celsius } => {
                vec![("temperature", *celsius, c.temperature_range)]
            }
            VitalPayload::BatteryLevel { percent } => {
                vec![("battery_level", *percent, c.battery_range)]
            }
            _ => Vec::new(),
        };

        checks
            .into_iter()
            .filter_map(|(field, value, range)| self.validate_range(field, value, range).err())
            .collect()
    }
}

impl Default for QualityAssessor {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

/// (present, required, missing field names) for the payload's type
fn completeness(payload: &VitalPayload) -> (usize, usize, Vec<&'static str>) {
    match payload {
        VitalPayload::BloodPressure {
            systolic,
            diastolic,
            ..
        } => {
            let mut missing = Vec::new();
            if systolic.is_none() {
                missing.push("systolic");
            }
            if diastolic.is_none() {
                missing.push("diastolic");
            }
            (2 - missing.len(), 2, missing)
        }
        VitalPayload::FallDetection { .. }
        | VitalPayload::EmergencyButton { .. }
        | VitalPayload::Opaque { .. } => (0, 0, Vec::new()),
        // Single-field types cannot normalize without their value
        _ => (1, 1, Vec::new()),
    }
}
