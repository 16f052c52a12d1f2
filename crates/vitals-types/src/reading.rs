//! Readings and canonical payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of sample a device reports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    HeartRate,
    BloodPressure,
    OxygenSaturation,
    Temperature,
    BatteryLevel,
    Steps,
    Sleep,
    FallDetection,
    EmergencyButton,
    /// Any type the pipeline has no canonical shape for
    Other(String),
}

impl DataType {
    /// Parse a wire name. Unknown names map to [`DataType::Other`].
    pub fn parse(name: &str) -> Self {
        match name {
            "heart_rate" => Self::HeartRate,
            "blood_pressure" => Self::BloodPressure,
            "oxygen_saturation" => Self::OxygenSaturation,
            "temperature" => Self::Temperature,
            "battery_level" => Self::BatteryLevel,
            "steps" => Self::Steps,
            "sleep" => Self::Sleep,
            "fall_detection" => Self::FallDetection,
            "emergency_button" => Self::EmergencyButton,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name of this type
    pub fn as_str(&self) -> &str {
        match self {
            Self::HeartRate => "heart_rate",
            Self::BloodPressure => "blood_pressure",
            Self::OxygenSaturation => "oxygen_saturation",
            Self::Temperature => "temperature",
            Self::BatteryLevel => "battery_level",
            Self::Steps => "steps",
            Self::Sleep => "sleep",
            Self::FallDetection => "fall_detection",
            Self::EmergencyButton => "emergency_button",
            Self::Other(name) => name,
        }
    }

    /// Discrete events always alert, regardless of value
    pub fn is_discrete_event(&self) -> bool {
        matches!(self, Self::FallDetection | Self::EmergencyButton)
    }
}

impl From<String> for DataType {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<DataType> for String {
    fn from(data_type: DataType) -> Self {
        data_type.as_str().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic position attached to event samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Canonical payload, one variant per data type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VitalPayload {
    HeartRate {
        bpm: f64,
    },
    /// Either pressure may be absent; at least one is present
    BloodPressure {
        systolic: Option<f64>,
        diastolic: Option<f64>,
        pulse: Option<f64>,
    },
    OxygenSaturation {
        percent: f64,
    },
    Temperature {
        celsius: f64,
    },
    BatteryLevel {
        percent: f64,
    },
    Steps {
        count: u64,
    },
    Sleep {
        minutes: f64,
        quality: Option<String>,
    },
    FallDetection {
        confidence: Option<f64>,
        location: Option<GeoPoint>,
    },
    EmergencyButton {
        location: Option<GeoPoint>,
    },
    /// Pass-through for data types without a canonical shape
    Opaque {
        data_type: String,
        raw: serde_json::Value,
    },
}

impl VitalPayload {
    /// Data type this payload belongs to
    pub fn data_type(&self) -> DataType {
        match self {
            Self::HeartRate { .. } => DataType::HeartRate,
            Self::BloodPressure { .. } => DataType::BloodPressure,
            Self::OxygenSaturation { .. } => DataType::OxygenSaturation,
            Self::Temperature { .. } => DataType::Temperature,
            Self::BatteryLevel { .. } => DataType::BatteryLevel,
            Self::Steps { .. } => DataType::Steps,
            Self::Sleep { .. } => DataType::Sleep,
            Self::FallDetection { .. } => DataType::FallDetection,
            Self::EmergencyButton { .. } => DataType::EmergencyButton,
            Self::Opaque { data_type, .. } => DataType::parse(data_type),
        }
    }

    /// Snapshot attached to alerts
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A normalized, quality-scored sample from one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub user_id: String,
    pub device_id: String,
    pub device_type: String,
    pub data_type: DataType,
    pub timestamp: DateTime<Utc>,
    pub payload: VitalPayload,
    /// Always within [0.1, 1.0]
    pub quality_score: f64,
    pub quality_issues: Vec<String>,
    /// Set once the reading has been through threshold evaluation
    pub processed: bool,
    /// Set when evaluation produced at least one alert
    pub anomaly: bool,
}

impl Reading {
    /// Create an unprocessed reading with a fresh id
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        device_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: VitalPayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            device_id: device_id.into(),
            device_type: device_type.into(),
            data_type: payload.data_type(),
            timestamp,
            payload,
            quality_score: 1.0,
            quality_issues: Vec::new(),
            processed: false,
            anomaly: false,
        }
    }
}
