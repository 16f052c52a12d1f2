//! Vendor Payload Normalization
//!
//! Devices report the same vital under different field names. Each canonical
//! field has an ordered alias list; the first alias holding a usable value
//! wins.

use crate::error::ValidationError;
use serde_json::{Map, Value};
use tracing::debug;
use vitals_types::{DataType, GeoPoint, VitalPayload};

const HEART_RATE: &[&str] = &["heartRate", "bpm", "heart_rate", "value"];
const SYSTOLIC: &[&str] = &["systolic", "sys", "systolicPressure"];
const DIASTOLIC: &[&str] = &["diastolic", "dia", "diastolicPressure"];
const PULSE: &[&str] = &["pulse", "heartRate"];
const OXYGEN: &[&str] = &["spo2", "oxygenSaturation", "oxygen", "value"];
const TEMPERATURE: &[&str] = &["temperature", "celsius", "temp", "value"];
const FAHRENHEIT: &[&str] = &["fahrenheit"];
const BATTERY: &[&str] = &["level", "batteryLevel", "battery", "value"];
const STEPS: &[&str] = &["steps", "stepCount", "count", "value"];
const SLEEP_MINUTES: &[&str] = &["duration", "sleepMinutes", "minutes", "value"];
const SLEEP_QUALITY: &[&str] = &["quality", "sleepQuality"];
const CONFIDENCE: &[&str] = &["confidence"];
const LATITUDE: &[&str] = &["latitude", "lat"];
const LONGITUDE: &[&str] = &["longitude", "lng", "lon"];

/// Canonical payload plus the device-reported confidence, if any
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSample {
    pub payload: VitalPayload,
    /// Clamped to [0, 1]
    pub confidence: Option<f64>,
}

/// Stateless payload normalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    /// Create a new normalizer
    pub fn new() -> Self {
        Self
    }

    /// Normalize a raw device payload for the given data type
    pub fn normalize(
        &self,
        data_type: &DataType,
        raw: &Value,
    ) -> Result<NormalizedSample, ValidationError> {
        // A bare scalar is treated as the generic `value` field
        let wrapped;
        let fields = match raw {
            Value::Object(map) => map,
            Value::Number(_) | Value::String(_) => {
                let mut map = Map::new();
                map.insert("value".to_string(), raw.clone());
                wrapped = map;
                &wrapped
            }
            _ => {
                wrapped = Map::new();
                &wrapped
            }
        };

        let no_value = || ValidationError::NoCanonicalValue {
            data_type: data_type.as_str().to_string(),
        };

        let payload = match data_type {
            DataType::HeartRate => VitalPayload::HeartRate {
                bpm: first_number(fields, HEART_RATE).ok_or_else(no_value)?,
            },
            DataType::BloodPressure => {
                let systolic = first_number(fields, SYSTOLIC);
                let diastolic = first_number(fields, DIASTOLIC);
                if systolic.is_none() && diastolic.is_none() {
                    return Err(no_value());
                }
                VitalPayload::BloodPressure {
                    systolic,
                    diastolic,
                    pulse: first_number(fields, PULSE),
                }
            }
            DataType::OxygenSaturation => VitalPayload::OxygenSaturation {
                percent: first_number(fields, OXYGEN).ok_or_else(no_value)?,
            },
            DataType::Temperature => {
                let celsius = first_number(fields, TEMPERATURE)
                    .or_else(|| first_number(fields, FAHRENHEIT).map(fahrenheit_to_celsius))
                    .ok_or_else(no_value)?;
                VitalPayload::Temperature { celsius }
            }
            DataType::BatteryLevel => VitalPayload::BatteryLevel {
                percent: first_number(fields, BATTERY).ok_or_else(no_value)?,
            },
            DataType::Steps => {
                let count = first_number(fields, STEPS).ok_or_else(no_value)?;
                VitalPayload::Steps {
                    count: count.max(0.0).round() as u64,
                }
            }
            DataType::Sleep => VitalPayload::Sleep {
                minutes: first_number(fields, SLEEP_MINUTES).ok_or_else(no_value)?,
                quality: first_text(fields, SLEEP_QUALITY),
            },
            DataType::FallDetection => VitalPayload::FallDetection {
                confidence: first_number(fields, CONFIDENCE).map(clamp_unit),
                location: location(fields),
            },
            DataType::EmergencyButton => VitalPayload::EmergencyButton {
                location: location(fields),
            },
            DataType::Other(name) => {
                if fields.values().all(Value::is_null) {
                    return Err(no_value());
                }
                VitalPayload::Opaque {
                    data_type: name.clone(),
                    raw: Value::Object(fields.clone()),
                }
            }
        };

        debug!("Normalized {} payload", data_type);

        Ok(NormalizedSample {
            payload,
            confidence: first_number(fields, CONFIDENCE).map(clamp_unit),
        })
    }
}

/// First alias carrying a finite number (JSON number or numeric string)
fn first_number(fields: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    aliases
        .iter()
        .filter_map(|alias| fields.get(*alias))
        .filter(|value| !value.is_null())
        .find_map(as_number)
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn first_text(fields: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .filter_map(|alias| fields.get(*alias))
        .find_map(|value| match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Location from a nested `location` object or top-level coordinates
fn location(fields: &Map<String, Value>) -> Option<GeoPoint> {
    let source = match fields.get("location") {
        Some(Value::Object(nested)) => nested,
        _ => fields,
    };
    Some(GeoPoint {
        latitude: first_number(source, LATITUDE)?,
        longitude: first_number(source, LONGITUDE)?,
    })
}

fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn normalize(data_type: DataType, raw: Value) -> Result<NormalizedSample, ValidationError> {
        Normalizer::new().normalize(&data_type, &raw)
    }

    #[test]
    fn test_heart_rate_aliases() {
        for raw in [json!({"heartRate": 72}), json!({"bpm": 72}), json!({"value": "72"})] {
            let sample = normalize(DataType::HeartRate, raw).unwrap();
            assert_eq!(sample.payload, VitalPayload::HeartRate { bpm: 72.0 });
        }
    }

    #[test]
    fn test_first_non_null_alias_wins() {
        let sample = normalize(
            DataType::HeartRate,
            json!({"heartRate": null, "bpm": 64, "value": 99}),
        )
        .unwrap();
        assert_eq!(sample.payload, VitalPayload::HeartRate { bpm: 64.0 });
    }

    #[test]
    fn test_missing_value_fails() {
        let err = normalize(DataType::OxygenSaturation, json!({"foo": 1})).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NoCanonicalValue {
                data_type: "oxygen_saturation".into()
            }
        );
    }

    #[test]
    fn test_blood_pressure_partial() {
        let sample = normalize(DataType::BloodPressure, json!({"sys": 150})).unwrap();
        assert_eq!(
            sample.payload,
            VitalPayload::BloodPressure {
                systolic: Some(150.0),
                diastolic: None,
                pulse: None
            }
        );
        assert!(normalize(DataType::BloodPressure, json!({"pulse": 80})).is_err());
    }

    #[test]
    fn test_fahrenheit_converted() {
        let sample = normalize(DataType::Temperature, json!({"fahrenheit": 98.6})).unwrap();
        match sample.payload {
            VitalPayload::Temperature { celsius } => assert!((celsius - 37.0).abs() < 0.01),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_bare_scalar_is_value() {
        let sample = normalize(DataType::BatteryLevel, json!(8)).unwrap();
        assert_eq!(sample.payload, VitalPayload::BatteryLevel { percent: 8.0 });
    }

    #[test]
    fn test_fall_detection_carries_location() {
        let sample = normalize(
            DataType::FallDetection,
            json!({"confidence": 0.92, "location": {"lat": 52.5, "lng": 13.4}}),
        )
        .unwrap();
        assert_eq!(
            sample.payload,
            VitalPayload::FallDetection {
                confidence: Some(0.92),
                location: Some(GeoPoint {
                    latitude: 52.5,
                    longitude: 13.4
                }),
            }
        );
        assert_eq!(sample.confidence, Some(0.92));
    }

    #[test]
    fn test_emergency_button_without_fields() {
        let sample = normalize(DataType::EmergencyButton, json!({})).unwrap();
        assert_eq!(sample.payload, VitalPayload::EmergencyButton { location: None });
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let sample = normalize(DataType::parse("glucose"), json!({"mgdl": 110})).unwrap();
        assert_eq!(
            sample.payload,
            VitalPayload::Opaque {
                data_type: "glucose".into(),
                raw: json!({"mgdl": 110}),
            }
        );
        assert!(normalize(DataType::parse("glucose"), json!({})).is_err());
    }

    proptest! {
        #[test]
        fn normalizing_twice_is_identical(bpm in -50.0f64..400.0, confidence in proptest::option::of(0.0f64..1.0)) {
            let raw = json!({"bpm": bpm, "confidence": confidence});
            let first = normalize(DataType::HeartRate, raw.clone()).unwrap();
            let second = normalize(DataType::HeartRate, raw).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
