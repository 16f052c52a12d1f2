//! Threshold Evaluation
//!
//! Every vital has a warning band and a wider critical band. The critical
//! band is checked first; a reading yields at most one alert draft.

use serde::{Deserialize, Serialize};
use tracing::debug;
use vitals_types::{AlertDraft, AlertType, GeoPoint, Reading, Severity, SuggestedAction, VitalPayload};

/// Clinical threshold configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Heart rate warning band (bpm); values at or beyond either bound alert
    pub heart_rate_warning: (f64, f64),
    /// Heart rate critical band (bpm)
    pub heart_rate_critical: (f64, f64),
    /// Systolic warning threshold (mmHg, inclusive)
    pub systolic_warning: f64,
    /// Systolic critical threshold (mmHg, inclusive)
    pub systolic_critical: f64,
    /// Diastolic warning threshold (mmHg, inclusive)
    pub diastolic_warning: f64,
    /// Diastolic critical threshold (mmHg, inclusive)
    pub diastolic_critical: f64,
    /// Oxygen saturation warning threshold (%, alerts below)
    pub oxygen_warning: f64,
    /// Oxygen saturation critical threshold (%, alerts below)
    pub oxygen_critical: f64,
    /// Temperature warning band (°C); values strictly outside alert
    pub temperature_warning: (f64, f64),
    /// Temperature critical band (°C)
    pub temperature_critical: (f64, f64),
    /// Battery level at or below which a device alert fires (%)
    pub battery_low: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            heart_rate_warning: (50.0, 120.0),
            heart_rate_critical: (40.0, 150.0),
            systolic_warning: 140.0,
            systolic_critical: 180.0,
            diastolic_warning: 90.0,
            diastolic_critical: 110.0,
            oxygen_warning: 95.0,
            oxygen_critical: 90.0,
            temperature_warning: (36.1, 37.2),
            temperature_critical: (35.0, 39.0),
            battery_low: 10.0,
        }
    }
}

/// Which band a value fell into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Normal,
    Warning,
    Critical,
}

impl Band {
    fn severity(self) -> Option<Severity> {
        match self {
            Band::Normal => None,
            Band::Warning => Some(Severity::High),
            Band::Critical => Some(Severity::Emergency),
        }
    }
}

/// Stateless evaluator turning readings into alert drafts
pub struct ThresholdEvaluator {
    config: ThresholdConfig,
}

impl ThresholdEvaluator {
    /// Create a new evaluator with given config
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    /// Evaluate a reading, producing at most one alert draft
    pub fn evaluate(&self, reading: &Reading) -> Option<AlertDraft> {
        let draft = self.evaluate_payload(&reading.user_id, &reading.payload);
        if let Some(draft) = &draft {
            debug!(
                "Reading {} triggered {} ({})",
                reading.id,
                draft.alert_type.as_str(),
                draft.severity.as_str()
            );
        }
        draft
    }

    /// Evaluate a canonical payload on behalf of `user_id`
    pub fn evaluate_payload(&self, user_id: &str, payload: &VitalPayload) -> Option<AlertDraft> {
        let c = &self.config;
        let snapshot = payload.snapshot();
        let draft = |alert_type, severity, title: String, message: String, actions| AlertDraft {
            user_id: user_id.to_string(),
            alert_type,
            severity,
            title,
            message,
            health_snapshot: snapshot.clone(),
            suggested_actions: actions,
        };

        match payload {
            VitalPayload::HeartRate { bpm } => {
                let bpm = *bpm;
                let severity = self.heart_rate_band(bpm).severity()?;
                let low = bpm <= c.heart_rate_warning.0;
                let (alert_type, direction) = if low {
                    (AlertType::HeartRateLow, "low")
                } else {
                    (AlertType::HeartRateHigh, "high")
                };
                Some(draft(
                    alert_type,
                    severity,
                    title_for(severity, &format!("heart rate {}", direction)),
                    format!("Heart rate of {:.0} bpm is {}", bpm, describe(severity, direction)),
                    vital_actions(severity),
                ))
            }
            VitalPayload::BloodPressure {
                systolic,
                diastolic,
                ..
            } => {
                let band = self.blood_pressure_band(*systolic, *diastolic);
                let severity = band.severity()?;
                Some(draft(
                    AlertType::BloodPressureHigh,
                    severity,
                    title_for(severity, "blood pressure high"),
                    format!(
                        "Blood pressure of {}/{} mmHg is {}",
                        fmt_optional(*systolic),
                        fmt_optional(*diastolic),
                        describe(severity, "high")
                    ),
                    vital_actions(severity),
                ))
            }
            VitalPayload::OxygenSaturation { percent } => {
                let band = if *percent < c.oxygen_critical {
                    Band::Critical
                } else if *percent < c.oxygen_warning {
                    Band::Warning
                } else {
                    Band::Normal
                };
                let severity = band.severity()?;
                Some(draft(
                    AlertType::OxygenLow,
                    severity,
                    title_for(severity, "oxygen saturation low"),
                    format!("Oxygen saturation of {:.0}% is {}", percent, describe(severity, "low")),
                    vital_actions(severity),
                ))
            }
            VitalPayload::Temperature { celsius } => {
                let celsius = *celsius;
                let severity = self.temperature_band(celsius).severity()?;
                let low = celsius < c.temperature_warning.0;
                let (alert_type, direction) = if low {
                    (AlertType::TemperatureLow, "low")
                } else {
                    (AlertType::TemperatureHigh, "high")
                };
                Some(draft(
                    alert_type,
                    severity,
                    title_for(severity, &format!("body temperature {}", direction)),
                    format!(
                        "Body temperature of {:.1}°C is {}",
                        celsius,
                        describe(severity, direction)
                    ),
                    vital_actions(severity),
                ))
            }
            VitalPayload::FallDetection {
                confidence,
                location,
            } => {
                let mut message = String::from("A fall was detected");
                if let Some(confidence) = confidence {
                    message.push_str(&format!(" ({:.0}% confidence)", confidence * 100.0));
                }
                message.push_str(&location_suffix(location.as_ref()));
                Some(draft(
                    AlertType::FallDetection,
                    Severity::Emergency,
                    "Fall detected".to_string(),
                    message,
                    event_actions(location.is_some()),
                ))
            }
            VitalPayload::EmergencyButton { location } => Some(draft(
                AlertType::EmergencyButton,
                Severity::Emergency,
                "Emergency button pressed".to_string(),
                format!(
                    "The emergency button was pressed{}",
                    location_suffix(location.as_ref())
                ),
                event_actions(location.is_some()),
            )),
            // Device housekeeping, not a clinical threshold: never escalates by value
            VitalPayload::BatteryLevel { percent } if *percent <= c.battery_low => Some(draft(
                AlertType::BatteryLow,
                Severity::Medium,
                "Device battery low".to_string(),
                format!("Device battery is at {:.0}%", percent),
                vec![SuggestedAction::ChargeDevice],
            )),
            _ => None,
        }
    }

    /// Whether a sample must bypass the ingestion buffer
    pub fn is_critical(&self, payload: &VitalPayload) -> bool {
        match payload {
            VitalPayload::FallDetection { .. } | VitalPayload::EmergencyButton { .. } => true,
            VitalPayload::HeartRate { bpm } => self.heart_rate_band(*bpm) == Band::Critical,
            VitalPayload::Temperature { celsius } => {
                self.temperature_band(*celsius) == Band::Critical
            }
            _ => false,
        }
    }

    fn heart_rate_band(&self, bpm: f64) -> Band {
        let (crit_low, crit_high) = self.config.heart_rate_critical;
        let (warn_low, warn_high) = self.config.heart_rate_warning;
        if bpm <= crit_low || bpm >= crit_high {
            Band::Critical
        } else if bpm <= warn_low || bpm >= warn_high {
            Band::Warning
        } else {
            Band::Normal
        }
    }

    fn temperature_band(&self, celsius: f64) -> Band {
        let (crit_low, crit_high) = self.config.temperature_critical;
        let (warn_low, warn_high) = self.config.temperature_warning;
        if celsius < crit_low || celsius > crit_high {
            Band::Critical
        } else if celsius < warn_low || celsius > warn_high {
            Band::Warning
        } else {
            Band::Normal
        }
    }

    fn blood_pressure_band(&self, systolic: Option<f64>, diastolic: Option<f64>) -> Band {
        let c = &self.config;
        let sys = |limit: f64| systolic.is_some_and(|v| v >= limit);
        let dia = |limit: f64| diastolic.is_some_and(|v| v >= limit);
        if sys(c.systolic_critical) || dia(c.diastolic_critical) {
            Band::Critical
        } else if sys(c.systolic_warning) || dia(c.diastolic_warning) {
            Band::Warning
        } else {
            Band::Normal
        }
    }
}

impl Default for ThresholdEvaluator {
    fn default() -> Self {
        Self::new(ThresholdConfig::default())
    }
}

fn title_for(severity: Severity, subject: &str) -> String {
    let prefix = if severity == Severity::Emergency {
        "Critical"
    } else {
        "Warning"
    };
    format!("{}: {}", prefix, subject)
}

fn describe(severity: Severity, direction: &str) -> String {
    if severity == Severity::Emergency {
        format!("dangerously {}", direction)
    } else {
        format!("{} and should be watched", direction)
    }
}

fn fmt_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "?".to_string(), |v| format!("{:.0}", v))
}

fn location_suffix(location: Option<&GeoPoint>) -> String {
    location.map_or_else(String::new, |p| {
        format!(" near ({:.5}, {:.5})", p.latitude, p.longitude)
    })
}

fn vital_actions(severity: Severity) -> Vec<SuggestedAction> {
    if severity == Severity::Emergency {
        vec![
            SuggestedAction::CallEmergencyServices,
            SuggestedAction::ContactUser,
        ]
    } else {
        vec![
            SuggestedAction::ContactUser,
            SuggestedAction::RecheckMeasurement,
            SuggestedAction::MonitorClosely,
        ]
    }
}

fn event_actions(has_location: bool) -> Vec<SuggestedAction> {
    let mut actions = vec![
        SuggestedAction::CallEmergencyServices,
        SuggestedAction::ContactUser,
    ];
    if has_location {
        actions.push(SuggestedAction::CheckLocation);
    }
    actions
}
