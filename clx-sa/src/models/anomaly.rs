//! Anomaly detection records
//!
//! Raised by the Anomaly Monitor, acknowledged/resolved by humans through
//! the anomaly feed, or force-resolved by the staleness auto-resolver.

use chrono::{DateTime, Utc};
use clx_common::events::AnomalySeverity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Which operational dimension a check watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Throughput,
    ErrorRate,
    Latency,
    Quota,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Throughput => "throughput",
            AnomalyType::ErrorRate => "error_rate",
            AnomalyType::Latency => "latency",
            AnomalyType::Quota => "quota",
        }
    }
}

/// A raised (and possibly resolved) statistical alert
///
/// Immutable once resolved except for audit fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetection {
    pub id: Uuid,
    /// Stable check identifier, e.g. "throughput_drop"; dedup key
    pub check_name: String,
    pub anomaly_type: AnomalyType,
    pub severity: AnomalySeverity,
    pub expected_value: f64,
    pub actual_value: f64,
    /// z-score or outlier distance, depending on the check
    pub deviation_score: f64,
    /// Free-form key/value context for the alerting UI
    pub context: BTreeMap<String, String>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolution_notes: Option<String>,
    /// True when force-resolved by the staleness sweep
    pub auto_resolved: bool,
}

impl AnomalyDetection {
    pub fn new(
        check_name: impl Into<String>,
        anomaly_type: AnomalyType,
        severity: AnomalySeverity,
        expected_value: f64,
        actual_value: f64,
        deviation_score: f64,
        context: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            check_name: check_name.into(),
            anomaly_type,
            severity,
            expected_value,
            actual_value,
            deviation_score,
            context,
            detected_at: Utc::now(),
            resolved_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
            resolution_notes: None,
            auto_resolved: false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_anomaly_unresolved() {
        let a = AnomalyDetection::new(
            "throughput_drop",
            AnomalyType::Throughput,
            AnomalySeverity::Warning,
            10.0,
            1.0,
            -2.5,
            BTreeMap::new(),
        );
        assert!(!a.is_resolved());
        assert!(!a.auto_resolved);
        assert!(a.acknowledged_at.is_none());
    }

    #[test]
    fn test_type_wire_values() {
        assert_eq!(
            serde_json::to_string(&AnomalyType::ErrorRate).unwrap(),
            "\"error_rate\""
        );
    }
}
