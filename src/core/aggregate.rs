//! Reduction of window contents to a single aggregate.
//!
//! Averages preserve the numeric kind of their inputs: a mean over integer
//! values is rounded to the nearest integer, a mean involving any float is
//! rounded to two decimal places. Both round halves away from zero
//! (`2.5 -> 3`, `-2.5 -> -3`). Integer means are summed exactly in `i128`
//! so a tie is never lost to floating-point error.

use crate::config::ConfigError;
use crate::core::buffer::WindowContents;
use crate::core::reading::{FieldValue, Reading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

/// Lowest level produced by [`raw_to_level`].
pub const LEVEL_FLOOR: f64 = 40.0;

/// Span of levels above the floor, scaled by `log10(2)` at full range.
const LEVEL_SPAN: f64 = 60.0;

/// Smallest normalized magnitude fed to the logarithm.
const MIN_NORMALIZED: f64 = 0.0001;

/// `2^52 / 100`: from here on an `f64` has no fractional hundredths left to round.
const ROUND2_LIMIT: f64 = 45_035_996_273_704.96;

/// Round to two decimal places.
///
/// Values too large to carry hundredths are returned unchanged.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() || value.abs() >= ROUND2_LIMIT {
        return value;
    }
    (value * 100.0).round() / 100.0
}

/// A mean rounded according to the kind of its inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
enum KindMean {
    Integer(i64),
    Float(f64),
}

impl KindMean {
    fn as_f64(self) -> f64 {
        match self {
            KindMean::Integer(i) => i as f64,
            KindMean::Float(f) => f,
        }
    }
}

/// Integer mean rounded half away from zero, computed without floating point.
fn integer_mean(values: &[i64]) -> i64 {
    let sum: i128 = values.iter().map(|&v| i128::from(v)).sum();
    let n = values.len() as i128;
    let quotient = sum / n;
    let remainder = sum % n;

    // The mean of i64 values always fits back into an i64.
    let rounded = if 2 * remainder.abs() >= n {
        quotient + remainder.signum()
    } else {
        quotient
    };
    rounded as i64
}

/// Mean of the numeric values in `values`, rounded by kind.
fn kind_preserving_mean<'a>(values: impl Iterator<Item = &'a FieldValue>) -> Option<KindMean> {
    let values: Vec<&FieldValue> = values.filter(|v| v.is_numeric()).collect();
    if values.is_empty() {
        return None;
    }

    let integers: Option<Vec<i64>> = values
        .iter()
        .map(|v| match v {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        })
        .collect();

    match integers {
        Some(integers) => Some(KindMean::Integer(integer_mean(&integers))),
        None => {
            let sum: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
            Some(KindMean::Float(round2(sum / values.len() as f64)))
        }
    }
}

/// Average of `field` over the readings that carry a numeric value for it.
///
/// Returns `0.0` when no reading qualifies. An all-integer mean comes back
/// as an integral float (`3.0`).
pub fn average_field(readings: &[Reading], field: &str) -> f64 {
    kind_preserving_mean(
        readings
            .iter()
            .filter_map(|r| r.get(field))
            .filter(|v| v.is_numeric()),
    )
    .map(KindMean::as_f64)
    .unwrap_or(0.0)
}

/// Per-key average over the union of keys seen in `readings`.
///
/// Keys with at least one numeric value get the kind-preserving mean of
/// those values; integer means stay [`FieldValue::Integer`]. Keys with no
/// numeric values take the value from the last reading, or null if the
/// last reading lacks the key.
pub fn average_record(readings: &[Reading]) -> Reading {
    let keys: BTreeSet<&String> = readings.iter().flat_map(|r| r.keys()).collect();

    keys.into_iter()
        .map(|key| {
            let numeric = readings
                .iter()
                .filter_map(|r| r.get(key))
                .filter(|v| v.is_numeric());

            let value = match kind_preserving_mean(numeric) {
                Some(KindMean::Integer(mean)) => FieldValue::Integer(mean),
                Some(KindMean::Float(mean)) => FieldValue::Float(mean),
                None => readings
                    .last()
                    .and_then(|r| r.get(key))
                    .cloned()
                    .unwrap_or(FieldValue::Other(Value::Null)),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Map a raw magnitude in `[min_value, max_value]` onto a logarithmic level.
///
/// The raw value is clamped to the range and normalized to `[0, 1]`, floored
/// at `0.0001`, and mapped to `40 + 60 * log10(normalized + 1)`, rounded to
/// two decimals. The result lies in `[40.0, 58.06]` and never decreases as
/// `raw_value` grows. A degenerate range (`min_value >= max_value`) yields the
/// floor level.
pub fn raw_to_level(raw_value: f64, min_value: f64, max_value: f64) -> f64 {
    let normalized = if min_value < max_value {
        let clamped = raw_value.max(min_value).min(max_value);
        (clamped - min_value) / (max_value - min_value)
    } else {
        0.0
    };
    // f64::max discards NaN, so a NaN raw value lands on the floor as well.
    let normalized = normalized.max(MIN_NORMALIZED);

    round2(LEVEL_FLOOR + LEVEL_SPAN * (normalized + 1.0).log10())
}

/// Raw input range used to interpret the aggregated value as a level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelScale {
    pub min: f64,
    pub max: f64,
}

impl Default for LevelScale {
    fn default() -> Self {
        Self {
            min: 120.0,
            max: 1023.0,
        }
    }
}

impl LevelScale {
    pub fn new(min: f64, max: f64) -> Result<Self, ConfigError> {
        let scale = Self { min, max };
        scale.validate()?;
        Ok(scale)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min.is_finite() && self.max.is_finite() && self.min < self.max {
            Ok(())
        } else {
            Err(ConfigError::InvalidLevelScale(format!(
                "expected min < max, got [{}, {}]",
                self.min, self.max
            )))
        }
    }

    pub fn level(&self, raw_value: f64) -> f64 {
        raw_to_level(raw_value, self.min, self.max)
    }
}

/// The aggregate published once per window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Average of the aggregated field
    pub value: f64,
    /// Number of readings in the window
    pub samples: usize,
    /// Arrival time of the newest reading in the window
    pub timestamp: Option<DateTime<Utc>>,
    /// `value` mapped through the level scale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
}

/// Errors computing an aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateError {
    /// The mean overflowed or was otherwise not a finite number
    NonFinite { field: String, value: f64 },
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateError::NonFinite { field, value } => {
                write!(f, "Average of '{field}' is not finite: {value}")
            }
        }
    }
}

impl std::error::Error for AggregateError {}

/// Aggregate `field` over a window.
///
/// Returns `Ok(None)` for an empty window.
pub fn compute_aggregate(
    contents: &WindowContents,
    field: &str,
    scale: Option<&LevelScale>,
) -> Result<Option<AggregateResult>, AggregateError> {
    if contents.readings.is_empty() {
        return Ok(None);
    }

    let value = average_field(&contents.readings, field);
    if !value.is_finite() {
        return Err(AggregateError::NonFinite {
            field: field.to_string(),
            value,
        });
    }

    Ok(Some(AggregateResult {
        value,
        samples: contents.readings.len(),
        timestamp: contents.last_timestamp,
        level: scale.map(|s| s.level(value)),
    }))
}

/// Shared slot holding the most recently published aggregate.
///
/// Writers replace the whole value; readers get a clone, never a partial update.
#[derive(Debug, Clone, Default)]
pub struct LatestAggregate {
    inner: Arc<RwLock<Option<AggregateResult>>>,
}

impl LatestAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published aggregate.
    pub fn publish(&self, result: AggregateResult) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(result);
    }

    /// The latest aggregate, or `None` if nothing has been published yet.
    pub fn get(&self) -> Option<AggregateResult> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analog(v: impl Into<FieldValue>) -> Reading {
        Reading::new().with("analog", v)
    }

    #[test]
    fn test_average_field_empty() {
        assert_eq!(average_field(&[], "analog"), 0.0);
    }

    #[test]
    fn test_average_field_no_numeric_values() {
        let readings = vec![analog("loud"), Reading::new().with("other", 5)];
        assert_eq!(average_field(&readings, "analog"), 0.0);
    }

    #[test]
    fn test_average_field_integers_round_to_integer() {
        let readings = vec![analog(10), analog(20), analog(30)];
        assert_eq!(average_field(&readings, "analog"), 20.0);

        // 11/3 = 3.666..
        let readings = vec![analog(1), analog(5), analog(5)];
        assert_eq!(average_field(&readings, "analog"), 4.0);
    }

    #[test]
    fn test_average_field_halves_round_away_from_zero() {
        assert_eq!(average_field(&[analog(1), analog(2)], "analog"), 2.0);
        assert_eq!(average_field(&[analog(2), analog(3)], "analog"), 3.0);
        assert_eq!(average_field(&[analog(-1), analog(-2)], "analog"), -2.0);
    }

    #[test]
    fn test_average_field_integer_ties_are_exact() {
        // 5932 / 8 = 741.5
        let readings: Vec<Reading> = [964, 808, 818, 549, 280, 927, 893, 693]
            .into_iter()
            .map(analog)
            .collect();
        assert_eq!(average_field(&readings, "analog"), 742.0);

        // -5932 / 8 = -741.5
        let readings: Vec<Reading> = [-964, -808, -818, -549, -280, -927, -893, -693]
            .into_iter()
            .map(analog)
            .collect();
        assert_eq!(average_field(&readings, "analog"), -742.0);

        // 7 / 3 = 2.333.. and -7 / 3 = -2.333..
        assert_eq!(average_field(&[analog(1), analog(3), analog(3)], "analog"), 2.0);
        assert_eq!(average_field(&[analog(-1), analog(-3), analog(-3)], "analog"), -2.0);
    }

    #[test]
    fn test_integer_mean_does_not_overflow() {
        let readings = vec![analog(i64::MAX), analog(i64::MAX), analog(i64::MAX - 2)];
        let avg = average_record(&readings);
        assert_eq!(avg.get("analog"), Some(&FieldValue::Integer(i64::MAX - 1)));

        let readings = vec![analog(i64::MIN), analog(i64::MIN)];
        let avg = average_record(&readings);
        assert_eq!(avg.get("analog"), Some(&FieldValue::Integer(i64::MIN)));
    }

    #[test]
    fn test_round2_leaves_large_values_alone() {
        assert_eq!(round2(1.5e307), 1.5e307);
        assert_eq!(round2(-f64::MAX), -f64::MAX);
        assert_eq!(round2(1e14 + 0.5), 1e14 + 0.5);
        assert!(round2(f64::NAN).is_nan());
        assert_eq!(round2(f64::INFINITY), f64::INFINITY);
        assert_eq!(round2(2.1666), 2.17);
    }

    #[test]
    fn test_average_field_huge_floats_stay_finite() {
        let readings = vec![analog(1e307), analog(2e307)];
        assert_eq!(average_field(&readings, "analog"), 1.5e307);

        let contents = WindowContents {
            readings,
            last_timestamp: Some(Utc::now()),
        };
        let result = compute_aggregate(&contents, "analog", None).unwrap().unwrap();
        assert_eq!(result.value, 1.5e307);
    }

    #[test]
    fn test_average_field_floats_round_to_two_places() {
        let readings = vec![analog(1), analog(2.5), analog(3)];
        // 6.5 / 3 = 2.1666..
        assert_eq!(average_field(&readings, "analog"), 2.17);

        let readings = vec![analog(3.0), analog(3.0)];
        assert_eq!(average_field(&readings, "analog"), 3.0);
    }

    #[test]
    fn test_average_field_skips_non_numeric() {
        let readings = vec![analog(10), analog("n/a"), Reading::new(), analog(20)];
        assert_eq!(average_field(&readings, "analog"), 15.0);
    }

    #[test]
    fn test_average_record_empty() {
        assert!(average_record(&[]).is_empty());
    }

    #[test]
    fn test_average_record_union_of_keys() {
        let readings = vec![
            Reading::new().with("analog", 10).with("device", "mic-1"),
            Reading::new().with("analog", 21).with("volts", 1.5),
            Reading::new().with("device", "mic-2").with("volts", 1.75),
        ];

        let avg = average_record(&readings);
        assert_eq!(avg.len(), 3);
        // 15.5 rounds up
        assert_eq!(avg.get("analog"), Some(&FieldValue::Integer(16)));
        assert_eq!(avg.get("volts"), Some(&FieldValue::Float(1.63)));
        assert_eq!(avg.get("device"), Some(&FieldValue::from("mic-2")));
    }

    #[test]
    fn test_average_record_non_numeric_takes_last_reading() {
        let readings = vec![
            Reading::new().with("state", "quiet"),
            Reading::new().with("state", "loud"),
            Reading::new().with("state", "moderate"),
        ];
        assert_eq!(
            average_record(&readings).get("state"),
            Some(&FieldValue::from("moderate"))
        );
    }

    #[test]
    fn test_average_record_missing_in_last_reading_is_null() {
        let readings = vec![
            Reading::new().with("state", "quiet"),
            Reading::new().with("analog", 3),
        ];
        assert_eq!(
            average_record(&readings).get("state"),
            Some(&FieldValue::Other(Value::Null))
        );
    }

    #[test]
    fn test_raw_to_level_bounds() {
        assert_eq!(raw_to_level(120.0, 120.0, 1023.0), 40.0);
        assert_eq!(raw_to_level(1023.0, 120.0, 1023.0), 58.06);

        for v in [raw_to_level(120.0, 120.0, 1023.0), raw_to_level(1023.0, 120.0, 1023.0)] {
            assert!(v.is_finite());
            assert_eq!(v, round2(v));
        }
    }

    #[test]
    fn test_raw_to_level_clamps() {
        assert_eq!(raw_to_level(-500.0, 120.0, 1023.0), 40.0);
        assert_eq!(raw_to_level(5000.0, 120.0, 1023.0), 58.06);
    }

    #[test]
    fn test_raw_to_level_monotonic() {
        let mut previous = f64::MIN;
        for raw in (0..=1100).step_by(7) {
            let level = raw_to_level(raw as f64, 120.0, 1023.0);
            assert!(level >= previous, "level dropped at raw={raw}");
            previous = level;
        }
    }

    #[test]
    fn test_raw_to_level_midpoint() {
        // normalized 0.5 -> 40 + 60 * log10(1.5) = 50.565..
        assert_eq!(raw_to_level(571.5, 120.0, 1023.0), 50.57);
    }

    #[test]
    fn test_raw_to_level_degenerate_range() {
        assert_eq!(raw_to_level(500.0, 100.0, 100.0), LEVEL_FLOOR);
        assert_eq!(raw_to_level(f64::NAN, 120.0, 1023.0), LEVEL_FLOOR);
    }

    #[test]
    fn test_level_scale_validation() {
        assert!(LevelScale::new(0.0, 1.0).is_ok());
        assert!(LevelScale::new(1.0, 1.0).is_err());
        assert!(LevelScale::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_compute_aggregate() {
        let now = Utc::now();
        let contents = WindowContents {
            readings: vec![analog(10), analog(20), analog(30)],
            last_timestamp: Some(now),
        };

        let result = compute_aggregate(&contents, "analog", None).unwrap().unwrap();
        assert_eq!(result.value, 20.0);
        assert_eq!(result.samples, 3);
        assert_eq!(result.timestamp, Some(now));
        assert_eq!(result.level, None);

        let scale = LevelScale::default();
        let result = compute_aggregate(&contents, "analog", Some(&scale))
            .unwrap()
            .unwrap();
        assert_eq!(result.level, Some(40.0));
    }

    #[test]
    fn test_compute_aggregate_empty_window() {
        let contents = WindowContents::default();
        assert_eq!(compute_aggregate(&contents, "analog", None), Ok(None));
    }

    #[test]
    fn test_compute_aggregate_overflow() {
        let contents = WindowContents {
            readings: vec![analog(f64::MAX), analog(f64::MAX), analog(-f64::MAX)],
            last_timestamp: Some(Utc::now()),
        };
        assert!(matches!(
            compute_aggregate(&contents, "analog", None),
            Err(AggregateError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_latest_aggregate_replace() {
        let latest = LatestAggregate::new();
        assert!(latest.get().is_none());

        let first = AggregateResult {
            value: 1.0,
            samples: 1,
            timestamp: None,
            level: None,
        };
        latest.publish(first.clone());
        assert_eq!(latest.get(), Some(first));

        let second = AggregateResult {
            value: 2.0,
            samples: 4,
            timestamp: Some(Utc::now()),
            level: Some(40.0),
        };
        latest.clone().publish(second.clone());
        assert_eq!(latest.get(), Some(second));
    }

    #[test]
    fn test_aggregate_result_json() {
        let result = AggregateResult {
            value: 20.0,
            samples: 3,
            timestamp: None,
            level: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"value": 20.0, "samples": 3, "timestamp": null}));
    }
}
