use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// A value exactly as it appears in the page's hidden form fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFieldValue {
    pub value: String,
    pub unit: Option<String>,
}

/// One measurement event scraped from a page, before typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub record_date: DateTime<Utc>,
    pub fetch_date: DateTime<Utc>,
    pub data: BTreeMap<String, RawFieldValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub record_date: DateTime<Utc>,
    pub fetch_date: DateTime<Utc>,
    pub weight: Measurement,
    pub fat: Measurement,
    pub muscle_mass: Measurement,
    pub muscle_score: Measurement,
    pub visceral_fat_level: Measurement,
    pub basal_metabolic_rate: Measurement,
    pub body_age: Measurement,
    pub bone_mass: Measurement,
}

// Labels as rendered by the portal.
pub const LABEL_WEIGHT: &str = "体重";
pub const LABEL_FAT: &str = "体脂肪率";
pub const LABEL_MUSCLE_MASS: &str = "筋肉量";
pub const LABEL_MUSCLE_SCORE: &str = "筋肉スコア";
pub const LABEL_VISCERAL_FAT_LEVEL: &str = "内臓脂肪レベル";
pub const LABEL_BASAL_METABOLIC_RATE: &str = "基礎代謝量";
pub const LABEL_BODY_AGE: &str = "体内年齢";
pub const LABEL_BONE_MASS: &str = "推定骨量";

pub const REQUIRED_LABELS: [&str; 8] = [
    LABEL_WEIGHT,
    LABEL_FAT,
    LABEL_MUSCLE_MASS,
    LABEL_MUSCLE_SCORE,
    LABEL_VISCERAL_FAT_LEVEL,
    LABEL_BASAL_METABOLIC_RATE,
    LABEL_BODY_AGE,
    LABEL_BONE_MASS,
];

fn measurement(data: &BTreeMap<String, RawFieldValue>, label: &str) -> Result<Measurement, SyncError> {
    let raw = data.get(label).ok_or_else(|| SyncError::Mapping {
        label: label.to_string(),
    })?;
    let value: f64 = raw.value.trim().parse().map_err(|_| SyncError::Mapping {
        label: label.to_string(),
    })?;
    if !value.is_finite() {
        return Err(SyncError::Mapping {
            label: label.to_string(),
        });
    }
    Ok(Measurement {
        value,
        unit: raw.unit.clone(),
    })
}

impl TryFrom<&ParsedRecord> for MeasurementRecord {
    type Error = SyncError;

    fn try_from(parsed: &ParsedRecord) -> Result<Self, Self::Error> {
        let data = &parsed.data;
        Ok(MeasurementRecord {
            record_date: parsed.record_date,
            fetch_date: parsed.fetch_date,
            weight: measurement(data, LABEL_WEIGHT)?,
            fat: measurement(data, LABEL_FAT)?,
            muscle_mass: measurement(data, LABEL_MUSCLE_MASS)?,
            muscle_score: measurement(data, LABEL_MUSCLE_SCORE)?,
            visceral_fat_level: measurement(data, LABEL_VISCERAL_FAT_LEVEL)?,
            basal_metabolic_rate: measurement(data, LABEL_BASAL_METABOLIC_RATE)?,
            body_age: measurement(data, LABEL_BODY_AGE)?,
            bone_mass: measurement(data, LABEL_BONE_MASS)?,
        })
    }
}

/// Storage key and wire format for timestamps: ISO-8601, UTC, millisecond precision.
#[must_use]
pub fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Records laid out as parallel arrays, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub timestamps: Vec<i64>,
    pub datetime: Vec<String>,
    pub weight: Vec<f64>,
    pub fat: Vec<f64>,
    pub muscle_mass: Vec<f64>,
    pub muscle_score: Vec<f64>,
    pub visceral_fat_level: Vec<f64>,
    pub basal_metabolic_rate: Vec<f64>,
    pub body_age: Vec<f64>,
    pub bone_mass: Vec<f64>,
}

impl Trend {
    #[must_use]
    pub fn from_records(records: &[MeasurementRecord]) -> Self {
        let mut sorted: Vec<&MeasurementRecord> = records.iter().collect();
        sorted.sort_by_key(|r| r.record_date);

        let mut trend = Trend::default();
        for r in sorted {
            trend.timestamps.push(r.record_date.timestamp());
            trend.datetime.push(iso_timestamp(&r.record_date));
            trend.weight.push(r.weight.value);
            trend.fat.push(r.fat.value);
            trend.muscle_mass.push(r.muscle_mass.value);
            trend.muscle_score.push(r.muscle_score.value);
            trend.visceral_fat_level.push(r.visceral_fat_level.value);
            trend.basal_metabolic_rate.push(r.basal_metabolic_rate.value);
            trend.body_age.push(r.body_age.value);
            trend.bone_mass.push(r.bone_mass.value);
        }
        trend
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Outcome of one synchronization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub days_fetched: u32,
    pub records_written: usize,
    pub watermark: Option<DateTime<Utc>>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn raw(value: &str, unit: Option<&str>) -> RawFieldValue {
        RawFieldValue {
            value: value.to_string(),
            unit: unit.map(str::to_string),
        }
    }

    pub(crate) fn full_data() -> BTreeMap<String, RawFieldValue> {
        let mut data = BTreeMap::new();
        data.insert(LABEL_WEIGHT.to_string(), raw("62.5", Some("kg")));
        data.insert(LABEL_FAT.to_string(), raw("18.2", Some("%")));
        data.insert(LABEL_MUSCLE_MASS.to_string(), raw("48.3", Some("kg")));
        data.insert(LABEL_MUSCLE_SCORE.to_string(), raw("1", None));
        data.insert(LABEL_VISCERAL_FAT_LEVEL.to_string(), raw("7.5", Some("レベル")));
        data.insert(LABEL_BASAL_METABOLIC_RATE.to_string(), raw("1480", Some("kcal")));
        data.insert(LABEL_BODY_AGE.to_string(), raw("31", Some("才")));
        data.insert(LABEL_BONE_MASS.to_string(), raw("2.7", Some("kg")));
        data
    }

    pub(crate) fn parsed_at(record_date: DateTime<Utc>) -> ParsedRecord {
        ParsedRecord {
            record_date,
            fetch_date: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
            data: full_data(),
        }
    }

    pub(crate) fn record(record_date: DateTime<Utc>, weight: f64) -> MeasurementRecord {
        let mut r = MeasurementRecord::try_from(&parsed_at(record_date)).unwrap();
        r.weight.value = weight;
        r
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_mapping_complete_record() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 22, 15, 0).unwrap();
        let parsed = parsed_at(date);
        let record = MeasurementRecord::try_from(&parsed).unwrap();

        assert_eq!(record.record_date, date);
        assert_eq!(record.fetch_date, parsed.fetch_date);
        assert!((record.weight.value - 62.5).abs() < f64::EPSILON);
        assert_eq!(record.weight.unit.as_deref(), Some("kg"));
        assert!((record.fat.value - 18.2).abs() < f64::EPSILON);
        assert!((record.muscle_score.value - 1.0).abs() < f64::EPSILON);
        assert!(record.muscle_score.unit.is_none());
        assert!((record.basal_metabolic_rate.value - 1480.0).abs() < f64::EPSILON);
        assert!((record.body_age.value - 31.0).abs() < f64::EPSILON);
        assert!((record.bone_mass.value - 2.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mapping_fails_for_each_missing_label() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 22, 15, 0).unwrap();
        for label in REQUIRED_LABELS {
            let mut parsed = parsed_at(date);
            parsed.data.remove(label);
            match MeasurementRecord::try_from(&parsed) {
                Err(SyncError::Mapping { label: missing }) => assert_eq!(missing, label),
                other => panic!("expected mapping error for {label}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_mapping_rejects_non_numeric_value() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 22, 15, 0).unwrap();
        let mut parsed = parsed_at(date);
        parsed
            .data
            .insert(LABEL_FAT.to_string(), raw("--.-", Some("%")));
        assert!(matches!(
            MeasurementRecord::try_from(&parsed),
            Err(SyncError::Mapping { ref label }) if label == LABEL_FAT
        ));
    }

    #[test]
    fn test_mapping_ignores_extra_labels() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 22, 15, 0).unwrap();
        let mut parsed = parsed_at(date);
        parsed
            .data
            .insert("体水分率".to_string(), raw("55.0", Some("%")));
        assert!(MeasurementRecord::try_from(&parsed).is_ok());
    }

    #[test]
    fn test_iso_timestamp_uses_millis_and_z() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 22, 15, 0).unwrap();
        assert_eq!(iso_timestamp(&date), "2024-03-01T22:15:00.000Z");
    }

    #[test]
    fn test_trend_is_chronological() {
        let later = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let trend = Trend::from_records(&[record(later, 61.0), record(earlier, 62.0)]);

        assert_eq!(trend.len(), 2);
        assert_eq!(trend.timestamps, vec![earlier.timestamp(), later.timestamp()]);
        assert_eq!(trend.weight, vec![62.0, 61.0]);
        assert_eq!(trend.datetime[0], "2024-03-01T08:00:00.000Z");
    }

    #[test]
    fn test_trend_serializes_camel_case() {
        let trend = Trend::default();
        let json = serde_json::to_value(&trend).unwrap();
        assert!(json.get("muscleMass").is_some());
        assert!(json.get("basalMetabolicRate").is_some());
        assert!(json.get("visceralFatLevel").is_some());
    }
}
