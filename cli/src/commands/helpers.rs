use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, Utc};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use innerscan_core::models::Trend;

/// Parse a sync boundary: `YYYY-MM-DD` (UTC midnight), RFC 3339, or today/yesterday.
pub(crate) fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    let today = Utc::now().date_naive();
    let date = match s {
        "today" => today,
        "yesterday" => today - Duration::days(1),
        _ => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(ts.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD, RFC 3339 or today/yesterday")
            })?
        }
    };
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

pub(crate) fn format_local(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

pub(crate) fn print_trend_table(trend: &Trend) {
    #[derive(Tabled)]
    struct TrendRow {
        #[tabled(rename = "Measured")]
        measured: String,
        #[tabled(rename = "Weight (kg)")]
        weight: String,
        #[tabled(rename = "Fat (%)")]
        fat: String,
        #[tabled(rename = "Muscle (kg)")]
        muscle_mass: String,
        #[tabled(rename = "Muscle score")]
        muscle_score: String,
        #[tabled(rename = "Visceral fat")]
        visceral_fat_level: String,
        #[tabled(rename = "BMR (kcal)")]
        basal_metabolic_rate: String,
        #[tabled(rename = "Body age")]
        body_age: String,
        #[tabled(rename = "Bone (kg)")]
        bone_mass: String,
    }

    let rows: Vec<TrendRow> = (0..trend.len())
        .map(|i| TrendRow {
            measured: DateTime::from_timestamp(trend.timestamps[i], 0)
                .map(|ts| format_local(&ts))
                .unwrap_or_else(|| trend.datetime[i].clone()),
            weight: format!("{:.1}", trend.weight[i]),
            fat: format!("{:.1}", trend.fat[i]),
            muscle_mass: format!("{:.1}", trend.muscle_mass[i]),
            muscle_score: format!("{}", trend.muscle_score[i]),
            visceral_fat_level: format!("{:.1}", trend.visceral_fat_level[i]),
            basal_metabolic_rate: format!("{:.0}", trend.basal_metabolic_rate[i]),
            body_age: format!("{}", trend.body_age[i]),
            bone_mass: format!("{:.1}", trend.bone_mass[i]),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

/// Change between the first and last value of a series.
pub(crate) fn delta(series: &[f64]) -> Option<f64> {
    match (series.first(), series.last()) {
        (Some(first), Some(last)) if series.len() > 1 => Some(last - first),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_instant_date() {
        assert_eq!(
            parse_instant("2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_instant_rfc3339() {
        assert_eq!(
            parse_instant("2024-03-01T07:30:00+09:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 22, 30, 0).unwrap()
        );
        assert_eq!(
            parse_instant("2024-03-01T12:00:00Z").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_instant_relative() {
        let today = Utc::now().date_naive();
        let parsed = parse_instant("yesterday").unwrap();
        assert_eq!(parsed.date_naive(), today - Duration::days(1));
        assert_eq!(parse_instant("today").unwrap().date_naive(), today);
    }

    #[test]
    fn test_parse_instant_invalid() {
        assert!(parse_instant("03/01/2024").is_err());
        assert!(parse_instant("2024-13-01").is_err());
        assert!(parse_instant("").is_err());
    }

    #[test]
    fn test_delta() {
        assert_eq!(delta(&[]), None);
        assert_eq!(delta(&[62.0]), None);
        let d = delta(&[63.0, 62.4, 62.5]).unwrap();
        assert!((d + 0.5).abs() < 1e-9);
    }
}
