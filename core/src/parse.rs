use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use scraper::{Html, Selector};

use crate::error::SyncError;
use crate::models::{ParsedRecord, RawFieldValue};
use crate::portal::jst;

const DATE_FORMAT: &str = "%Y年%m月%d日 %H:%M";

static RECORD_MARKER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".icoTime").expect("valid selector"));
static HIDDEN_INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"input[type="hidden"]"#).expect("valid selector"));

/// Turns a data page into measurement records.
pub trait RecordExtractor {
    /// Records in document order.
    fn extract(&self, html: &str, fetch_date: DateTime<Utc>) -> Result<Vec<ParsedRecord>, SyncError>;
}

/// Reads the hidden `innerscanBean[i]…` form fields of the innerscan page.
///
/// One `.icoTime` element is rendered per measurement; record `i` carries its
/// JST date/time in `innerscanBean[i].measurementDateF`/`TimeHH`/`TimeMM`, the
/// number of data points in `innerscanBean[i].size`, and point `j` in
/// `innerscanBean[i][j].tagName`/`keyData`/`dataUnit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HiddenFormExtractor;

struct HiddenFields(HashMap<String, String>);

impl HiddenFields {
    fn collect(doc: &Html) -> Self {
        let mut fields = HashMap::new();
        for input in doc.select(&HIDDEN_INPUT) {
            let (Some(name), Some(value)) = (input.attr("name"), input.attr("value")) else {
                continue;
            };
            // First occurrence wins, as with querySelector.
            fields
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
        Self(fields)
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn require(&self, name: &str) -> Result<&str, SyncError> {
        self.get(name)
            .ok_or_else(|| SyncError::parse(format!("missing hidden field `{name}`")))
    }
}

fn record_date(fields: &HiddenFields, i: usize) -> Result<DateTime<Utc>, SyncError> {
    let date = fields.require(&format!("innerscanBean[{i}].measurementDateF"))?;
    let hour = fields.require(&format!("innerscanBean[{i}].measurementTimeHH"))?;
    let minute = fields.require(&format!("innerscanBean[{i}].measurementTimeMM"))?;

    let local = format!("{date} {hour}:{minute}");
    let naive = NaiveDateTime::parse_from_str(&local, DATE_FORMAT)
        .map_err(|e| SyncError::parse(format!("bad measurement time `{local}`: {e}")))?;
    jst()
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| SyncError::parse(format!("ambiguous measurement time `{local}`")))
}

fn data_points(
    fields: &HiddenFields,
    i: usize,
) -> Result<BTreeMap<String, RawFieldValue>, SyncError> {
    let size = fields
        .require(&format!("innerscanBean[{i}].size"))?
        .trim()
        .parse::<usize>()
        .unwrap_or(0);

    let mut data = BTreeMap::new();
    for j in 0..size {
        let prefix = format!("innerscanBean[{i}][{j}]");
        let label = fields.get(&format!("{prefix}.tagName"));
        let value = fields.get(&format!("{prefix}.keyData"));
        let (Some(label), Some(value)) = (label, value) else {
            return Err(SyncError::parse(format!("missing label or value for `{prefix}`")));
        };
        let unit = fields
            .get(&format!("{prefix}.dataUnit"))
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        data.insert(
            label.to_string(),
            RawFieldValue {
                value: value.to_string(),
                unit,
            },
        );
    }
    Ok(data)
}

impl RecordExtractor for HiddenFormExtractor {
    fn extract(&self, html: &str, fetch_date: DateTime<Utc>) -> Result<Vec<ParsedRecord>, SyncError> {
        let doc = Html::parse_document(html);
        let count = doc.select(&RECORD_MARKER).count();
        let fields = HiddenFields::collect(&doc);

        (0..count)
            .map(|i| {
                Ok(ParsedRecord {
                    record_date: record_date(&fields, i)?,
                    fetch_date,
                    data: data_points(&fields, i)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::fmt::Write;

    /// One measurement block as the portal renders it.
    pub(crate) struct Block<'a> {
        pub(crate) date: &'a str,
        pub(crate) hour: &'a str,
        pub(crate) minute: &'a str,
        pub(crate) points: Vec<(&'a str, &'a str, Option<&'a str>)>,
    }

    fn hidden(out: &mut String, name: &str, value: &str) {
        let _ = writeln!(out, r#"<input type="hidden" name="{name}" value="{value}">"#);
    }

    pub(crate) fn page(blocks: &[Block<'_>]) -> String {
        let mut out = String::from(
            "<html><body><span id=\"userName\">たろう</span><form name=\"innerscanForm\">\n",
        );
        for (i, b) in blocks.iter().enumerate() {
            let _ = writeln!(out, r#"<p><span class="icoTime"></span>{}</p>"#, b.date);
            hidden(&mut out, &format!("innerscanBean[{i}].measurementDateF"), b.date);
            hidden(&mut out, &format!("innerscanBean[{i}].measurementTimeHH"), b.hour);
            hidden(&mut out, &format!("innerscanBean[{i}].measurementTimeMM"), b.minute);
            hidden(
                &mut out,
                &format!("innerscanBean[{i}].size"),
                &b.points.len().to_string(),
            );
            for (j, (label, value, unit)) in b.points.iter().enumerate() {
                hidden(&mut out, &format!("innerscanBean[{i}][{j}].tagName"), label);
                hidden(&mut out, &format!("innerscanBean[{i}][{j}].keyData"), value);
                if let Some(unit) = unit {
                    hidden(&mut out, &format!("innerscanBean[{i}][{j}].dataUnit"), unit);
                }
            }
        }
        out.push_str("</form></body></html>");
        out
    }

    pub(crate) fn full_points<'a>(weight: &'a str) -> Vec<(&'a str, &'a str, Option<&'a str>)> {
        vec![
            ("体重", weight, Some("kg")),
            ("体脂肪率", "18.2", Some("%")),
            ("筋肉量", "48.3", Some("kg")),
            ("筋肉スコア", "1", Some("")),
            ("内臓脂肪レベル", "7.5", None),
            ("基礎代謝量", "1480", Some("kcal")),
            ("体内年齢", "31", Some("才")),
            ("推定骨量", "2.7", Some("kg")),
        ]
    }
}
