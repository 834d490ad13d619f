//! Maps provider records onto [`NormalizedRecord`].

use chrono::NaiveDate;
use serde_json::Value;

use crate::harvest::traits::{HarvestStage, RejectReason};
use crate::model::{scalar_text, NormalizedRecord, RawRecord, SourceId};

/// Name stored when the provider omits one.
const MISSING_NAME: &str = "N/A";

/// Normalizes the records of a single source.
pub struct Normalizer {
    source: SourceId,
}

impl Normalizer {
    pub fn for_source(source: SourceId) -> Self {
        Self { source }
    }

    /// Returns `None` when the record is rejected.
    pub fn normalize(&self, raw: RawRecord) -> Option<NormalizedRecord> {
        self.execute(raw).ok()
    }
}

impl HarvestStage for Normalizer {
    type Input = RawRecord;
    type Output = NormalizedRecord;
    type Error = RejectReason;

    fn execute(&self, raw: RawRecord) -> Result<NormalizedRecord, RejectReason> {
        let establishment_id = raw
            .permit_id
            .as_ref()
            .and_then(id_text)
            .ok_or(RejectReason::MissingId)?;

        let name = field_text(raw.establishment_name).unwrap_or_else(|| MISSING_NAME.to_string());
        let address = field_text(raw.address_line1).unwrap_or_default();
        let category = raw
            .permit_type
            .as_ref()
            .map(|c| c.flatten())
            .unwrap_or_default();

        let date = parse_date(field_text(raw.inspection_date).as_deref())?;
        let score = parse_score(raw.score.as_ref())?;

        let purpose = field_text(raw.purpose).unwrap_or_default();

        Ok(NormalizedRecord {
            establishment_id,
            source: self.source.clone(),
            name,
            address,
            category,
            date,
            score,
            purpose,
        })
    }

    fn stage_name(&self) -> &'static str {
        "normalize"
    }
}

/// Trimmed text of an optional field; `None` when absent or null.
fn field_text(value: Option<Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(value) => Some(scalar_text(value).trim().to_string()),
    }
}

fn id_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Keeps the date part of an ISO timestamp (`2024-03-01T00:00:00` → `2024-03-01`).
fn parse_date(raw: Option<&str>) -> Result<NaiveDate, RejectReason> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or(RejectReason::MissingDate)?;
    let day = raw.split('T').next().unwrap_or(raw).trim();

    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|_| RejectReason::InvalidDate(raw.to_string()))
}

fn parse_score(raw: Option<&Value>) -> Result<i64, RejectReason> {
    let score = match raw {
        None | Some(Value::Null) => return Err(RejectReason::MissingScore),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| RejectReason::Malformed(format!("score {}", n)))?,
        Some(Value::String(s)) if s.trim().is_empty() => return Err(RejectReason::MissingScore),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(|f| f.round() as i64)
            .map_err(|_| RejectReason::Malformed(format!("score {:?}", s)))?,
        Some(other) => return Err(RejectReason::Malformed(format!("score {}", other))),
    };

    if score == 0 {
        return Err(RejectReason::ZeroScore);
    }
    Ok(score)
}
