use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque key for one scannable jurisdiction on the provider (e.g. `tennessee`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// One inspection record as the provider returns it.
///
/// Every field is optional: the provider drops and reshapes fields freely, so
/// all validation happens in the normalizer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "permitID", default)]
    pub permit_id: Option<Value>,
    #[serde(rename = "establishmentName", default)]
    pub establishment_name: Option<Value>,
    #[serde(rename = "addressLine1", default)]
    pub address_line1: Option<Value>,
    #[serde(rename = "permitType", default)]
    pub permit_type: Option<Category>,
    #[serde(rename = "inspectionDate", default)]
    pub inspection_date: Option<Value>,
    #[serde(default)]
    pub score: Option<Value>,
    #[serde(default)]
    pub purpose: Option<Value>,
}

/// Establishment category as sent by the provider: a single value or a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    Single(String),
    Multiple(Vec<String>),
}

impl Category {
    /// Flattens the category into its stored form (`"A, B"` for lists).
    pub fn flatten(&self) -> String {
        match self {
            Category::Single(value) => value.trim().to_string(),
            Category::Multiple(values) => values.join(", ").trim().to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Array(items) => Category::Multiple(items.into_iter().map(scalar_text).collect()),
            other => Category::Single(scalar_text(other)),
        })
    }
}

/// Text form of a scalar provider value; null becomes empty.
pub(crate) fn scalar_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Canonical record produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub establishment_id: String,
    pub source: SourceId,
    pub name: String,
    pub address: String,
    pub category: String,
    pub date: NaiveDate,
    pub score: i64,
    pub purpose: String,
}

impl NormalizedRecord {
    /// Splits the record into its establishment row and inspection row.
    pub fn into_parts(self) -> (Establishment, Inspection) {
        let establishment = Establishment {
            establishment_id: self.establishment_id.clone(),
            source: self.source.clone(),
            name: self.name,
            address: self.address,
            category: self.category,
        };
        let inspection = Inspection {
            establishment_id: self.establishment_id,
            source: self.source,
            date: self.date,
            score: self.score,
            purpose: self.purpose,
        };
        (establishment, inspection)
    }
}

/// Establishment row, keyed by `(establishment_id, source)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Establishment {
    pub establishment_id: String,
    pub source: SourceId,
    pub name: String,
    pub address: String,
    pub category: String,
}

/// Inspection row. Novelty key is `(establishment_id, source, date, score)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    pub establishment_id: String,
    pub source: SourceId,
    pub date: NaiveDate,
    pub score: i64,
    pub purpose: String,
}

/// Projection of a newly stored inspection handed to downstream publishers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInspection {
    pub name: String,
    pub score: i64,
    pub date: NaiveDate,
}
