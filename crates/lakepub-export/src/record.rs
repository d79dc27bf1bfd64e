//! Expense record as served by the record service
//!
//! Decoding is lenient per field: a record with an unknown status or an
//! unparseable date still decodes, it just never matches the selection.
//! Only a payload that is not a list of objects with ids is a decode error.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Business status of an expense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Approved,
    Rejected,
}

impl Status {
    /// Parse status from its name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Parse the exact wire spelling; `approved` is not `Approved`
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.as_str() == name)
    }

    /// Wire/artifact spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }

    pub fn all() -> &'static [Status] {
        &[Self::Pending, Self::Approved, Self::Rejected]
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One expense document.
///
/// `exported` is the only field the pipeline ever changes, and only through
/// the record service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawRecord")]
pub struct Record {
    pub id: String,
    pub title: String,
    pub comment: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: Option<Status>,
    pub attachment: Option<String>,
    pub exported: bool,
}

/// Wire shape. The document store sends `_id`, its `id` virtual may be
/// serialized next to it.
#[derive(Deserialize)]
struct RawRecord {
    #[serde(default, rename = "_id")]
    mongo_id: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, deserialize_with = "de_text")]
    title: String,
    #[serde(default, deserialize_with = "de_opt_text")]
    comment: Option<String>,
    #[serde(default, rename = "startDate", deserialize_with = "de_opt_timestamp")]
    start_date: Option<DateTime<Utc>>,
    #[serde(default, rename = "endDate", deserialize_with = "de_opt_timestamp")]
    end_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_status")]
    status: Option<Status>,
    #[serde(default, deserialize_with = "de_opt_text")]
    attachment: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    exported: bool,
}

impl TryFrom<RawRecord> for Record {
    type Error = String;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let id = raw
            .mongo_id
            .as_ref()
            .and_then(id_from_value)
            .or_else(|| raw.id.as_ref().and_then(id_from_value))
            .ok_or_else(|| {
                let shown = raw.mongo_id.or(raw.id).unwrap_or(Value::Null);
                format!("unusable record id: {shown}")
            })?;
        Ok(Self {
            id,
            title: raw.title,
            comment: raw.comment,
            start_date: raw.start_date,
            end_date: raw.end_date,
            status: raw.status,
            attachment: raw.attachment,
            exported: raw.exported,
        })
    }
}

impl Record {
    /// Minimal record (pending, not exported); tests and fakes fill in the rest
    pub fn new(id: impl Into<String>, title: impl Into<String>, start_date: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            comment: None,
            start_date: Some(start_date),
            end_date: None,
            status: Some(Status::Pending),
            attachment: None,
            exported: false,
        }
    }
}

/// Decode a record-list payload
pub fn decode_records(body: &[u8]) -> Result<Vec<Record>, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Parse the timestamp spellings the document store emits.
///
/// RFC 3339 (`2024-03-01T00:00:00.000Z`), naive date-times (taken as UTC)
/// and bare dates (midnight UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        // Extended JSON: {"$date": "..."} or {"$date": {"$numberLong": "..."}}
        Value::Object(map) => match map.get("$date")? {
            Value::Object(inner) => inner
                .get("$numberLong")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .and_then(DateTime::from_timestamp_millis),
            other => timestamp_from_value(other),
        },
        _ => None,
    }
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(timestamp_from_value))
}

fn id_from_value(value: &Value) -> Option<String> {
    let id = match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("$oid").and_then(Value::as_str).map(String::from),
        _ => None,
    };
    id.filter(|id| !id.is_empty())
}

fn de_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(de_opt_text(deserializer)?.unwrap_or_default())
}

fn de_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

fn de_status<'de, D>(deserializer: D) -> Result<Option<Status>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(Value::as_str).and_then(Status::from_wire))
}

fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}
