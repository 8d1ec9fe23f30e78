use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A loosely-typed cell value. Dates travel as `YYYY-MM-DD` text.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().replace(',', "").parse().ok(),
            _ => None,
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) if is_integral(*n) => Value::from(*n as i64),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

fn is_integral(n: f64) -> bool {
    n.fract() == 0.0 && n.abs() < 1e15
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if is_integral(*n) => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordStatus {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

impl RecordStatus {
    /// Reads the server's boolean-ish status flag. Anything unrecognized is
    /// `Unknown` rather than an error.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(true) => Self::Valid,
            Value::Bool(false) => Self::Invalid,
            Value::Number(n) => match n.as_f64() {
                Some(v) if v == 0.0 => Self::Invalid,
                Some(_) => Self::Valid,
                None => Self::Unknown,
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "valid" | "true" | "1" | "success" | "ok" => Self::Valid,
                "invalid" | "false" | "0" | "error" | "failed" => Self::Invalid,
                _ => Self::Unknown,
            },
            _ => Self::Unknown,
        }
    }

    fn to_json(self) -> Value {
        match self {
            Self::Unknown => Value::Null,
            Self::Valid => Value::Bool(true),
            Self::Invalid => Value::Bool(false),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unverified",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }
}

pub const SR_NO: &str = "srNo";
pub const STATUS: &str = "status";
pub const MESSAGE: &str = "message";

/// One row of an upload, or one entity returned by the server.
///
/// Fields keep their insertion order. `sr_no`, `status` and `message` form
/// the envelope every record carries regardless of its import kind; on the
/// wire they are flattened in beside the fields as `srNo`, `status` and
/// `message`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub sr_no: u32,
    pub status: RecordStatus,
    pub message: String,
    fields: Vec<(String, Scalar)>,
}

impl Record {
    pub fn new(sr_no: u32) -> Self {
        Self {
            sr_no,
            ..Self::default()
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Scalar>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Scalar>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Field rendered as text; `None` when missing or blank.
    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name)
            .filter(|v| !v.is_blank())
            .map(|v| v.to_string().trim().to_string())
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Scalar::as_f64)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Drops verification results, leaving the fields alone.
    pub fn reset_status(&mut self) {
        self.status = RecordStatus::Unknown;
        self.message.clear();
    }

    pub fn from_json_object(map: &Map<String, Value>) -> Self {
        let mut record = Record::default();
        for (key, value) in map {
            match key.as_str() {
                SR_NO => record.sr_no = parse_sr_no(value).unwrap_or(0),
                STATUS => record.status = RecordStatus::from_json(value),
                MESSAGE => {
                    record.message = match value {
                        Value::String(s) => s.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    }
                }
                _ => record.fields.push((key.clone(), Scalar::from_json(value))),
            }
        }
        record
    }

    /// Whether the object carried an explicit `srNo`.
    pub fn json_has_sr_no(map: &Map<String, Value>) -> bool {
        map.get(SR_NO).and_then(parse_sr_no).is_some()
    }
}

fn parse_sr_no(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 3))?;
        map.serialize_entry(SR_NO, &self.sr_no)?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, &v.to_json())?;
        }
        map.serialize_entry(STATUS, &self.status.to_json())?;
        map.serialize_entry(MESSAGE, &self.message)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Record::from_json_object(&map))
    }
}
