//! Typed views over classifier output.
//!
//! The parameter object is persisted exactly as the model produced it. The
//! views below decode it leniently at preview and execution time: numbers may
//! arrive as strings and datetimes in several common layouts.

use chrono::{DateTime, NaiveDateTime, Utc};
use ems_store::{ActionKind, ActionParams, EventStatus};
use serde_json::Value;
use std::fmt;

/// What the classifier decided a message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    None,
    Action(ActionKind),
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Action(kind) => kind.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub reason: String,
    pub params: ActionParams,
}

impl Classification {
    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            intent: Intent::None,
            reason: reason.into(),
            params: ActionParams::new(),
        }
    }
}

/// A parameter that is present but cannot be read as the expected type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamError {
    pub field: &'static str,
    pub raw: String,
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I couldn't understand the {} value '{}'.", self.field, self.raw)
    }
}

impl std::error::Error for ParamError {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateEventArgs {
    pub title: Option<String>,
    pub venue_name: Option<String>,
    pub venue_type: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub capacity: Option<i64>,
    pub ticket_price_cents: Option<i64>,
    pub description: Option<String>,
    pub status: Option<EventStatus>,
}

impl CreateEventArgs {
    pub fn from_params(params: &ActionParams) -> Result<Self, ParamError> {
        let status = match text(params, &["status"]) {
            Some(raw) => Some(raw.parse::<EventStatus>().map_err(|_| ParamError {
                field: "status",
                raw,
            })?),
            None => None,
        };
        Ok(Self {
            title: text(params, &["title"]),
            venue_name: text(params, &["venue_name", "venue"]),
            venue_type: text(params, &["type", "venue_type"]),
            start: datetime(params, "start", &["start", "start_time"])?,
            end: datetime(params, "end", &["end", "end_time"])?,
            capacity: integer(params, "capacity")?,
            ticket_price_cents: decimal(params, "ticket_price")?.map(dollars_to_cents),
            description: text(params, &["description"]),
            status,
        })
    }
}

/// Target of a delete or update: a numeric id or an exact title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRef {
    pub identifier: Option<String>,
}

impl EventRef {
    pub fn from_params(params: &ActionParams) -> Self {
        Self {
            identifier: text(params, &["identifier", "event_id"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelBookingArgs {
    pub booking_id: Option<i64>,
}

impl CancelBookingArgs {
    pub fn from_params(params: &ActionParams) -> Result<Self, ParamError> {
        Ok(Self {
            booking_id: integer(params, "booking_id")?.filter(|id| *id > 0),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateVenueArgs {
    pub name: Option<String>,
    pub address: Option<String>,
    pub capacity: Option<String>,
    pub venue_type: Option<String>,
}

impl CreateVenueArgs {
    pub fn from_params(params: &ActionParams) -> Self {
        Self {
            name: text(params, &["name", "venue_name"]),
            address: text(params, &["address"]),
            capacity: text(params, &["capacity"]),
            venue_type: text(params, &["type", "venue_type"]),
        }
    }
}

/// First non-empty scalar among `keys`, rendered as text.
pub fn text(params: &ActionParams, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match params.get(*key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    })
}

fn integer(params: &ActionParams, field: &'static str) -> Result<Option<i64>, ParamError> {
    let invalid = |raw: String| ParamError { field, raw };
    match params.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) => Ok(Some(v)),
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
                _ => Err(invalid(n.to_string())),
            },
        },
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim().trim_start_matches('#');
            trimmed
                .parse::<i64>()
                .map(Some)
                .map_err(|_| invalid(s.clone()))
        }
        Some(other) => Err(invalid(other.to_string())),
    }
}

fn decimal(params: &ActionParams, field: &'static str) -> Result<Option<f64>, ParamError> {
    let invalid = |raw: String| ParamError { field, raw };
    let value = match params.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| invalid(n.to_string()))?,
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .trim_start_matches('$')
            .parse::<f64>()
            .map_err(|_| invalid(s.clone()))?,
        Some(other) => return Err(invalid(other.to_string())),
    };
    if value.is_finite() {
        Ok(Some(value))
    } else {
        Err(invalid(value.to_string()))
    }
}

fn datetime(
    params: &ActionParams,
    field: &'static str,
    keys: &[&str],
) -> Result<Option<DateTime<Utc>>, ParamError> {
    match text(params, keys) {
        None => Ok(None),
        Some(raw) => parse_datetime(&raw)
            .map(Some)
            .ok_or(ParamError { field, raw }),
    }
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parses RFC 3339 or a naive `YYYY-MM-DD HH:MM[:SS]` (space or `T`),
/// reading naive values as UTC.
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn dollars_to_cents(dollars: f64) -> i64 {
    (dollars * 100.0).round() as i64
}
