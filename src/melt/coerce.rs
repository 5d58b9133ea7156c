//! Conversion of resolved values to declared column types.
//!
//! Path resolution is type-agnostic; this is the only place a value's type
//! matters. Timestamps accept RFC 3339, plain ISO dates/datetimes and the
//! HL7 `TS` form CCDA documents use (`20240301083000-0500`).

use crate::error::CoercionError;
use crate::melt::types::Cell;
use crate::schema::TargetType;
use crate::value::{Scalar, Value};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static NUMERIC_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").unwrap()
});

// YYYY[MM[DD[HH[MM[SS[.S{1,4}]]]]]][+/-ZZZZ]
static HL7_TS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})(\d{2})?(\d{2})?(\d{2})?(\d{2})?(\d{2})?(?:\.(\d{1,4}))?([+-]\d{4})?$")
        .unwrap()
});

const ISO_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Coerce `value` to `target`. `Null` always coerces to [`Cell::Null`].
pub fn coerce(value: &Value, target: TargetType) -> Result<Cell, CoercionError> {
    let scalar = match value {
        Value::Null => return Ok(Cell::Null),
        Value::Scalar(scalar) => scalar,
        Value::Struct(_) | Value::Array(_) => return Err(mismatch(value, target)),
    };

    let cell = match target {
        TargetType::String => Some(Cell::String(scalar.to_string())),
        TargetType::Double => to_double(scalar).map(Cell::Double),
        TargetType::Boolean => to_bool(scalar).map(Cell::Boolean),
        TargetType::Timestamp => match scalar {
            Scalar::String(s) => parse_timestamp(s).map(Cell::Timestamp),
            _ => None,
        },
    };

    cell.ok_or_else(|| mismatch(value, target))
}

fn mismatch(value: &Value, target: TargetType) -> CoercionError {
    let found = match value {
        Value::Scalar(Scalar::String(s)) => format!("string {:?}", s),
        Value::Scalar(other) => format!("{} {}", value.kind_name(), other),
        _ => value.kind_name().to_string(),
    };
    CoercionError {
        found,
        target: target.as_str(),
    }
}

fn to_double(scalar: &Scalar) -> Option<f64> {
    match scalar {
        Scalar::Int(i) => Some(*i as f64),
        Scalar::Float(x) => Some(*x),
        Scalar::String(s) => {
            let s = s.trim();
            if NUMERIC_REGEX.is_match(s) {
                s.parse().ok()
            } else {
                None
            }
        }
        Scalar::Bool(_) => None,
    }
}

fn to_bool(scalar: &Scalar) -> Option<bool> {
    match scalar {
        Scalar::Bool(b) => Some(*b),
        Scalar::Int(0) => Some(false),
        Scalar::Int(1) => Some(true),
        Scalar::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parse the timestamp spellings seen in clinical documents, as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ISO_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    parse_hl7_ts(raw)
}

fn parse_hl7_ts(raw: &str) -> Option<DateTime<Utc>> {
    let caps = HL7_TS_REGEX.captures(raw)?;
    let part = |idx: usize, default: u32| -> Option<u32> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };

    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, part(2, 1)?, part(3, 1)?)?;

    let nanos = match caps.get(7) {
        Some(frac) => {
            let digits = frac.as_str();
            digits.parse::<u32>().ok()? * 10u32.pow(9 - digits.len() as u32)
        }
        None => 0,
    };
    let time = NaiveTime::from_hms_nano_opt(part(4, 0)?, part(5, 0)?, part(6, 0)?, nanos)?;
    let naive = date.and_time(time);

    match caps.get(8) {
        Some(offset) => {
            let raw = offset.as_str();
            let sign = if raw.starts_with('-') { -1 } else { 1 };
            let hours: i32 = raw[1..3].parse().ok()?;
            let minutes: i32 = raw[3..5].parse().ok()?;
            let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?;
            let local = offset.from_local_datetime(&naive).single()?;
            Some(local.with_timezone(&Utc))
        }
        None => Some(Utc.from_utc_datetime(&naive)),
    }
}
