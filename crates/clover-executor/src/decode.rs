//! Conversion of Postgres rows into JSON values.

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Value, json};
use sqlx::postgres::types::{PgInterval, PgMoney, PgTimeTz};
use sqlx::postgres::{PgRow, PgTypeKind, PgValueFormat};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::fmt::Write as _;
use uuid::Uuid;

/// Column names of a row, in order.
pub fn column_names(row: &PgRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Values of a row, in column order. Types without a JSON mapping come back
/// as their text form when the server sent one, or as a placeholder string
/// naming the type. Only SQL `NULL` becomes `null`.
pub fn row_values(row: &PgRow) -> Vec<Value> {
    (0..row.len()).map(|i| decode_value(row, i)).collect()
}

fn decode_value(row: &PgRow, index: usize) -> Value {
    // NULL decodes as Ok(None) on the first attempt regardless of type.
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<i16>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<f32>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<BigDecimal>, _>(index) {
        v.map(|d| decimal_to_json(&d)).unwrap_or(Value::Null)
    } else if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(index) {
        json!(v.map(|t| t.to_rfc3339()))
    } else if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(index) {
        json!(v.map(|t| t.to_string()))
    } else if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(index) {
        json!(v.map(|d| d.to_string()))
    } else if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(index) {
        json!(v.map(|t| t.to_string()))
    } else if let Ok(v) = row.try_get::<Option<Uuid>, _>(index) {
        json!(v.map(|u| u.to_string()))
    } else if let Ok(v) = row.try_get::<Option<Value>, _>(index) {
        v.unwrap_or(Value::Null)
    } else if let Ok(v) = row.try_get::<Option<Vec<String>>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<Vec<i64>>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<Vec<i32>>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<Vec<f64>>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<Vec<bool>>, _>(index) {
        json!(v)
    } else if let Ok(v) = row.try_get::<Option<Vec<BigDecimal>>, _>(index) {
        v.map(|ds| Value::Array(ds.iter().map(decimal_to_json).collect()))
            .unwrap_or(Value::Null)
    } else if let Ok(v) = row.try_get::<Option<Vec<Uuid>>, _>(index) {
        json!(v.map(|us| us.iter().map(Uuid::to_string).collect::<Vec<_>>()))
    } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        json!(v.map(|b| bytea_to_text(&b)))
    } else if let Ok(v) = row.try_get::<Option<PgInterval>, _>(index) {
        json!(v.map(|i| interval_to_text(&i)))
    } else if let Ok(v) = row.try_get::<Option<PgMoney>, _>(index) {
        v.map(|m| decimal_to_json(&m.to_bigdecimal(2)))
            .unwrap_or(Value::Null)
    } else if let Ok(v) = row.try_get::<Option<PgTimeTz<NaiveTime, FixedOffset>>, _>(index) {
        json!(v.map(|t| format!("{}{}", t.time, t.offset)))
    } else {
        decode_fallback(row, index)
    }
}

/// Last resort for types without a typed decoder (enums, domains over
/// unsupported types, extension types).
fn decode_fallback(row: &PgRow, index: usize) -> Value {
    let column = &row.columns()[index];
    let type_info = column.type_info();
    let text = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => match raw.format() {
            PgValueFormat::Text => raw.as_str().ok().map(str::to_string),
            // The binary form of an enum is its label.
            PgValueFormat::Binary if matches!(type_info.kind(), PgTypeKind::Enum(_)) => {
                raw.as_str().ok().map(str::to_string)
            }
            PgValueFormat::Binary => None,
        },
        Err(e) => {
            tracing::warn!(column = %column.name(), error = %e, "Column value unreadable");
            None
        }
    };
    if text.is_none() {
        tracing::debug!(
            column = %column.name(),
            pg_type = %type_info.name(),
            "No JSON mapping for column type"
        );
    }
    text_or_placeholder(text, type_info.name())
}

fn text_or_placeholder(text: Option<String>, type_name: &str) -> Value {
    match text {
        Some(text) => Value::String(text),
        None => Value::String(format!("<unsupported type {}>", type_name)),
    }
}

/// `bytea` in Postgres hex output format.
fn bytea_to_text(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(2 + bytes.len() * 2);
    text.push_str("\\x");
    for b in bytes {
        let _ = write!(text, "{:02x}", b);
    }
    text
}

/// ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`.
fn interval_to_text(interval: &PgInterval) -> String {
    let mut text = String::from("P");
    let (years, months) = (interval.months / 12, interval.months % 12);
    if years != 0 {
        let _ = write!(text, "{}Y", years);
    }
    if months != 0 {
        let _ = write!(text, "{}M", months);
    }
    if interval.days != 0 {
        let _ = write!(text, "{}D", interval.days);
    }

    let micros = interval.microseconds;
    if micros != 0 || text == "P" {
        text.push('T');
        let hours = micros / 3_600_000_000;
        let minutes = (micros % 3_600_000_000) / 60_000_000;
        let rest = micros % 60_000_000;
        if hours != 0 {
            let _ = write!(text, "{}H", hours);
        }
        if minutes != 0 {
            let _ = write!(text, "{}M", minutes);
        }
        if rest != 0 || (hours == 0 && minutes == 0) {
            let sign = if rest < 0 { "-" } else { "" };
            let rest = rest.abs();
            let (whole, frac) = (rest / 1_000_000, rest % 1_000_000);
            if frac == 0 {
                let _ = write!(text, "{}{}S", sign, whole);
            } else {
                let frac = format!("{:06}", frac);
                let _ = write!(text, "{}{}.{}S", sign, whole, frac.trim_end_matches('0'));
            }
        }
    }
    text
}

/// Numeric values become JSON numbers when they parse as one, strings
/// otherwise.
fn decimal_to_json(value: &BigDecimal) -> Value {
    let text = value.to_string();
    match text.parse::<serde_json::Number>() {
        Ok(n) => Value::Number(n),
        Err(_) => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_decimal_to_json() {
        let d = BigDecimal::from_str("1250.50").unwrap();
        assert_eq!(decimal_to_json(&d), json!(1250.5));
        let d = BigDecimal::from_str("42").unwrap();
        assert_eq!(decimal_to_json(&d), json!(42));
    }

    #[test]
    fn test_unmapped_types_never_read_as_null() {
        assert_eq!(
            text_or_placeholder(Some("(1,2)".to_string()), "point"),
            json!("(1,2)")
        );
        assert_eq!(
            text_or_placeholder(None, "tsvector"),
            json!("<unsupported type tsvector>")
        );
    }

    #[test]
    fn test_bytea_hex_format() {
        assert_eq!(bytea_to_text(&[0xde, 0xad, 0x01]), "\\xdead01");
        assert_eq!(bytea_to_text(&[]), "\\x");
    }

    #[test]
    fn test_interval_iso_8601() {
        let interval = PgInterval {
            months: 14,
            days: 3,
            microseconds: 4 * 3_600_000_000 + 5 * 60_000_000 + 6_500_000,
        };
        assert_eq!(interval_to_text(&interval), "P1Y2M3DT4H5M6.5S");

        let zero = PgInterval {
            months: 0,
            days: 0,
            microseconds: 0,
        };
        assert_eq!(interval_to_text(&zero), "PT0S");

        let days = PgInterval {
            months: 0,
            days: 7,
            microseconds: 0,
        };
        assert_eq!(interval_to_text(&days), "P7D");
    }
}
