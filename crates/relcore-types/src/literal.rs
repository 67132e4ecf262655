//! SQL literal generation.
//!
//! Each formatter receives a provider value (already converted) and the
//! mapping that produced it. The generic formatters follow ANSI forms; the
//! `sql_server_*` variants are installed by the SQL Server mapping table.

use chrono::{NaiveTime, Timelike};

use crate::error::TypeError;
use crate::mapping::{TypeKind, TypeMapping};
use crate::value::SqlValue;

/// Render a provider value as SQL literal text.
pub type LiteralFormatter = fn(&TypeMapping, &SqlValue) -> Result<String, TypeError>;

fn mismatch(expected: &'static str, actual: &SqlValue) -> TypeError {
    TypeError::TypeMismatch {
        expected,
        actual: actual.type_name().to_string(),
    }
}

/// Escape a string for use inside single quotes.
#[must_use]
pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// `1` / `0`.
pub fn bool_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        other => integer_literal_text(other),
    }
}

/// `CAST(1 AS bit)` / `CAST(0 AS bit)`.
pub fn sql_server_bool_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::Bool(b) => Ok(format!("CAST({} AS bit)", u8::from(*b))),
        other => Err(mismatch("bool", other)),
    }
}

/// Plain decimal digits.
pub fn integer_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    integer_literal_text(value)
}

fn integer_literal_text(value: &SqlValue) -> Result<String, TypeError> {
    value
        .as_i64()
        .map(|v| v.to_string())
        .ok_or_else(|| mismatch("integer", value))
}

/// Shortest round-trip form, with `.0` appended only to integral-looking
/// finite values (`1.0`, never `NaN.0`).
pub fn double_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::Double(v) => Ok(format_f64(*v)),
        SqlValue::Float(v) => Ok(format_f64(f64::from(*v))),
        other => Err(mismatch("f64", other)),
    }
}

/// Same rule as [`double_literal`] at single precision.
pub fn float_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::Float(v) if v.is_finite() => Ok(ryu::Buffer::new().format_finite(*v).to_string()),
        SqlValue::Float(v) => Ok(format_f64(f64::from(*v))),
        SqlValue::Double(v) => Ok(format_f64(*v)),
        other => Err(mismatch("f32", other)),
    }
}

/// SQL Server `real` literal.
pub fn sql_server_float_literal(m: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    Ok(format!("CAST({} AS {})", float_literal(m, value)?, m.store_type()))
}

fn format_f64(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v.is_sign_positive() { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        // ryu always keeps a fractional part or an exponent.
        ryu::Buffer::new().format_finite(v).to_string()
    }
}

/// Decimal text, always with a fractional part.
pub fn decimal_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::Decimal(d) => {
            let text = d.normalize().to_string();
            Ok(if text.contains('.') { text } else { format!("{text}.0") })
        }
        other => integer_literal_text(other).map_err(|_| mismatch("decimal", other)),
    }
}

/// Quoted single character.
pub fn char_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::Char(c) => Ok(format!("'{}'", escape_sql_string(&c.to_string()))),
        SqlValue::String(s) => Ok(format!("'{}'", escape_sql_string(s))),
        other => Err(mismatch("char", other)),
    }
}

/// Quoted string with doubled single quotes.
pub fn string_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    quoted_text(value).map(|s| format!("'{s}'"))
}

/// Quoted string, `N`-prefixed when the mapping is unicode.
pub fn sql_server_string_literal(m: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    let prefix = if m.is_unicode() { "N" } else { "" };
    quoted_text(value).map(|s| format!("{prefix}'{s}'"))
}

fn quoted_text(value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::String(s) => Ok(escape_sql_string(s)),
        SqlValue::Char(c) => Ok(escape_sql_string(&c.to_string())),
        other => Err(mismatch("string", other)),
    }
}

/// `X'0AFF'`.
pub fn bytes_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::Binary(b) => Ok(format!("X'{}'", hex::encode_upper(b))),
        other => Err(mismatch("bytes", other)),
    }
}

/// `0x0AFF`.
pub fn sql_server_bytes_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::Binary(b) => Ok(format!("0x{}", hex::encode_upper(b))),
        other => Err(mismatch("bytes", other)),
    }
}

fn time_text(t: &NaiveTime) -> String {
    let ticks = t.nanosecond() % 1_000_000_000 / 100;
    if ticks == 0 {
        t.format("%H:%M:%S").to_string()
    } else {
        format!("{}.{ticks:07}", t.format("%H:%M:%S"))
    }
}

/// `DATE '2020-01-31'`, `TIME '..'`, `TIMESTAMP '..'` forms.
pub fn temporal_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::Date(d) => Ok(format!("DATE '{}'", d.format("%Y-%m-%d"))),
        SqlValue::Time(t) => Ok(format!("TIME '{}'", time_text(t))),
        SqlValue::DateTime(dt) => Ok(format!(
            "TIMESTAMP '{} {}'",
            dt.format("%Y-%m-%d"),
            time_text(&dt.time())
        )),
        SqlValue::DateTimeOffset(dt) => Ok(format!(
            "TIMESTAMP '{} {}{}'",
            dt.format("%Y-%m-%d"),
            time_text(&dt.time()),
            dt.format("%:z")
        )),
        other => Err(mismatch("date/time", other)),
    }
}

/// SQL Server quoted ISO forms (`'2020-01-31T10:00:00.0000000'`).
pub fn sql_server_temporal_literal(m: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::Date(d) => Ok(format!("'{}'", d.format("%Y-%m-%d"))),
        SqlValue::Time(t) => Ok(format!("'{}'", time_text(t))),
        SqlValue::DateTime(dt) => {
            let fraction = fraction_digits(m, dt.time().nanosecond());
            Ok(format!("'{}{fraction}'", dt.format("%Y-%m-%dT%H:%M:%S")))
        }
        SqlValue::DateTimeOffset(dt) => {
            let fraction = fraction_digits(m, dt.time().nanosecond());
            Ok(format!(
                "'{}{fraction}{}'",
                dt.format("%Y-%m-%dT%H:%M:%S"),
                dt.format("%:z")
            ))
        }
        other => Err(mismatch("date/time", other)),
    }
}

// Fractional seconds shown to the mapping's precision (7 when unset).
fn fraction_digits(m: &TypeMapping, nanos: u32) -> String {
    let digits = m.precision().unwrap_or(7).min(7) as usize;
    if digits == 0 {
        return String::new();
    }
    let ticks = format!("{:07}", nanos % 1_000_000_000 / 100);
    format!(".{}", &ticks[..digits])
}

/// Quoted hyphenated UUID.
pub fn guid_literal(_: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match value {
        SqlValue::Uuid(u) => Ok(format!("'{}'", u.hyphenated())),
        other => Err(mismatch("uuid", other)),
    }
}

/// Delegates to the mapping's spatial capability.
pub fn spatial_literal(m: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
    match m.kind() {
        TypeKind::Spatial(capability) => capability.generate_literal(m, value),
        _ => Err(mismatch("spatial value", value)),
    }
}
