//! Built-in template filters.
//!
//! Values reach the templates as JSON, so every filter takes and returns a
//! `tera::Value`. Failures are tera errors; unit failures carry the
//! `UnitError` as their source so callers can tell them apart.

use std::collections::HashMap;

use tera::Value;

use super::units::{Quantity, UnitError};

/// `{{ temperature | to_unit(unit="K") }}`
pub fn to_unit(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let target = args
        .get("unit")
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg("Filter `to_unit` expected an arg called `unit`"))?;
    Quantity::from_json(value)
        .ok_or_else(|| UnitError::NotAQuantity { target: target.to_string() })
        .and_then(|q| q.to_value(target))
        .map(Value::from)
        .map_err(|err| tera::Error::chain(err.to_string(), err))
}

/// Base-10 logarithm, elementwise on arrays.
pub fn log10(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| log10(item, args))
            .collect::<tera::Result<Vec<_>>>()
            .map(Value::Array),
        _ => {
            let x = value.as_f64().ok_or_else(|| {
                tera::Error::msg(format!("Filter `log10` received a non-numeric value: {value}"))
            })?;
            if x <= 0.0 {
                return Err(tera::Error::msg(format!(
                    "Filter `log10` requires positive values, got {x}"
                )));
            }
            Ok(Value::from(x.log10()))
        }
    }
}

/// Name under which [`idl_literal`] is registered.
pub const IDL_LITERAL: &str = "idl_literal";

/// Floats as IDL float literals, elementwise; everything else unchanged.
///
/// tera prints `2.0` as `2` and `1e20` as twenty-one digits, which IDL
/// reads as an integer. Rust's `Debug` form keeps the point or exponent.
pub fn idl_literal(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(float_literal(value))
}

fn float_literal(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(float_literal).collect()),
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(v) => Value::String(format!("{v:?}")),
            None => value.clone(),
        },
        other => other.clone(),
    }
}

/// Quote every string so IDL reads them as string literals.
pub fn string_list(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let items = value
        .as_array()
        .ok_or_else(|| tera::Error::msg("Filter `string_list` expects a list of strings"))?;
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(Value::String(format!("'{s}'"))),
            other => Err(tera::Error::msg(format!(
                "Filter `string_list` expects strings, got {other}"
            ))),
        })
        .collect::<tera::Result<Vec<_>>>()
        .map(Value::Array)
}

/// Emit doubles as exact integer divisions so IDL keeps every bit.
///
/// IDL's parser and the default float formatting both lose precision, while
/// `{a}d / {b}d` with the exact ratio of the double evaluates back to the
/// same value. Apply this filter last: it always yields a string.
pub fn force_double_precision(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    double_expression(value).map(Value::String)
}

fn double_expression(value: &Value) -> tera::Result<String> {
    match value {
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(double_expression)
                .collect::<tera::Result<Vec<_>>>()?;
            Ok(format!("[{}]", parts.join(",")))
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(format!("{i}d / 1d"));
            }
            if let Some(u) = n.as_u64() {
                return Ok(format!("{u}d / 1d"));
            }
            n.as_f64().and_then(double_literal).ok_or_else(|| {
                tera::Error::msg(format!("Filter `force_double_precision` cannot represent {n}"))
            })
        }
        other => Err(tera::Error::msg(format!(
            "Filter `force_double_precision` expects numbers, got {other}"
        ))),
    }
}

/// `"{a}d / {b}d"` for the exact ratio of `v`; `None` for NaN and infinities.
pub fn double_literal(v: f64) -> Option<String> {
    integer_ratio(v).map(|(a, b)| format!("{a}d / {b}d"))
}

/// The unique `(a, b)` in lowest terms with `b > 0` a power of two and
/// `a / b == v` exactly, as decimal strings.
pub fn integer_ratio(v: f64) -> Option<(String, String)> {
    if !v.is_finite() {
        return None;
    }
    if v == 0.0 {
        return Some(("0".to_string(), "1".to_string()));
    }
    let bits = v.to_bits();
    let negative = bits >> 63 == 1;
    let biased = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1u64 << 52) - 1);
    let (mut mantissa, mut exponent) = if biased == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1u64 << 52), biased - 1075)
    };
    let zeros = mantissa.trailing_zeros();
    mantissa >>= zeros;
    exponent += zeros as i32;

    let (numerator, denominator) = if exponent >= 0 {
        (shifted_decimal(mantissa, exponent as u32), "1".to_string())
    } else {
        (mantissa.to_string(), shifted_decimal(1, exponent.unsigned_abs()))
    };
    let sign = if negative { "-" } else { "" };
    Some((format!("{sign}{numerator}"), denominator))
}

/// Decimal digits of `value * 2^shift`.
fn shifted_decimal(value: u64, shift: u32) -> String {
    const BASE: u64 = 1_000_000_000;
    // little-endian base 10^9 limbs
    let mut limbs = Vec::new();
    let mut rest = value;
    while rest > 0 {
        limbs.push(rest % BASE);
        rest /= BASE;
    }
    if limbs.is_empty() {
        limbs.push(0);
    }
    let mut remaining = shift;
    while remaining > 0 {
        let step = remaining.min(32);
        let mut carry = 0u64;
        for limb in limbs.iter_mut() {
            let x = (*limb << step) + carry;
            *limb = x % BASE;
            carry = x / BASE;
        }
        while carry > 0 {
            limbs.push(carry % BASE);
            carry /= BASE;
        }
        remaining -= step;
    }
    let mut out = String::new();
    if let Some((last, lower)) = limbs.split_last() {
        out.push_str(&last.to_string());
        for limb in lower.iter().rev() {
            out.push_str(&format!("{limb:09}"));
        }
    }
    out
}
