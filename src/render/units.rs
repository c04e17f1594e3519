//! Physical quantities for the `to_unit` filter.
//!
//! A quantity travels through the render arguments as a JSON object with
//! exactly two keys, `value` and `unit`. Unit strings accept SI prefixes,
//! products, one level of division and integer powers, e.g. `MK`,
//! `erg cm^-3`, `cm2 / s`, `km**2`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Unit conversion failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("Value must be a quantity with units compatible with {target}")]
    NotAQuantity { target: String },
    #[error("Unknown unit: {0}")]
    Unknown(String),
    #[error("Unit '{from}' is not convertible to '{to}'")]
    Incompatible { from: String, to: String },
}

/// Numeric payload of a quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuantityValue {
    Scalar(f64),
    Array(Vec<f64>),
}

/// A value carrying unit metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: QuantityValue,
    pub unit: String,
}

impl Quantity {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self { value: QuantityValue::Scalar(value), unit: unit.into() }
    }

    pub fn array(values: Vec<f64>, unit: impl Into<String>) -> Self {
        Self { value: QuantityValue::Array(values), unit: unit.into() }
    }

    /// Recognise a quantity inside render arguments.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.len() != 2 || !obj.contains_key("value") || !obj.contains_key("unit") {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Bare value expressed in `target`.
    pub fn to_value(&self, target: &str) -> Result<QuantityValue, UnitError> {
        let from = Unit::parse(&self.unit)?;
        let to = Unit::parse(target)?;
        if from.dims != to.dims {
            return Err(UnitError::Incompatible {
                from: self.unit.clone(),
                to: target.to_string(),
            });
        }
        // Multiply before dividing so exact ratios like 90 min -> 1.5 h stay exact.
        let convert = |v: f64| v * from.scale / to.scale;
        Ok(match &self.value {
            QuantityValue::Scalar(v) => QuantityValue::Scalar(convert(*v)),
            QuantityValue::Array(vs) => QuantityValue::Array(vs.iter().copied().map(convert).collect()),
        })
    }
}

impl From<Quantity> for Value {
    fn from(q: Quantity) -> Self {
        serde_json::json!({ "value": q.value, "unit": q.unit })
    }
}

impl From<QuantityValue> for Value {
    fn from(v: QuantityValue) -> Self {
        match v {
            QuantityValue::Scalar(x) => Value::from(x),
            QuantityValue::Array(xs) => Value::from(xs),
        }
    }
}

// length, mass, time, temperature, angle, current
type Dims = [i8; 6];

const LENGTH: Dims = [1, 0, 0, 0, 0, 0];
const MASS: Dims = [0, 1, 0, 0, 0, 0];
const TIME: Dims = [0, 0, 1, 0, 0, 0];
const TEMPERATURE: Dims = [0, 0, 0, 1, 0, 0];
const ANGLE: Dims = [0, 0, 0, 0, 1, 0];
const SOLID_ANGLE: Dims = [0, 0, 0, 0, 2, 0];
const CURRENT: Dims = [0, 0, 0, 0, 0, 1];
const FREQUENCY: Dims = [0, 0, -1, 0, 0, 0];
const FORCE: Dims = [1, 1, -2, 0, 0, 0];
const ENERGY: Dims = [2, 1, -2, 0, 0, 0];
const POWER: Dims = [2, 1, -3, 0, 0, 0];
const PRESSURE: Dims = [-1, 1, -2, 0, 0, 0];
const FLUX_DENSITY: Dims = [0, 1, -2, 0, 0, -1];
const DIMENSIONLESS: Dims = [0; 6];

struct BaseUnit {
    symbol: &'static str,
    scale: f64,
    dims: Dims,
    prefixable: bool,
}

const fn base(symbol: &'static str, scale: f64, dims: Dims, prefixable: bool) -> BaseUnit {
    BaseUnit { symbol, scale, dims, prefixable }
}

const BASE_UNITS: &[BaseUnit] = &[
    base("m", 1.0, LENGTH, true),
    base("Angstrom", 1e-10, LENGTH, false),
    base("AA", 1e-10, LENGTH, false),
    base("AU", 1.495978707e11, LENGTH, false),
    base("au", 1.495978707e11, LENGTH, false),
    base("pc", 3.085_677_581_491_367_3e16, LENGTH, true),
    base("g", 1e-3, MASS, true),
    base("s", 1.0, TIME, true),
    base("min", 60.0, TIME, false),
    base("h", 3600.0, TIME, false),
    base("d", 86400.0, TIME, false),
    base("day", 86400.0, TIME, false),
    base("yr", 3.15576e7, TIME, true),
    base("K", 1.0, TEMPERATURE, true),
    base("rad", 1.0, ANGLE, true),
    base("deg", std::f64::consts::PI / 180.0, ANGLE, false),
    base("arcmin", std::f64::consts::PI / 10_800.0, ANGLE, false),
    base("arcsec", std::f64::consts::PI / 648_000.0, ANGLE, false),
    base("sr", 1.0, SOLID_ANGLE, false),
    base("A", 1.0, CURRENT, true),
    base("Hz", 1.0, FREQUENCY, true),
    base("N", 1.0, FORCE, true),
    base("dyn", 1e-5, FORCE, false),
    base("J", 1.0, ENERGY, true),
    base("erg", 1e-7, ENERGY, false),
    base("eV", 1.602_176_634e-19, ENERGY, true),
    base("W", 1.0, POWER, true),
    base("Pa", 1.0, PRESSURE, true),
    base("T", 1.0, FLUX_DENSITY, true),
    base("G", 1e-4, FLUX_DENSITY, true),
];

const PREFIXES: &[(&str, f64)] = &[
    ("da", 1e1),
    ("Y", 1e24),
    ("Z", 1e21),
    ("E", 1e18),
    ("P", 1e15),
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("h", 1e2),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("n", 1e-9),
    ("p", 1e-12),
    ("f", 1e-15),
    ("a", 1e-18),
    ("z", 1e-21),
    ("y", 1e-24),
];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Unit {
    scale: f64,
    dims: Dims,
}

impl Unit {
    const ONE: Unit = Unit { scale: 1.0, dims: DIMENSIONLESS };

    fn parse(text: &str) -> Result<Unit, UnitError> {
        let unknown = || UnitError::Unknown(text.to_string());
        let normalized = text.replace("**", "^");
        let mut parts = normalized.split('/');
        let mut unit = Unit::ONE;
        if let Some(numerator) = parts.next() {
            for token in tokens(numerator) {
                unit = unit.mul(parse_factor(token, text)?).ok_or_else(unknown)?;
            }
        }
        for denominator in parts {
            for token in tokens(denominator) {
                let inverse = parse_factor(token, text)?.powi(-1).ok_or_else(unknown)?;
                unit = unit.mul(inverse).ok_or_else(unknown)?;
            }
        }
        Ok(unit)
    }

    /// `None` when an exponent leaves the `i8` range.
    fn mul(self, other: Unit) -> Option<Unit> {
        let mut dims = self.dims;
        for (d, o) in dims.iter_mut().zip(other.dims) {
            *d = d.checked_add(o)?;
        }
        Some(Unit { scale: self.scale * other.scale, dims })
    }

    fn powi(self, n: i32) -> Option<Unit> {
        let n = i8::try_from(n).ok()?;
        let mut dims = self.dims;
        for d in dims.iter_mut() {
            *d = d.checked_mul(n)?;
        }
        Some(Unit { scale: self.scale.powi(i32::from(n)), dims })
    }
}

fn tokens(expr: &str) -> impl Iterator<Item = &str> {
    expr.split(|c: char| c.is_whitespace() || c == '*' || c == '(' || c == ')')
        .filter(|t| !t.is_empty())
}

fn parse_factor(token: &str, whole: &str) -> Result<Unit, UnitError> {
    let unknown = || UnitError::Unknown(whole.to_string());
    if token.parse::<f64>().is_ok_and(|v| v == 1.0) {
        return Ok(Unit::ONE);
    }
    let (symbol, power) = split_power(token).ok_or_else(unknown)?;
    lookup(symbol)
        .and_then(|unit| unit.powi(power))
        .ok_or_else(unknown)
}

/// `cm^-3`, `cm-3`, `cm3` and `cm` -> (symbol, power)
fn split_power(token: &str) -> Option<(&str, i32)> {
    if let Some((symbol, power)) = token.split_once('^') {
        return Some((symbol, power.parse().ok()?));
    }
    let digits_start = token
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    match digits_start {
        Some(start) => {
            let start = match token[..start].chars().last() {
                Some('-') | Some('+') => start - 1,
                _ => start,
            };
            let symbol = &token[..start];
            if symbol.is_empty() {
                return None;
            }
            Some((symbol, token[start..].parse().ok()?))
        }
        None => Some((token, 1)),
    }
}

fn lookup(symbol: &str) -> Option<Unit> {
    if let Some(b) = BASE_UNITS.iter().find(|b| b.symbol == symbol) {
        return Some(Unit { scale: b.scale, dims: b.dims });
    }
    PREFIXES.iter().find_map(|(prefix, factor)| {
        let rest = symbol.strip_prefix(prefix)?;
        BASE_UNITS
            .iter()
            .find(|b| b.prefixable && b.symbol == rest)
            .map(|b| Unit { scale: b.scale * factor, dims: b.dims })
    })
}
