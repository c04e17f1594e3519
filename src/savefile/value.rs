//! Values decoded from a SAVE file.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// One IDL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null pointer or object reference
    Null,
    Byte(u8),
    Int(i16),
    Long(i32),
    Float(f32),
    Double(f64),
    Complex(f32, f32),
    String(String),
    DComplex(f64, f64),
    UInt(u16),
    ULong(u32),
    Long64(i64),
    ULong64(u64),
    Array(Array),
    Struct(Structure),
    /// Heap reference left unresolved (reference chains deeper than the
    /// resolver follows).
    HeapRef(i32),
}

impl Value {
    /// Row-major shape; empty for scalars.
    pub fn shape(&self) -> &[usize] {
        match self {
            Value::Array(a) => a.shape(),
            _ => &[],
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        Some(match *self {
            Value::Byte(v) => f64::from(v),
            Value::Int(v) => f64::from(v),
            Value::Long(v) => f64::from(v),
            Value::Float(v) => f64::from(v),
            Value::Double(v) => v,
            Value::UInt(v) => f64::from(v),
            Value::ULong(v) => f64::from(v),
            Value::Long64(v) => v as f64,
            Value::ULong64(v) => v as f64,
            _ => return None,
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Value::Byte(v) => i64::from(v),
            Value::Int(v) => i64::from(v),
            Value::Long(v) => i64::from(v),
            Value::UInt(v) => i64::from(v),
            Value::ULong(v) => i64::from(v),
            Value::Long64(v) => v,
            Value::ULong64(v) => i64::try_from(v).ok()?,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Structure> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric array (or scalar) flattened to doubles.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Value::Array(a) => a.elements().iter().map(Value::as_f64).collect(),
            other => other.as_f64().map(|v| vec![v]),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Byte(_) => "BYTE",
            Value::Int(_) => "INT",
            Value::Long(_) => "LONG",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::Complex(..) => "COMPLEX",
            Value::String(_) => "STRING",
            Value::DComplex(..) => "DCOMPLEX",
            Value::UInt(_) => "UINT",
            Value::ULong(_) => "ULONG",
            Value::Long64(_) => "LONG64",
            Value::ULong64(_) => "ULONG64",
            Value::Array(_) => "ARRAY",
            Value::Struct(_) => "STRUCT",
            Value::HeapRef(_) => "POINTER",
        }
    }
}

/// N-dimensional array in row-major order (IDL dimensions reversed).
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    shape: Vec<usize>,
    elements: Vec<Value>,
}

impl Array {
    pub fn new(shape: Vec<usize>, elements: Vec<Value>) -> Self {
        Self { shape, elements }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element at a row-major index.
    pub fn get(&self, index: &[usize]) -> Option<&Value> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0;
        for (i, dim) in index.iter().zip(&self.shape) {
            if i >= dim {
                return None;
            }
            flat = flat * dim + i;
        }
        self.elements.get(flat)
    }

    pub(crate) fn map(self, f: impl FnMut(Value) -> Value) -> Self {
        Self {
            shape: self.shape,
            elements: self.elements.into_iter().map(f).collect(),
        }
    }
}

/// One structure instance; tag names are lowercase.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    name: String,
    fields: Vec<(String, Value)>,
}

impl Structure {
    pub fn new(name: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        Self { name: name.into(), fields }
    }

    /// Structure name; empty for anonymous structures.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Case-insensitive tag lookup.
    pub fn get(&self, tag: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(tag))
            .map(|(_, value)| value)
    }

    pub(crate) fn map(self, mut f: impl FnMut(Value) -> Value) -> Self {
        Self {
            name: self.name,
            fields: self.fields.into_iter().map(|(k, v)| (k, f(v))).collect(),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => s.serialize_none(),
            Value::Byte(v) => s.serialize_u8(*v),
            Value::Int(v) => s.serialize_i16(*v),
            Value::Long(v) => s.serialize_i32(*v),
            Value::Float(v) => s.serialize_f32(*v),
            Value::Double(v) => s.serialize_f64(*v),
            Value::Complex(re, im) => (re, im).serialize(s),
            Value::String(v) => s.serialize_str(v),
            Value::DComplex(re, im) => (re, im).serialize(s),
            Value::UInt(v) => s.serialize_u16(*v),
            Value::ULong(v) => s.serialize_u32(*v),
            Value::Long64(v) => s.serialize_i64(*v),
            Value::ULong64(v) => s.serialize_u64(*v),
            Value::Array(a) => a.serialize(s),
            Value::Struct(st) => st.serialize(s),
            Value::HeapRef(i) => s.serialize_i32(*i),
        }
    }
}

/// Nested lists following the shape.
impl Serialize for Array {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        Nested { shape: &self.shape, elements: &self.elements }.serialize(s)
    }
}

struct Nested<'a> {
    shape: &'a [usize],
    elements: &'a [Value],
}

impl Serialize for Nested<'_> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if self.shape.len() <= 1 {
            return s.collect_seq(self.elements);
        }
        let stride: usize = self.shape[1..].iter().product();
        if stride == 0 {
            return s.collect_seq(std::iter::empty::<Value>());
        }
        s.collect_seq(self.elements.chunks(stride).map(|chunk| Nested {
            shape: &self.shape[1..],
            elements: chunk,
        }))
    }
}

impl Serialize for Structure {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn longs(values: &[i32]) -> Vec<Value> {
        values.iter().copied().map(Value::Long).collect()
    }

    #[test]
    fn test_row_major_indexing() {
        let a = Array::new(vec![2, 3], longs(&[0, 1, 2, 3, 4, 5]));
        assert_eq!(a.get(&[1, 0]), Some(&Value::Long(3)));
        assert_eq!(a.get(&[0, 2]), Some(&Value::Long(2)));
        assert_eq!(a.get(&[2, 0]), None);
        assert_eq!(a.get(&[0]), None);
    }

    #[test]
    fn test_array_serializes_nested() {
        let a = Value::Array(Array::new(vec![2, 3], longs(&[0, 1, 2, 3, 4, 5])));
        assert_eq!(serde_json::to_value(&a).unwrap(), json!([[0, 1, 2], [3, 4, 5]]));
    }

    #[test]
    fn test_structure_serializes_as_map() {
        let s = Value::Struct(Structure::new(
            "",
            vec![("a".into(), Value::Double(1.5)), ("b".into(), Value::String("x".into()))],
        ));
        assert_eq!(serde_json::to_value(&s).unwrap(), json!({"a": 1.5, "b": "x"}));
        assert_eq!(s.as_struct().unwrap().get("A"), Some(&Value::Double(1.5)));
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(Value::Int(-3).as_f64(), Some(-3.0));
        assert_eq!(Value::ULong64(u64::MAX).as_i64(), None);
        assert_eq!(Value::String("s".into()).as_f64(), None);
        let a = Value::Array(Array::new(vec![2], vec![Value::Byte(1), Value::Float(0.5)]));
        assert_eq!(a.to_f64_vec(), Some(vec![1.0, 0.5]));
    }
}
