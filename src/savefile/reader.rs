//! Record-level decoding of IDL SAVE files.
//!
//! Layout: `SR` signature, two format bytes (`00 04` plain, `00 06` with
//! zlib-compressed record bodies), then records. Every record starts with a
//! big-endian type code, a 64-bit offset of the next record (low word first)
//! and four reserved bytes. Data inside a record is XDR: big-endian and
//! padded to four bytes.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::rc::Rc;

use flate2::read::ZlibDecoder;
use tracing::{debug, warn};

use super::value::{Array, Structure, Value};
use super::{Results, SaveFileError};

const SIGNATURE: &[u8; 2] = b"SR";
const FORMAT_PLAIN: [u8; 2] = [0x00, 0x04];
const FORMAT_COMPRESSED: [u8; 2] = [0x00, 0x06];

const REC_VARIABLE: i32 = 2;
const REC_END_MARKER: i32 = 6;
const REC_HEAP_DATA: i32 = 16;

const VARSTART: i32 = 7;
const ARRSTART: i32 = 8;
const ARRSTART_64: i32 = 18;
const STRUCTSTART: i32 = 9;

const FLAG_SYSTEM: i32 = 2;
const FLAG_ARRAY: i32 = 4;
const FLAG_STRUCT: i32 = 32;

const MAX_HEAP_DEPTH: usize = 64;

type Res<T> = Result<T, SaveFileError>;

/// Decode every variable in `data`.
pub fn parse(data: &[u8]) -> Res<Results> {
    if data.len() < 4 || &data[..2] != SIGNATURE {
        return Err(SaveFileError::BadSignature);
    }
    let format = [data[2], data[3]];
    let compressed = match format {
        FORMAT_PLAIN => false,
        FORMAT_COMPRESSED => true,
        other => return Err(SaveFileError::UnsupportedFormat(other)),
    };

    let mut decoder = Decoder::default();
    let mut variables = Vec::new();
    let mut offset = 4usize;
    loop {
        let mut header = Cursor::new(data, offset);
        let rectype = header.i32()?;
        let next_low = u64::from(header.u32()?);
        let next_high = u64::from(header.u32()?);
        header.skip(4)?;
        if rectype == REC_END_MARKER {
            break;
        }
        let body_start = header.pos;
        let next = usize::try_from(next_low | (next_high << 32))
            .map_err(|_| SaveFileError::Malformed(format!("record offset overflow at {offset}")))?;
        if next <= body_start || next > data.len() {
            return Err(SaveFileError::Malformed(format!(
                "record at {offset} points to {next}, outside the file"
            )));
        }
        let raw = &data[body_start..next];
        let inflated;
        let body: &[u8] = if compressed {
            inflated = inflate(raw, body_start)?;
            &inflated
        } else {
            raw
        };
        let mut cur = Cursor::new(body, 0);
        match rectype {
            REC_VARIABLE => {
                let name = cur.string()?;
                let value = decoder.variable(&mut cur)?;
                debug!("read variable {} ({})", name, value.type_name());
                variables.push((name.to_lowercase(), value));
            }
            REC_HEAP_DATA => {
                let index = cur.i32()?;
                cur.skip(4)?;
                let value = decoder.variable(&mut cur)?;
                decoder.heap.insert(index, value);
            }
            other => debug!("skipping record type {} at {}", other, offset),
        }
        offset = next;
    }

    let heap = std::mem::take(&mut decoder.heap);
    Ok(variables
        .into_iter()
        .map(|(name, value)| (name, resolve(value, &heap, 0)))
        .collect::<BTreeMap<_, _>>())
}

fn inflate(raw: &[u8], offset: usize) -> Res<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(raw)
        .read_to_end(&mut out)
        .map_err(|source| SaveFileError::Decompress { offset, source })?;
    Ok(out)
}

fn resolve(value: Value, heap: &HashMap<i32, Value>, depth: usize) -> Value {
    match value {
        Value::HeapRef(0) => Value::Null,
        Value::HeapRef(index) if depth < MAX_HEAP_DEPTH => match heap.get(&index) {
            Some(target) => resolve(target.clone(), heap, depth + 1),
            None => {
                warn!("heap index {} not present in save file", index);
                Value::Null
            }
        },
        Value::Array(a) => Value::Array(a.map(|v| resolve(v, heap, depth))),
        Value::Struct(s) => Value::Struct(s.map(|v| resolve(v, heap, depth))),
        other => other,
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn take(&mut self, n: usize) -> Res<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(SaveFileError::UnexpectedEof { offset: self.pos })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Res<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Reject element counts the rest of the record cannot hold.
    fn check_count(&self, count: u64, min_bytes: usize) -> Res<usize> {
        usize::try_from(count)
            .ok()
            .filter(|n| n.checked_mul(min_bytes).is_some_and(|b| b <= self.remaining()))
            .ok_or(SaveFileError::UnexpectedEof { offset: self.pos })
    }

    fn skip(&mut self, n: usize) -> Res<()> {
        self.take(n).map(|_| ())
    }

    fn align(&mut self) {
        let rem = self.pos % 4;
        if rem != 0 {
            self.pos = (self.pos + 4 - rem).min(self.buf.len());
        }
    }

    fn i32(&mut self) -> Res<i32> {
        self.array().map(i32::from_be_bytes)
    }

    fn u32(&mut self) -> Res<u32> {
        self.array().map(u32::from_be_bytes)
    }

    fn u64(&mut self) -> Res<u64> {
        self.array().map(u64::from_be_bytes)
    }

    /// Length-prefixed name (variable, tag and structure names).
    fn string(&mut self) -> Res<String> {
        let len = self.i32()?;
        if len <= 0 {
            return Ok(String::new());
        }
        let bytes = self.take(len as usize)?;
        self.align();
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// STRING data: the length appears twice when non-empty.
    fn string_data(&mut self) -> Res<String> {
        let len = self.i32()?;
        if len <= 0 {
            return Ok(String::new());
        }
        let len = self.i32()?;
        let bytes = self.take(usize::try_from(len).unwrap_or(0))?;
        self.align();
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

#[derive(Debug, Clone)]
struct ArrayDesc {
    nbytes: u64,
    nelements: u64,
    dims: Vec<usize>,
}

impl ArrayDesc {
    fn shape(&self) -> Vec<usize> {
        if self.dims.len() > 1 {
            self.dims.iter().rev().copied().collect()
        } else {
            vec![self.nelements as usize]
        }
    }
}

#[derive(Debug)]
struct TagDesc {
    name: String,
    typecode: i32,
    is_array: bool,
    is_struct: bool,
}

#[derive(Debug)]
struct StructDesc {
    name: String,
    tags: Vec<TagDesc>,
    arrays: HashMap<String, ArrayDesc>,
    structs: HashMap<String, Rc<StructDesc>>,
}

enum TypeDesc {
    Scalar(i32),
    Array(i32, ArrayDesc),
    Struct(ArrayDesc, Rc<StructDesc>),
}

/// Decoding state shared across records of one file.
#[derive(Default)]
struct Decoder {
    structs: HashMap<String, Rc<StructDesc>>,
    heap: HashMap<i32, Value>,
}

impl Decoder {
    /// Type descriptor, VARSTART marker and data.
    fn variable(&mut self, cur: &mut Cursor) -> Res<Value> {
        let desc = self.type_desc(cur)?;
        // undefined value, e.g. an empty heap variable
        if matches!(desc, TypeDesc::Scalar(0)) && cur.remaining() == 0 {
            return Ok(Value::Null);
        }
        let varstart = cur.i32()?;
        if varstart != VARSTART {
            return Err(SaveFileError::Malformed(format!(
                "expected VARSTART (7), found {varstart}"
            )));
        }
        match desc {
            TypeDesc::Scalar(typecode) => read_data(cur, typecode),
            TypeDesc::Array(typecode, array) => read_array(cur, typecode, &array),
            TypeDesc::Struct(array, st) => read_structure(cur, &array, &st),
        }
    }

    fn type_desc(&mut self, cur: &mut Cursor) -> Res<TypeDesc> {
        let typecode = cur.i32()?;
        let flags = cur.i32()?;
        if flags & FLAG_SYSTEM != 0 {
            return Err(SaveFileError::Malformed("system variables are not supported".into()));
        }
        if flags & FLAG_STRUCT != 0 {
            let array = array_desc(cur)?;
            let st = self.struct_desc(cur)?;
            Ok(TypeDesc::Struct(array, st))
        } else if flags & FLAG_ARRAY != 0 {
            Ok(TypeDesc::Array(typecode, array_desc(cur)?))
        } else {
            Ok(TypeDesc::Scalar(typecode))
        }
    }

    fn struct_desc(&mut self, cur: &mut Cursor) -> Res<Rc<StructDesc>> {
        let start = cur.i32()?;
        if start != STRUCTSTART {
            return Err(SaveFileError::Malformed(format!(
                "expected STRUCTSTART (9), found {start}"
            )));
        }
        let name = cur.string()?;
        let predef = cur.i32()?;
        let ntags = cur.i32()?;
        let _nbytes = cur.i32()?;

        if predef & 1 != 0 {
            return self.structs.get(&name).cloned().ok_or_else(|| {
                SaveFileError::Malformed(format!("structure {name} reused before its definition"))
            });
        }

        let mut tags = Vec::new();
        for _ in 0..ntags.max(0) {
            let offset = cur.i32()?;
            if offset == -1 {
                cur.u64()?;
            }
            let typecode = cur.i32()?;
            let flags = cur.i32()?;
            tags.push(TagDesc {
                name: String::new(),
                typecode,
                is_array: flags & FLAG_ARRAY != 0,
                is_struct: flags & FLAG_STRUCT != 0,
            });
        }
        for tag in tags.iter_mut() {
            tag.name = cur.string()?;
        }
        let mut arrays = HashMap::new();
        for tag in tags.iter().filter(|t| t.is_array) {
            arrays.insert(tag.name.clone(), array_desc(cur)?);
        }
        let mut structs = HashMap::new();
        for tag in tags.iter().filter(|t| t.is_struct) {
            let nested = self.struct_desc(cur)?;
            structs.insert(tag.name.clone(), nested);
        }
        if predef & 2 != 0 || predef & 4 != 0 {
            // class name and superclasses: consumed, not exposed
            cur.string()?;
            let nsuper = cur.i32()?;
            for _ in 0..nsuper.max(0) {
                cur.string()?;
            }
            for _ in 0..nsuper.max(0) {
                self.struct_desc(cur)?;
            }
        }

        let desc = Rc::new(StructDesc { name: name.clone(), tags, arrays, structs });
        self.structs.insert(name, Rc::clone(&desc));
        Ok(desc)
    }
}

fn array_desc(cur: &mut Cursor) -> Res<ArrayDesc> {
    let start = cur.i32()?;
    let (nbytes, nelements, ndims, dims) = match start {
        ARRSTART => {
            cur.skip(4)?;
            let nbytes = u64::from(cur.u32()?);
            let nelements = u64::from(cur.u32()?);
            let ndims = cur.i32()?;
            cur.skip(8)?;
            let nmax = cur.i32()?;
            let mut dims = Vec::new();
            for _ in 0..nmax.max(0) {
                dims.push(cur.i32()?);
            }
            (nbytes, nelements, ndims, dims)
        }
        ARRSTART_64 => {
            cur.skip(8)?;
            let nbytes = cur.u64()?;
            let nelements = cur.u64()?;
            let ndims = cur.i32()?;
            cur.skip(8)?;
            let mut dims = Vec::new();
            for _ in 0..8 {
                if cur.i32()? != 0 {
                    return Err(SaveFileError::Malformed(
                        "expected a zero high word in 64-bit array dimensions".into(),
                    ));
                }
                dims.push(cur.i32()?);
            }
            (nbytes, nelements, ndims, dims)
        }
        other => {
            return Err(SaveFileError::Malformed(format!("unknown ARRSTART {other}")));
        }
    };
    let ndims = usize::try_from(ndims)
        .ok()
        .filter(|n| *n <= dims.len())
        .ok_or_else(|| SaveFileError::Malformed(format!("bad dimension count {ndims}")))?;
    let dims = dims[..ndims]
        .iter()
        .map(|d| usize::try_from(*d))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| SaveFileError::Malformed("negative array dimension".into()))?;
    Ok(ArrayDesc { nbytes, nelements, dims })
}

fn read_data(cur: &mut Cursor, typecode: i32) -> Res<Value> {
    Ok(match typecode {
        1 => {
            if cur.i32()? != 1 {
                return Err(SaveFileError::Malformed("bad BYTE scalar length".into()));
            }
            Value::Byte(cur.array::<4>()?[0])
        }
        2 => {
            let b = cur.array::<4>()?;
            Value::Int(i16::from_be_bytes([b[2], b[3]]))
        }
        3 => Value::Long(cur.i32()?),
        4 => Value::Float(f32::from_be_bytes(cur.array()?)),
        5 => Value::Double(f64::from_be_bytes(cur.array()?)),
        6 => {
            let re = f32::from_be_bytes(cur.array()?);
            let im = f32::from_be_bytes(cur.array()?);
            Value::Complex(re, im)
        }
        7 => Value::String(cur.string_data()?),
        8 => {
            return Err(SaveFileError::Malformed(
                "structure data without a structure descriptor".into(),
            ))
        }
        9 => {
            let re = f64::from_be_bytes(cur.array()?);
            let im = f64::from_be_bytes(cur.array()?);
            Value::DComplex(re, im)
        }
        10 | 11 => Value::HeapRef(cur.i32()?),
        12 => {
            let b = cur.array::<4>()?;
            Value::UInt(u16::from_be_bytes([b[2], b[3]]))
        }
        13 => Value::ULong(cur.u32()?),
        14 => Value::Long64(i64::from_be_bytes(cur.array()?)),
        15 => Value::ULong64(cur.u64()?),
        other => return Err(SaveFileError::UnsupportedType(other)),
    })
}

fn packed<const N: usize>(bytes: &[u8], f: impl Fn([u8; N]) -> Value) -> Vec<Value> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut b = [0u8; N];
            b.copy_from_slice(chunk);
            f(b)
        })
        .collect()
}

fn read_array(cur: &mut Cursor, typecode: i32, desc: &ArrayDesc) -> Res<Value> {
    let nbytes = usize::try_from(desc.nbytes)
        .map_err(|_| SaveFileError::Malformed("array too large".into()))?;
    let elements: Vec<Value> = match typecode {
        1 => {
            let declared = cur.i32()?;
            if i64::from(declared) != desc.nbytes as i64 {
                debug!("BYTE array length {} disagrees with descriptor {}", declared, desc.nbytes);
            }
            cur.take(nbytes)?.iter().map(|b| Value::Byte(*b)).collect()
        }
        // 16-bit values occupy four bytes each
        2 => packed::<4>(cur.take(padded(nbytes)?)?, |b| Value::Int(i16::from_be_bytes([b[2], b[3]]))),
        12 => packed::<4>(cur.take(padded(nbytes)?)?, |b| Value::UInt(u16::from_be_bytes([b[2], b[3]]))),
        3 => packed::<4>(cur.take(nbytes)?, |b| Value::Long(i32::from_be_bytes(b))),
        13 => packed::<4>(cur.take(nbytes)?, |b| Value::ULong(u32::from_be_bytes(b))),
        4 => packed::<4>(cur.take(nbytes)?, |b| Value::Float(f32::from_be_bytes(b))),
        5 => packed::<8>(cur.take(nbytes)?, |b| Value::Double(f64::from_be_bytes(b))),
        14 => packed::<8>(cur.take(nbytes)?, |b| Value::Long64(i64::from_be_bytes(b))),
        15 => packed::<8>(cur.take(nbytes)?, |b| Value::ULong64(u64::from_be_bytes(b))),
        6 => packed::<8>(cur.take(nbytes)?, |b| {
            Value::Complex(
                f32::from_be_bytes([b[0], b[1], b[2], b[3]]),
                f32::from_be_bytes([b[4], b[5], b[6], b[7]]),
            )
        }),
        9 => packed::<16>(cur.take(nbytes)?, |b| {
            let mut re = [0u8; 8];
            let mut im = [0u8; 8];
            re.copy_from_slice(&b[..8]);
            im.copy_from_slice(&b[8..]);
            Value::DComplex(f64::from_be_bytes(re), f64::from_be_bytes(im))
        }),
        _ => {
            // every remaining type needs at least one 4-byte word per element
            let count = cur.check_count(desc.nelements, 4)?;
            (0..count)
                .map(|_| read_data(cur, typecode))
                .collect::<Res<Vec<_>>>()?
        }
    };
    cur.align();
    Ok(Value::Array(Array::new(shaped(desc, elements.len()), elements)))
}

fn padded(nbytes: usize) -> Res<usize> {
    nbytes
        .checked_mul(2)
        .ok_or_else(|| SaveFileError::Malformed("array too large".into()))
}

fn shaped(desc: &ArrayDesc, len: usize) -> Vec<usize> {
    let shape = desc.shape();
    let total = shape.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d));
    if total == Some(len) {
        shape
    } else {
        vec![len]
    }
}

/// Structures always decode to an array of structure instances.
fn read_structure(cur: &mut Cursor, desc: &ArrayDesc, st: &StructDesc) -> Res<Value> {
    // each tag reads at least one 4-byte word; tagless rows consume nothing
    let count = if st.tags.is_empty() {
        usize::from(desc.nelements > 0)
    } else {
        cur.check_count(desc.nelements, 4 * st.tags.len())?
    };
    let mut rows = Vec::new();
    for _ in 0..count {
        let mut fields = Vec::with_capacity(st.tags.len());
        for tag in &st.tags {
            let value = if tag.is_struct {
                let (array, nested) = st
                    .arrays
                    .get(&tag.name)
                    .zip(st.structs.get(&tag.name))
                    .ok_or_else(|| {
                        SaveFileError::Malformed(format!("missing descriptor for tag {}", tag.name))
                    })?;
                read_structure(cur, array, nested)?
            } else if tag.is_array {
                let array = st.arrays.get(&tag.name).ok_or_else(|| {
                    SaveFileError::Malformed(format!("missing array descriptor for tag {}", tag.name))
                })?;
                read_array(cur, tag.typecode, array)?
            } else {
                read_data(cur, tag.typecode)?
            };
            fields.push((tag.name.to_lowercase(), value));
        }
        rows.push(Value::Struct(Structure::new(st.name.clone(), fields)));
    }
    let len = rows.len();
    Ok(Value::Array(Array::new(shaped(desc, len), rows)))
}
