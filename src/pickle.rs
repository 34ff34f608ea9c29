//! Pickled results as written by Python detector pipelines.
//!
//! Records are plain dicts, but their arrays are numpy objects. There is no
//! numpy on this side, so the file is decoded into a `serde_pickle::Value`
//! tree with `keep_restore_state`: every object rebuilt through `REDUCE` and
//! `BUILD` is left as the state it would have been restored from. numpy then
//! shows up in three shapes:
//!
//! - `ndarray` (`_reconstruct` + `__setstate__`): `(version, shape, dtype, is_fortran, raw)`
//! - protocol 5 `_frombuffer`: `(raw, dtype, shape, order)`
//! - array scalar such as `np.float32(0.5)`: `(dtype, raw)`
//!
//! A dtype is either its constructor arguments `('f4', False, True)`, when it
//! was fetched back from the memo, or its state
//! `(3, '<', None, None, None, elsize, alignment, flags)` on first use. The
//! state does not name the element kind, so numeric elements of such arrays
//! are read by size: 4 bytes as `f32`, 8 bytes as `f64`.

use std::collections::BTreeMap;
use std::io::Read;

use serde_pickle::{DeOptions, HashableValue, Value};

use crate::result::Scalar;
use crate::source::{RawFrameId, RawRecord};

pub(crate) fn decode_records<R: Read>(reader: R) -> Result<Vec<RawRecord>, String> {
    let options = DeOptions::new()
        .decode_strings()
        .keep_restore_state()
        .replace_unresolved_globals();
    let value = serde_pickle::value_from_reader(reader, options).map_err(|e| e.to_string())?;
    records_from_value(value)
}

fn records_from_value(value: Value) -> Result<Vec<RawRecord>, String> {
    let items = match value {
        Value::List(items) | Value::Tuple(items) => items,
        other => {
            return Err(format!(
                "expected a list of records, found {}",
                describe(&other)
            ))
        }
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            record_from_value(item).map_err(|e| format!("record #{index}: {e}"))
        })
        .collect()
}

fn record_from_value(value: Value) -> Result<RawRecord, String> {
    let mut fields = match value {
        Value::Dict(fields) => fields,
        other => return Err(format!("expected a dict, found {}", describe(&other))),
    };
    let frame_id = take(&mut fields, &["frame_id"]).map(frame_id_from_value);
    let boxes_lidar = take(&mut fields, &["boxes_lidar", "boxes"])
        .filter(|v| !matches!(v, Value::None))
        .map(|v| rows_from_value(&v).map_err(|e| format!("`boxes_lidar`: {e}")))
        .transpose()?;
    let score = take(&mut fields, &["score", "scores"])
        .filter(|v| !matches!(v, Value::None))
        .map(|v| numbers_from_value(&v).map_err(|e| format!("`score`: {e}")))
        .transpose()?;
    Ok(RawRecord {
        frame_id,
        boxes_lidar,
        score,
    })
}

fn take(fields: &mut BTreeMap<HashableValue, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .find_map(|key| fields.remove(&HashableValue::String((*key).to_string())))
}

fn frame_id_from_value(value: Value) -> RawFrameId {
    match value {
        Value::String(id) => RawFrameId::Text(id),
        Value::I64(index) => RawFrameId::Index(index),
        Value::F64(v) => RawFrameId::Float(v),
        Value::None => RawFrameId::Null,
        other => match numpy_scalar(&other) {
            Some(Ok((dtype, raw))) => numpy_frame_id(dtype, raw),
            Some(Err(_)) => RawFrameId::Other("a numpy scalar of unsupported dtype"),
            None => RawFrameId::Other(describe(&other)),
        },
    }
}

fn numpy_frame_id(dtype: DType, raw: &[u8]) -> RawFrameId {
    match dtype.kind {
        Kind::Unicode | Kind::Bytes => dtype
            .text(raw)
            .map(RawFrameId::Text)
            .unwrap_or(RawFrameId::Other("an undecodable numpy string")),
        Kind::Int | Kind::UInt => match dtype.number(raw) {
            Ok(Scalar::Int(index)) => RawFrameId::Index(index),
            _ => RawFrameId::Other("an out of range numpy integer"),
        },
        Kind::Float => match dtype.number(raw) {
            Ok(v) => RawFrameId::Float(v.as_f64()),
            Err(_) => RawFrameId::Other("a numpy scalar of unsupported dtype"),
        },
        Kind::Sized => RawFrameId::Other("a numpy number of unknown dtype"),
    }
}

/// Boxes: an `(N, 7)` array, or a sequence of rows (lists or 1-D arrays).
fn rows_from_value(value: &Value) -> Result<Vec<Vec<Scalar>>, String> {
    if let Some(array) = NdArray::from_value(value) {
        return array?.rows();
    }
    match value {
        Value::List(rows) | Value::Tuple(rows) => rows
            .iter()
            .enumerate()
            .map(|(j, row)| numbers_from_value(row).map_err(|e| format!("box {j}: {e}")))
            .collect(),
        other => Err(format!(
            "expected a list or numpy array, found {}",
            describe(other)
        )),
    }
}

/// Scores or a single box: a 1-D array, or a sequence of numbers.
fn numbers_from_value(value: &Value) -> Result<Vec<Scalar>, String> {
    if let Some(array) = NdArray::from_value(value) {
        let array = array?;
        return match array.shape.len() {
            1 => array.elements(),
            _ => Err(format!(
                "expected a 1-D numpy array, found shape {}",
                array.shape_label()
            )),
        };
    }
    match value {
        Value::List(items) | Value::Tuple(items) => items.iter().map(number_from_value).collect(),
        other => Err(format!(
            "expected a list or numpy array, found {}",
            describe(other)
        )),
    }
}

fn number_from_value(value: &Value) -> Result<Scalar, String> {
    match value {
        Value::I64(v) => Ok(Scalar::Int(*v)),
        Value::F64(v) => Ok(Scalar::Float(*v)),
        other => match numpy_scalar(other) {
            Some(scalar) => scalar.and_then(|(dtype, raw)| dtype.number(raw)),
            None => Err(format!("expected a number, found {}", describe(other))),
        },
    }
}

fn numpy_scalar(value: &Value) -> Option<Result<(DType, &[u8]), String>> {
    let Value::Tuple(parts) = value else {
        return None;
    };
    match parts.as_slice() {
        [dtype @ Value::Tuple(_), Value::Bytes(raw)] => {
            Some(DType::from_value(dtype).map(|dtype| (dtype, raw.as_slice())))
        }
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Float,
    Int,
    UInt,
    Unicode,
    Bytes,
    /// Numeric, but only the element size is known.
    Sized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DType {
    kind: Kind,
    size: Option<usize>,
    big_endian: bool,
}

impl DType {
    fn from_value(value: &Value) -> Result<Self, String> {
        let Value::Tuple(parts) = value else {
            return Err(format!("unsupported numpy dtype {}", describe(value)));
        };
        match parts.as_slice() {
            [Value::String(code), ..] => Self::from_code(code),
            [Value::I64(_), Value::String(order), rest @ ..] => {
                let elsize = match rest.get(3) {
                    Some(Value::I64(n)) if *n > 0 => Some(*n as usize),
                    _ => None,
                };
                let kind = match (elsize, rest.get(4)) {
                    (None, _) => Kind::Sized,
                    (Some(_), Some(Value::I64(4))) => Kind::Unicode,
                    (Some(_), Some(Value::I64(1))) => Kind::Bytes,
                    _ => return Err("unsupported flexible numpy dtype".to_string()),
                };
                Ok(Self {
                    kind,
                    size: elsize,
                    big_endian: byte_order(order)?,
                })
            }
            _ => Err(format!("unsupported numpy dtype {}", describe(value))),
        }
    }

    /// Array-protocol type string: `f4`, `<f8`, `i8`, `U6`, ...
    fn from_code(code: &str) -> Result<Self, String> {
        let unsupported = || format!("unsupported numpy dtype '{code}'");
        let (big_endian, rest) = match code.get(..1) {
            Some(order @ ("<" | ">" | "|" | "=")) => (byte_order(order)?, &code[1..]),
            _ => (false, code),
        };
        let mut chars = rest.chars();
        let kind = match chars.next() {
            Some('f') => Kind::Float,
            Some('i') => Kind::Int,
            Some('u') => Kind::UInt,
            Some('U') => Kind::Unicode,
            Some('S') => Kind::Bytes,
            _ => return Err(unsupported()),
        };
        let count: usize = chars.as_str().parse().map_err(|_| unsupported())?;
        let size = if kind == Kind::Unicode { count * 4 } else { count };
        Ok(Self {
            kind,
            size: Some(size),
            big_endian,
        })
    }

    fn number(&self, raw: &[u8]) -> Result<Scalar, String> {
        let be = self.big_endian;
        let value = match (self.kind, raw.len()) {
            (Kind::Float | Kind::Sized, 4) => Scalar::F32(f32::from_le_bytes(le(raw, be))),
            (Kind::Float | Kind::Sized, 8) => Scalar::Float(f64::from_le_bytes(le(raw, be))),
            (Kind::Int, 1) => Scalar::Int(i8::from_le_bytes(le(raw, be)).into()),
            (Kind::Int, 2) => Scalar::Int(i16::from_le_bytes(le(raw, be)).into()),
            (Kind::Int, 4) => Scalar::Int(i32::from_le_bytes(le(raw, be)).into()),
            (Kind::Int, 8) => Scalar::Int(i64::from_le_bytes(le(raw, be))),
            (Kind::UInt, 1) => Scalar::Int(u8::from_le_bytes(le(raw, be)).into()),
            (Kind::UInt, 2) => Scalar::Int(u16::from_le_bytes(le(raw, be)).into()),
            (Kind::UInt, 4) => Scalar::Int(u32::from_le_bytes(le(raw, be)).into()),
            (Kind::UInt, 8) => {
                let v = u64::from_le_bytes(le(raw, be));
                i64::try_from(v)
                    .map(Scalar::Int)
                    .unwrap_or(Scalar::Float(v as f64))
            }
            (kind, size) => {
                return Err(format!(
                    "unsupported numpy element: {kind:?} of {size} bytes"
                ))
            }
        };
        Ok(value)
    }

    fn text(&self, raw: &[u8]) -> Result<String, String> {
        match self.kind {
            Kind::Unicode => raw
                .chunks_exact(4)
                .map(|unit| u32::from_le_bytes(le(unit, self.big_endian)))
                .take_while(|&code| code != 0)
                .map(|code| {
                    char::from_u32(code).ok_or_else(|| format!("invalid code point {code:#x}"))
                })
                .collect(),
            Kind::Bytes => {
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                String::from_utf8(raw[..end].to_vec()).map_err(|e| e.to_string())
            }
            kind => Err(format!("{kind:?} numpy value is not a string")),
        }
    }
}

fn byte_order(order: &str) -> Result<bool, String> {
    match order {
        ">" => Ok(true),
        "<" | "|" => Ok(false),
        "=" => Ok(cfg!(target_endian = "big")),
        other => Err(format!("unknown numpy byte order '{other}'")),
    }
}

/// Copy `N` raw bytes into little-endian order.
fn le<const N: usize>(raw: &[u8], big_endian: bool) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(raw);
    if big_endian {
        buf.reverse();
    }
    buf
}

#[derive(Debug)]
struct NdArray<'a> {
    shape: Vec<usize>,
    fortran: bool,
    dtype: DType,
    raw: &'a [u8],
}

impl<'a> NdArray<'a> {
    /// `None` when `value` does not look like an array at all.
    fn from_value(value: &'a Value) -> Option<Result<Self, String>> {
        let Value::Tuple(parts) = value else {
            return None;
        };
        match parts.as_slice() {
            [Value::I64(_), Value::Tuple(shape), dtype, Value::Bool(fortran), Value::Bytes(raw)] => {
                Some(Self::new(shape, dtype, *fortran, raw))
            }
            [Value::Bytes(raw), dtype, Value::Tuple(shape), Value::String(order)] => {
                Some(Self::new(shape, dtype, order == "F", raw))
            }
            _ => None,
        }
    }

    fn new(shape: &[Value], dtype: &Value, fortran: bool, raw: &'a [u8]) -> Result<Self, String> {
        let shape = shape
            .iter()
            .map(|dim| match dim {
                Value::I64(n) if *n >= 0 => Ok(*n as usize),
                other => Err(format!("invalid numpy shape entry {}", describe(other))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            shape,
            fortran,
            dtype: DType::from_value(dtype)?,
            raw,
        })
    }

    fn shape_label(&self) -> String {
        let dims: Vec<String> = self.shape.iter().map(usize::to_string).collect();
        match dims.as_slice() {
            [one] => format!("({one},)"),
            _ => format!("({})", dims.join(", ")),
        }
    }

    /// Every element, in C order.
    fn elements(&self) -> Result<Vec<Scalar>, String> {
        let count: usize = self.shape.iter().product();
        if count == 0 {
            return Ok(Vec::new());
        }
        let size = self.dtype.size.unwrap_or(self.raw.len() / count);
        if size == 0 || size * count != self.raw.len() {
            return Err(format!(
                "numpy array of shape {} holds {} bytes",
                self.shape_label(),
                self.raw.len()
            ));
        }
        let values = self
            .raw
            .chunks_exact(size)
            .map(|raw| self.dtype.number(raw))
            .collect::<Result<Vec<_>, _>>()?;
        if self.fortran && self.shape.len() > 1 {
            return Ok(fortran_to_c(&values, &self.shape));
        }
        Ok(values)
    }

    fn rows(&self) -> Result<Vec<Vec<Scalar>>, String> {
        match *self.shape.as_slice() {
            [rows, 0] => Ok(vec![Vec::new(); rows]),
            [_, cols] => Ok(self.elements()?.chunks(cols).map(<[Scalar]>::to_vec).collect()),
            [0] => Ok(Vec::new()),
            _ => Err(format!(
                "expected a 2-D numpy array, found shape {}",
                self.shape_label()
            )),
        }
    }
}

fn fortran_to_c(values: &[Scalar], shape: &[usize]) -> Vec<Scalar> {
    let mut out = Vec::with_capacity(values.len());
    let mut index = vec![0usize; shape.len()];
    for _ in 0..values.len() {
        let mut offset = 0;
        let mut stride = 1;
        for (i, dim) in index.iter().zip(shape) {
            offset += i * stride;
            stride *= dim;
        }
        out.push(values[offset]);
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::None => "None",
        Value::Bool(_) => "a bool",
        Value::I64(_) | Value::Int(_) => "an integer",
        Value::F64(_) => "a float",
        Value::Bytes(_) => "bytes",
        Value::String(_) => "a string",
        Value::List(_) => "a list",
        Value::Tuple(_) => "a tuple",
        Value::Set(_) | Value::FrozenSet(_) => "a set",
        Value::Dict(_) => "a dict",
    }
}
