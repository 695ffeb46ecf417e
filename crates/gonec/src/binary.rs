//! Tagged binary codec for values.
//!
//! Each value is encoded as a [`BinTag`] byte followed by a length-prefixed
//! little-endian payload. Sequences and mappings are length-prefixed and
//! recursive; self-referential containers fail with `NotBinaryConverted`.
//! Values without a binary tag (channels, functions, host objects) are not
//! encodable.

use strum::FromRepr;

use crate::{
    error::{RunResult, RuntimeError},
    types::{decimal::Decimal, map::VmMap, slice::VmSlice, time::{VmDuration, VmTime}},
    value::Value,
};

/// Binary codec tag, one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum BinTag {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Decimal = 3,
    String = 4,
    Time = 5,
    Duration = 6,
    Slice = 7,
    Map = 8,
}

/// Encodes a value as `tag + u64 length + payload`.
pub fn marshal(v: &Value) -> RunResult<Vec<u8>> {
    let mut out = Vec::new();
    write_tagged(v, &mut out, &mut Vec::new())?;
    Ok(out)
}

/// Decodes a value produced by [`marshal`].
pub fn unmarshal(data: &[u8]) -> RunResult<Value> {
    let mut r = Reader { data, at: 0 };
    let v = read_tagged(&mut r)?;
    Ok(v)
}

fn container_id(v: &Value) -> Option<usize> {
    match v {
        Value::Slice(s) => Some(s.addr()),
        Value::Map(m) => Some(m.addr()),
        _ => None,
    }
}

fn tag_of(v: &Value) -> RunResult<BinTag> {
    Ok(match v {
        Value::Nil => BinTag::Nil,
        Value::Bool(_) => BinTag::Bool,
        Value::Int(_) => BinTag::Int,
        Value::Decimal(_) => BinTag::Decimal,
        Value::String(_) => BinTag::String,
        Value::Time(_) => BinTag::Time,
        Value::Duration(_) => BinTag::Duration,
        Value::Slice(_) => BinTag::Slice,
        Value::Map(_) => BinTag::Map,
        _ => return Err(RuntimeError::not_binary_converted()),
    })
}

fn write_tagged(v: &Value, out: &mut Vec<u8>, path: &mut Vec<usize>) -> RunResult<()> {
    out.push(tag_of(v)? as u8);
    let payload = payload_of(v, path)?;
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

fn payload_of(v: &Value, path: &mut Vec<usize>) -> RunResult<Vec<u8>> {
    if let Some(id) = container_id(v) {
        if path.contains(&id) {
            return Err(RuntimeError::not_binary_converted());
        }
        path.push(id);
    }
    let mut out = Vec::new();
    match v {
        Value::Nil => {}
        Value::Bool(b) => out.push(u8::from(*b)),
        Value::Int(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Decimal(d) => {
            // textual mantissa.scale form keeps the codec independent of the
            // bigint limb layout
            let s = d.to_string();
            out.extend_from_slice(s.as_bytes());
        }
        Value::String(s) => out.extend_from_slice(s.as_bytes()),
        Value::Time(t) => {
            out.extend_from_slice(&t.unix_nanos().to_le_bytes());
            out.extend_from_slice(&t.offset_seconds().to_le_bytes());
        }
        Value::Duration(d) => out.extend_from_slice(&d.nanos().to_le_bytes()),
        Value::Slice(s) => {
            let items = s.snapshot();
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in &items {
                write_tagged(item, &mut out, path)?;
            }
        }
        Value::Map(m) => {
            let entries = m.snapshot();
            out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
            for (key, val) in &entries {
                out.extend_from_slice(&(key.len() as u64).to_le_bytes());
                out.extend_from_slice(key.as_bytes());
                write_tagged(val, &mut out, path)?;
            }
        }
        _ => return Err(RuntimeError::not_binary_converted()),
    }
    if container_id(v).is_some() {
        path.pop();
    }
    Ok(out)
}

struct Reader<'a> {
    data: &'a [u8],
    at: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> RunResult<&[u8]> {
        let end = self.at.checked_add(n).ok_or_else(RuntimeError::decode_eof)?;
        if end > self.data.len() {
            return Err(RuntimeError::decode_eof());
        }
        let chunk = &self.data[self.at..end];
        self.at = end;
        Ok(chunk)
    }

    fn u64(&mut self) -> RunResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn byte(&mut self) -> RunResult<u8> {
        Ok(self.take(1)?[0])
    }
}

fn read_tagged(r: &mut Reader<'_>) -> RunResult<Value> {
    let tag = BinTag::from_repr(r.byte()?).ok_or_else(RuntimeError::unknown_type)?;
    let len = usize::try_from(r.u64()?).map_err(|_| RuntimeError::decode_eof())?;
    let payload = r.take(len)?;
    parse_payload(tag, payload)
}

fn parse_payload(tag: BinTag, payload: &[u8]) -> RunResult<Value> {
    let mut r = Reader { data: payload, at: 0 };
    let v = match tag {
        BinTag::Nil => Value::Nil,
        BinTag::Bool => Value::Bool(r.byte()? != 0),
        BinTag::Int => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(r.take(8)?);
            Value::Int(i64::from_le_bytes(buf))
        }
        BinTag::Decimal => {
            let text = std::str::from_utf8(payload).map_err(|_| RuntimeError::not_converted())?;
            Value::Decimal(text.parse::<Decimal>()?)
        }
        BinTag::String => {
            let text = std::str::from_utf8(payload).map_err(|_| RuntimeError::not_converted())?;
            Value::from(text)
        }
        BinTag::Time => {
            let mut nanos = [0u8; 8];
            nanos.copy_from_slice(r.take(8)?);
            let mut offset = [0u8; 4];
            offset.copy_from_slice(r.take(4)?);
            Value::Time(VmTime::from_parts(i64::from_le_bytes(nanos), i32::from_le_bytes(offset))?)
        }
        BinTag::Duration => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(r.take(8)?);
            Value::Duration(VmDuration::new(i64::from_le_bytes(buf)))
        }
        BinTag::Slice => {
            let count = usize::try_from(r.u64()?).map_err(|_| RuntimeError::decode_eof())?;
            let mut items = Vec::with_capacity(count.min(1 << 16));
            for _ in 0..count {
                items.push(read_tagged(&mut r)?);
            }
            Value::Slice(VmSlice::from_values(items))
        }
        BinTag::Map => {
            let count = usize::try_from(r.u64()?).map_err(|_| RuntimeError::decode_eof())?;
            let mut entries = indexmap::IndexMap::new();
            for _ in 0..count {
                let klen = usize::try_from(r.u64()?).map_err(|_| RuntimeError::decode_eof())?;
                let key = std::str::from_utf8(r.take(klen)?)
                    .map_err(|_| RuntimeError::not_converted())?
                    .to_string();
                entries.insert(key, read_tagged(&mut r)?);
            }
            Value::Map(VmMap::from_entries(entries))
        }
    };
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: &Value) {
        let bytes = marshal(v).unwrap();
        let back = unmarshal(&bytes).unwrap();
        assert!(v.deep_eq(&back), "round trip changed {v:?} into {back:?}");
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(&Value::Nil);
        round_trip(&Value::Bool(true));
        round_trip(&Value::Int(-123_456));
        round_trip(&Value::Decimal("-12.345".parse().unwrap()));
        round_trip(&Value::from("привет"));
        round_trip(&Value::Time("2017-08-17T09:23:00+03:00".parse().unwrap()));
        round_trip(&Value::Duration(VmDuration::new(-42)));
    }

    #[test]
    fn containers_round_trip() {
        let m = VmMap::default();
        m.set("ключ", Value::Int(1));
        m.set("вложение", Value::Slice(VmSlice::from_values(vec![Value::Bool(false)])));
        round_trip(&Value::Map(m.clone()));
        round_trip(&Value::Slice(VmSlice::from_values(vec![Value::Map(m), Value::Nil])));
    }

    #[test]
    fn truncated_input_reports_eof() {
        let bytes = marshal(&Value::Int(5)).unwrap();
        let err = unmarshal(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrKind::Eof);
    }

    #[test]
    fn unencodable_values_are_rejected() {
        let err = marshal(&Value::Chan(crate::types::chan::VmChan::new(0))).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrKind::NotBinaryConverted);
    }

    #[test]
    fn cycles_are_rejected() {
        let s = VmSlice::from_values(vec![Value::Nil]);
        s.set(0, Value::Slice(s.clone())).unwrap();
        let err = marshal(&Value::Slice(s)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrKind::NotBinaryConverted);
    }
}
