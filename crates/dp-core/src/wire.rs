//! Conversions between this crate's in-memory [`Frame`]/[`TypedColumn`] model
//! and the `dp-proto` wire types, plus the monotonic client-request-id
//! allocator the ingestion facade hands out (§4.4, §5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{DpError, DpResult};
use crate::frame::{Frame, FrameColumn};
use crate::types::{ScalarValue, SupportedType, Timebase, TimestampList, TypedColumn, UniformClock};

/// Hands out process-unique, strictly increasing client request ids.
#[derive(Debug, Default)]
pub struct ClientRequestIdAllocator(AtomicU64);

impl ClientRequestIdAllocator {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// JSON-friendly mirror of [`ScalarValue`], used only to encode the nested
/// `Array`/`Structure` variants onto the wire; primitive columns use a
/// tighter fixed-width or length-prefixed encoding instead.
#[derive(Debug, Serialize, Deserialize)]
enum ScalarJson {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Timestamp { epoch_seconds: i64, nanos: u32 },
    ByteArray(Vec<u8>),
    Array(Vec<ScalarJson>),
    Structure(Vec<(String, ScalarJson)>),
    Image(Vec<u8>),
}

impl From<&ScalarValue> for ScalarJson {
    fn from(value: &ScalarValue) -> Self {
        match value {
            ScalarValue::Bool(v) => ScalarJson::Bool(*v),
            ScalarValue::Int8(v) => ScalarJson::Int8(*v),
            ScalarValue::Int16(v) => ScalarJson::Int16(*v),
            ScalarValue::Int32(v) => ScalarJson::Int32(*v),
            ScalarValue::Int64(v) => ScalarJson::Int64(*v),
            ScalarValue::UInt8(v) => ScalarJson::UInt8(*v),
            ScalarValue::UInt16(v) => ScalarJson::UInt16(*v),
            ScalarValue::UInt32(v) => ScalarJson::UInt32(*v),
            ScalarValue::UInt64(v) => ScalarJson::UInt64(*v),
            ScalarValue::Float32(v) => ScalarJson::Float32(*v),
            ScalarValue::Float64(v) => ScalarJson::Float64(*v),
            ScalarValue::String(v) => ScalarJson::String(v.clone()),
            ScalarValue::Timestamp(v) => {
                let d = v.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
                ScalarJson::Timestamp {
                    epoch_seconds: d.as_secs() as i64,
                    nanos: d.subsec_nanos(),
                }
            }
            ScalarValue::ByteArray(v) => ScalarJson::ByteArray(v.clone()),
            ScalarValue::Array(v) => ScalarJson::Array(v.iter().map(ScalarJson::from).collect()),
            ScalarValue::Structure(v) => {
                ScalarJson::Structure(v.iter().map(|(k, v)| (k.clone(), v.into())).collect())
            }
            ScalarValue::Image(v) => ScalarJson::Image(v.clone()),
        }
    }
}

impl From<ScalarJson> for ScalarValue {
    fn from(value: ScalarJson) -> Self {
        match value {
            ScalarJson::Bool(v) => ScalarValue::Bool(v),
            ScalarJson::Int8(v) => ScalarValue::Int8(v),
            ScalarJson::Int16(v) => ScalarValue::Int16(v),
            ScalarJson::Int32(v) => ScalarValue::Int32(v),
            ScalarJson::Int64(v) => ScalarValue::Int64(v),
            ScalarJson::UInt8(v) => ScalarValue::UInt8(v),
            ScalarJson::UInt16(v) => ScalarValue::UInt16(v),
            ScalarJson::UInt32(v) => ScalarValue::UInt32(v),
            ScalarJson::UInt64(v) => ScalarValue::UInt64(v),
            ScalarJson::Float32(v) => ScalarValue::Float32(v),
            ScalarJson::Float64(v) => ScalarValue::Float64(v),
            ScalarJson::String(v) => ScalarValue::String(v),
            ScalarJson::Timestamp { epoch_seconds, nanos } => ScalarValue::Timestamp(
                std::time::UNIX_EPOCH + Duration::new(epoch_seconds.max(0) as u64, nanos),
            ),
            ScalarJson::ByteArray(v) => ScalarValue::ByteArray(v),
            ScalarJson::Array(v) => ScalarValue::Array(v.into_iter().map(ScalarValue::from).collect()),
            ScalarJson::Structure(v) => {
                ScalarValue::Structure(v.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            ScalarJson::Image(v) => ScalarValue::Image(v),
        }
    }
}

fn write_length_prefixed(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn read_length_prefixed<'a>(buf: &'a [u8], offset: &mut usize) -> DpResult<&'a [u8]> {
    if buf.len() < *offset + 4 {
        return Err(DpError::consistency("truncated length-prefixed field"));
    }
    let mut cursor = &buf[*offset..*offset + 4];
    let len = cursor.get_u32_le() as usize;
    *offset += 4;
    if buf.len() < *offset + len {
        return Err(DpError::consistency("truncated length-prefixed payload"));
    }
    let slice = &buf[*offset..*offset + len];
    *offset += len;
    Ok(slice)
}

pub fn scalar_type_to_wire(ty: SupportedType) -> dp_proto::ScalarType {
    match ty {
        SupportedType::Bool => dp_proto::ScalarType::Bool,
        SupportedType::Int8 => dp_proto::ScalarType::Int8,
        SupportedType::Int16 => dp_proto::ScalarType::Int16,
        SupportedType::Int32 => dp_proto::ScalarType::Int32,
        SupportedType::Int64 => dp_proto::ScalarType::Int64,
        SupportedType::UInt8 => dp_proto::ScalarType::Uint8,
        SupportedType::UInt16 => dp_proto::ScalarType::Uint16,
        SupportedType::UInt32 => dp_proto::ScalarType::Uint32,
        SupportedType::UInt64 => dp_proto::ScalarType::Uint64,
        SupportedType::Float32 => dp_proto::ScalarType::Float32,
        SupportedType::Float64 => dp_proto::ScalarType::Float64,
        SupportedType::String => dp_proto::ScalarType::String,
        SupportedType::Timestamp => dp_proto::ScalarType::Timestamp,
        SupportedType::ByteArray => dp_proto::ScalarType::ByteArray,
        SupportedType::Array => dp_proto::ScalarType::Array,
        SupportedType::Structure => dp_proto::ScalarType::Structure,
        SupportedType::Image => dp_proto::ScalarType::Image,
    }
}

pub fn scalar_type_from_wire(ty: dp_proto::ScalarType) -> DpResult<SupportedType> {
    match ty {
        dp_proto::ScalarType::Bool => Ok(SupportedType::Bool),
        dp_proto::ScalarType::Int8 => Ok(SupportedType::Int8),
        dp_proto::ScalarType::Int16 => Ok(SupportedType::Int16),
        dp_proto::ScalarType::Int32 => Ok(SupportedType::Int32),
        dp_proto::ScalarType::Int64 => Ok(SupportedType::Int64),
        dp_proto::ScalarType::Uint8 => Ok(SupportedType::UInt8),
        dp_proto::ScalarType::Uint16 => Ok(SupportedType::UInt16),
        dp_proto::ScalarType::Uint32 => Ok(SupportedType::UInt32),
        dp_proto::ScalarType::Uint64 => Ok(SupportedType::UInt64),
        dp_proto::ScalarType::Float32 => Ok(SupportedType::Float32),
        dp_proto::ScalarType::Float64 => Ok(SupportedType::Float64),
        dp_proto::ScalarType::String => Ok(SupportedType::String),
        dp_proto::ScalarType::Timestamp => Ok(SupportedType::Timestamp),
        dp_proto::ScalarType::ByteArray => Ok(SupportedType::ByteArray),
        dp_proto::ScalarType::Array => Ok(SupportedType::Array),
        dp_proto::ScalarType::Structure => Ok(SupportedType::Structure),
        dp_proto::ScalarType::Image => Ok(SupportedType::Image),
        dp_proto::ScalarType::Unspecified => {
            Err(DpError::consistency("column carries an unspecified scalar type"))
        }
    }
}

/// Encodes a [`TypedColumn`]'s values into the flat `raw_values` byte form
/// carried on a wire `DataColumn`.
pub fn encode_column(column: &TypedColumn) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(column.estimated_byte_size());
    match column {
        TypedColumn::Bool(v) => v.iter().for_each(|b| buf.put_u8(*b as u8)),
        TypedColumn::Int8(v) => v.iter().for_each(|n| buf.put_i8(*n)),
        TypedColumn::UInt8(v) => buf.put_slice(v),
        TypedColumn::Int16(v) => v.iter().for_each(|n| buf.put_i16_le(*n)),
        TypedColumn::UInt16(v) => v.iter().for_each(|n| buf.put_u16_le(*n)),
        TypedColumn::Int32(v) => v.iter().for_each(|n| buf.put_i32_le(*n)),
        TypedColumn::UInt32(v) => v.iter().for_each(|n| buf.put_u32_le(*n)),
        TypedColumn::Float32(v) => v.iter().for_each(|n| buf.put_f32_le(*n)),
        TypedColumn::Int64(v) => v.iter().for_each(|n| buf.put_i64_le(*n)),
        TypedColumn::UInt64(v) => v.iter().for_each(|n| buf.put_u64_le(*n)),
        TypedColumn::Float64(v) => v.iter().for_each(|n| buf.put_f64_le(*n)),
        TypedColumn::Timestamp(v) => v.iter().for_each(|t| {
            let d = t.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
            buf.put_i64_le(d.as_secs() as i64);
            buf.put_u32_le(d.subsec_nanos());
        }),
        TypedColumn::String(v) => v.iter().for_each(|s| write_length_prefixed(&mut buf, s.as_bytes())),
        TypedColumn::ByteArray(v) | TypedColumn::Image(v) => {
            v.iter().for_each(|b| write_length_prefixed(&mut buf, b))
        }
        TypedColumn::Array(v) => v.iter().for_each(|row| {
            let json = serde_json::to_vec(
                &row.iter().map(ScalarJson::from).collect::<Vec<_>>(),
            )
            .unwrap_or_default();
            write_length_prefixed(&mut buf, &json);
        }),
        TypedColumn::Structure(v) => v.iter().for_each(|row| {
            let mirrored: Vec<(String, ScalarJson)> =
                row.iter().map(|(k, val)| (k.clone(), val.into())).collect();
            let json = serde_json::to_vec(&mirrored).unwrap_or_default();
            write_length_prefixed(&mut buf, &json);
        }),
    }
    buf.to_vec()
}

/// Reconstructs a [`TypedColumn`] of `scalar_type` with `row_count` rows
/// from its `raw_values` wire encoding.
pub fn decode_column(
    scalar_type: SupportedType,
    raw: &[u8],
    row_count: usize,
) -> DpResult<TypedColumn> {
    let truncated = || DpError::consistency("raw_values too short for declared row count");
    Ok(match scalar_type {
        SupportedType::Bool => {
            if raw.len() < row_count {
                return Err(truncated());
            }
            TypedColumn::Bool(raw[..row_count].iter().map(|b| *b != 0).collect())
        }
        SupportedType::Int8 => {
            if raw.len() < row_count {
                return Err(truncated());
            }
            TypedColumn::Int8(raw[..row_count].iter().map(|b| *b as i8).collect())
        }
        SupportedType::UInt8 => {
            if raw.len() < row_count {
                return Err(truncated());
            }
            TypedColumn::UInt8(raw[..row_count].to_vec())
        }
        SupportedType::Int16 => TypedColumn::Int16(decode_fixed(raw, row_count, i16::from_le_bytes)?),
        SupportedType::UInt16 => TypedColumn::UInt16(decode_fixed(raw, row_count, u16::from_le_bytes)?),
        SupportedType::Int32 => TypedColumn::Int32(decode_fixed(raw, row_count, i32::from_le_bytes)?),
        SupportedType::UInt32 => TypedColumn::UInt32(decode_fixed(raw, row_count, u32::from_le_bytes)?),
        SupportedType::Float32 => TypedColumn::Float32(decode_fixed(raw, row_count, f32::from_le_bytes)?),
        SupportedType::Int64 => TypedColumn::Int64(decode_fixed(raw, row_count, i64::from_le_bytes)?),
        SupportedType::UInt64 => TypedColumn::UInt64(decode_fixed(raw, row_count, u64::from_le_bytes)?),
        SupportedType::Float64 => TypedColumn::Float64(decode_fixed(raw, row_count, f64::from_le_bytes)?),
        SupportedType::Timestamp => {
            let mut values = Vec::with_capacity(row_count);
            let mut offset = 0usize;
            for _ in 0..row_count {
                if raw.len() < offset + 12 {
                    return Err(truncated());
                }
                let secs = i64::from_le_bytes(raw[offset..offset + 8].try_into().unwrap());
                let nanos = u32::from_le_bytes(raw[offset + 8..offset + 12].try_into().unwrap());
                values.push(std::time::UNIX_EPOCH + Duration::new(secs.max(0) as u64, nanos));
                offset += 12;
            }
            TypedColumn::Timestamp(values)
        }
        SupportedType::String => {
            let mut values = Vec::with_capacity(row_count);
            let mut offset = 0usize;
            for _ in 0..row_count {
                let slice = read_length_prefixed(raw, &mut offset)?;
                values.push(
                    String::from_utf8(slice.to_vec())
                        .map_err(|_| DpError::consistency("invalid utf-8 in string column"))?,
                );
            }
            TypedColumn::String(values)
        }
        SupportedType::ByteArray | SupportedType::Image => {
            let mut values = Vec::with_capacity(row_count);
            let mut offset = 0usize;
            for _ in 0..row_count {
                values.push(read_length_prefixed(raw, &mut offset)?.to_vec());
            }
            if scalar_type == SupportedType::Image {
                TypedColumn::Image(values)
            } else {
                TypedColumn::ByteArray(values)
            }
        }
        SupportedType::Array => {
            let mut values = Vec::with_capacity(row_count);
            let mut offset = 0usize;
            for _ in 0..row_count {
                let slice = read_length_prefixed(raw, &mut offset)?;
                let decoded: Vec<ScalarJson> = serde_json::from_slice(slice)
                    .map_err(|_| DpError::consistency("malformed array cell payload"))?;
                values.push(decoded.into_iter().map(ScalarValue::from).collect());
            }
            TypedColumn::Array(values)
        }
        SupportedType::Structure => {
            let mut values = Vec::with_capacity(row_count);
            let mut offset = 0usize;
            for _ in 0..row_count {
                let slice = read_length_prefixed(raw, &mut offset)?;
                let decoded: Vec<(String, ScalarJson)> = serde_json::from_slice(slice)
                    .map_err(|_| DpError::consistency("malformed structure cell payload"))?;
                values.push(decoded.into_iter().map(|(k, v)| (k, v.into())).collect());
            }
            TypedColumn::Structure(values)
        }
    })
}

fn decode_fixed<T, const N: usize>(
    raw: &[u8],
    row_count: usize,
    from_bytes: fn([u8; N]) -> T,
) -> DpResult<Vec<T>> {
    let mut values = Vec::with_capacity(row_count);
    let mut offset = 0usize;
    for _ in 0..row_count {
        if raw.len() < offset + N {
            return Err(DpError::consistency("raw_values too short for declared row count"));
        }
        values.push(from_bytes(raw[offset..offset + N].try_into().unwrap()));
        offset += N;
    }
    Ok(values)
}

fn timebase_to_wire(timebase: &Timebase) -> dp_proto::DataTimebase {
    let kind = match timebase {
        Timebase::Uniform(clock) => {
            dp_proto::DataTimebaseKind::FixedInterval(dp_proto::FixedIntervalTimebase {
                start: Some(clock.start.into()),
                sample_count: clock.count,
                period_nanos: clock.period.as_nanos() as u64,
            })
        }
        Timebase::List(list) => dp_proto::DataTimebaseKind::Explicit(dp_proto::ExplicitTimebase {
            instants: list.as_slice().iter().map(|t| (*t).into()).collect(),
        }),
    };
    dp_proto::DataTimebase { kind: Some(kind) }
}

pub fn timebase_from_wire(wire: dp_proto::DataTimebase) -> DpResult<Timebase> {
    match wire.kind {
        Some(dp_proto::DataTimebaseKind::FixedInterval(fixed)) => {
            let start = fixed
                .start
                .ok_or_else(|| DpError::consistency("fixed-interval timebase missing start"))?
                .into();
            Ok(Timebase::Uniform(UniformClock {
                start,
                count: fixed.sample_count,
                period: Duration::from_nanos(fixed.period_nanos),
            }))
        }
        Some(dp_proto::DataTimebaseKind::Explicit(explicit)) => {
            let instants: Vec<SystemTime> = explicit.instants.into_iter().map(Into::into).collect();
            Ok(Timebase::List(TimestampList::new(instants)?))
        }
        None => Err(DpError::consistency("timebase carries no payload")),
    }
}

pub fn frame_to_wire(frame: &Frame) -> dp_proto::FrameDescriptor {
    dp_proto::FrameDescriptor {
        label: frame.label.clone(),
        frame_timestamp: Some(frame.frame_timestamp.into()),
        attributes: frame.attributes.clone().into_iter().collect(),
        timebase: Some(timebase_to_wire(&frame.timebase)),
        columns: frame
            .columns
            .iter()
            .map(|c| dp_proto::DataColumn {
                source_name: c.source_name.clone(),
                r#type: scalar_type_to_wire(c.values.scalar_type()) as i32,
                raw_values: encode_column(&c.values),
            })
            .collect(),
    }
}

pub fn frame_from_wire(wire: dp_proto::FrameDescriptor) -> DpResult<Frame> {
    let timebase = timebase_from_wire(
        wire.timebase
            .ok_or_else(|| DpError::consistency("frame descriptor missing timebase"))?,
    )?;
    let row_count = timebase.count() as usize;
    let mut columns = Vec::with_capacity(wire.columns.len());
    for column in wire.columns {
        let scalar_type = scalar_type_from_wire(dp_proto::ScalarType::try_from(column.r#type)
            .map_err(|_| DpError::consistency("unrecognized scalar type tag"))?)?;
        columns.push(FrameColumn {
            source_name: column.source_name,
            values: decode_column(scalar_type, &column.raw_values, row_count)?,
        });
    }
    Frame::new(
        wire.label,
        wire.frame_timestamp.map(Into::into).unwrap_or(std::time::UNIX_EPOCH),
        timebase,
        columns,
    )
    .map(|frame| frame.with_attributes(wire.attributes.into_iter().collect()))
}

/// Wraps a [`Frame`] into the unary/streaming ingest request envelope, with
/// a fresh client request id for the caller to correlate the response
/// against (§4.4).
pub fn frame_to_ingest_request(
    provider_id: &str,
    client_request_id: u64,
    frame: &Frame,
) -> dp_proto::IngestDataRequest {
    dp_proto::IngestDataRequest {
        provider_id: provider_id.to_string(),
        client_request_id,
        frame: Some(frame_to_wire(frame)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UniformClock;

    #[test]
    fn int32_column_round_trips() {
        let column = TypedColumn::Int32(vec![1, -2, 3, i32::MAX, i32::MIN]);
        let raw = encode_column(&column);
        let decoded = decode_column(SupportedType::Int32, &raw, 5).unwrap();
        assert_eq!(decoded, column);
    }

    #[test]
    fn string_column_round_trips() {
        let column = TypedColumn::String(vec!["a".into(), "".into(), "longer value".into()]);
        let raw = encode_column(&column);
        let decoded = decode_column(SupportedType::String, &raw, 3).unwrap();
        assert_eq!(decoded, column);
    }

    #[test]
    fn frame_round_trips_through_wire_descriptor() {
        let timebase = Timebase::Uniform(UniformClock {
            start: std::time::UNIX_EPOCH,
            count: 3,
            period: Duration::from_millis(1),
        });
        let frame = Frame::new(
            "test",
            std::time::UNIX_EPOCH,
            timebase,
            vec![FrameColumn {
                source_name: "sensor.a".into(),
                values: TypedColumn::Float64(vec![1.0, 2.0, 3.0]),
            }],
        )
        .unwrap();
        let wire = frame_to_wire(&frame);
        let round_tripped = frame_from_wire(wire).unwrap();
        assert_eq!(round_tripped.columns, frame.columns);
    }

    #[test]
    fn allocator_is_monotonic() {
        let allocator = ClientRequestIdAllocator::new();
        let a = allocator.next();
        let b = allocator.next();
        assert!(b > a);
    }
}
