//! Scalar types, typed columns, and timebases shared by the ingestion and
//! query data models (§3 of the spec this crate implements).

use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};

use crate::error::{DpError, DpResult};

/// The enumerated scalar types a [`crate::frame::Frame`] column or a result
/// table column may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    Timestamp,
    ByteArray,
    Array,
    Structure,
    Image,
}

/// A single scalar value, tagged with its type.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
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
    Timestamp(SystemTime),
    ByteArray(Vec<u8>),
    Array(Vec<ScalarValue>),
    Structure(Vec<(String, ScalarValue)>),
    Image(Vec<u8>),
}

/// A column's values, stored homogeneously by type so decomposition and
/// table materialization can operate on contiguous slices rather than a
/// `Vec<ScalarValue>` per row.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedColumn {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    String(Vec<String>),
    Timestamp(Vec<SystemTime>),
    ByteArray(Vec<Vec<u8>>),
    Array(Vec<Vec<ScalarValue>>),
    Structure(Vec<Vec<(String, ScalarValue)>>),
    Image(Vec<Vec<u8>>),
}

macro_rules! typed_column_dispatch {
    ($self:expr, $pat:ident => $body:expr) => {
        match $self {
            TypedColumn::Bool($pat) => $body,
            TypedColumn::Int8($pat) => $body,
            TypedColumn::Int16($pat) => $body,
            TypedColumn::Int32($pat) => $body,
            TypedColumn::Int64($pat) => $body,
            TypedColumn::UInt8($pat) => $body,
            TypedColumn::UInt16($pat) => $body,
            TypedColumn::UInt32($pat) => $body,
            TypedColumn::UInt64($pat) => $body,
            TypedColumn::Float32($pat) => $body,
            TypedColumn::Float64($pat) => $body,
            TypedColumn::String($pat) => $body,
            TypedColumn::Timestamp($pat) => $body,
            TypedColumn::ByteArray($pat) => $body,
            TypedColumn::Array($pat) => $body,
            TypedColumn::Structure($pat) => $body,
            TypedColumn::Image($pat) => $body,
        }
    };
}

impl TypedColumn {
    pub fn len(&self) -> usize {
        typed_column_dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scalar_type(&self) -> SupportedType {
        match self {
            TypedColumn::Bool(_) => SupportedType::Bool,
            TypedColumn::Int8(_) => SupportedType::Int8,
            TypedColumn::Int16(_) => SupportedType::Int16,
            TypedColumn::Int32(_) => SupportedType::Int32,
            TypedColumn::Int64(_) => SupportedType::Int64,
            TypedColumn::UInt8(_) => SupportedType::UInt8,
            TypedColumn::UInt16(_) => SupportedType::UInt16,
            TypedColumn::UInt32(_) => SupportedType::UInt32,
            TypedColumn::UInt64(_) => SupportedType::UInt64,
            TypedColumn::Float32(_) => SupportedType::Float32,
            TypedColumn::Float64(_) => SupportedType::Float64,
            TypedColumn::String(_) => SupportedType::String,
            TypedColumn::Timestamp(_) => SupportedType::Timestamp,
            TypedColumn::ByteArray(_) => SupportedType::ByteArray,
            TypedColumn::Array(_) => SupportedType::Array,
            TypedColumn::Structure(_) => SupportedType::Structure,
            TypedColumn::Image(_) => SupportedType::Image,
        }
    }

    /// Rough estimate of this column's on-wire byte footprint, used to drive
    /// frame decomposition (§4.2). Deliberately an estimate, not an exact
    /// serialized size.
    pub fn estimated_byte_size(&self) -> usize {
        match self {
            TypedColumn::Bool(v) => v.len(),
            TypedColumn::Int8(v) => v.len(),
            TypedColumn::UInt8(v) => v.len(),
            TypedColumn::Int16(v) => v.len() * 2,
            TypedColumn::UInt16(v) => v.len() * 2,
            TypedColumn::Int32(v) => v.len() * 4,
            TypedColumn::UInt32(v) => v.len() * 4,
            TypedColumn::Float32(v) => v.len() * 4,
            TypedColumn::Int64(v) => v.len() * 8,
            TypedColumn::UInt64(v) => v.len() * 8,
            TypedColumn::Float64(v) => v.len() * 8,
            TypedColumn::Timestamp(v) => v.len() * 12,
            TypedColumn::String(v) => v.iter().map(|s| s.len() + 4).sum(),
            TypedColumn::ByteArray(v) => v.iter().map(|b| b.len() + 4).sum(),
            TypedColumn::Image(v) => v.iter().map(|b| b.len() + 4).sum(),
            TypedColumn::Array(v) => v.iter().map(|a| a.len() * 16 + 4).sum(),
            TypedColumn::Structure(v) => v.iter().map(|s| s.len() * 32 + 4).sum(),
        }
    }

    /// Splits off a contiguous row range `[0, at)` from `[at, len)`, moving
    /// storage rather than cloning it (§10.5: decomposition never mutates a
    /// frame in place, but it does consume one to produce owned slices).
    pub fn split_off_rows(&mut self, at: usize) -> TypedColumn {
        macro_rules! split {
            ($variant:ident, $v:expr) => {
                TypedColumn::$variant($v.split_off(at))
            };
        }
        match self {
            TypedColumn::Bool(v) => split!(Bool, v),
            TypedColumn::Int8(v) => split!(Int8, v),
            TypedColumn::Int16(v) => split!(Int16, v),
            TypedColumn::Int32(v) => split!(Int32, v),
            TypedColumn::Int64(v) => split!(Int64, v),
            TypedColumn::UInt8(v) => split!(UInt8, v),
            TypedColumn::UInt16(v) => split!(UInt16, v),
            TypedColumn::UInt32(v) => split!(UInt32, v),
            TypedColumn::UInt64(v) => split!(UInt64, v),
            TypedColumn::Float32(v) => split!(Float32, v),
            TypedColumn::Float64(v) => split!(Float64, v),
            TypedColumn::String(v) => split!(String, v),
            TypedColumn::Timestamp(v) => split!(Timestamp, v),
            TypedColumn::ByteArray(v) => split!(ByteArray, v),
            TypedColumn::Array(v) => split!(Array, v),
            TypedColumn::Structure(v) => split!(Structure, v),
            TypedColumn::Image(v) => split!(Image, v),
        }
    }

    pub fn get(&self, row: usize) -> Option<ScalarValue> {
        match self {
            TypedColumn::Bool(v) => v.get(row).copied().map(ScalarValue::Bool),
            TypedColumn::Int8(v) => v.get(row).copied().map(ScalarValue::Int8),
            TypedColumn::Int16(v) => v.get(row).copied().map(ScalarValue::Int16),
            TypedColumn::Int32(v) => v.get(row).copied().map(ScalarValue::Int32),
            TypedColumn::Int64(v) => v.get(row).copied().map(ScalarValue::Int64),
            TypedColumn::UInt8(v) => v.get(row).copied().map(ScalarValue::UInt8),
            TypedColumn::UInt16(v) => v.get(row).copied().map(ScalarValue::UInt16),
            TypedColumn::UInt32(v) => v.get(row).copied().map(ScalarValue::UInt32),
            TypedColumn::UInt64(v) => v.get(row).copied().map(ScalarValue::UInt64),
            TypedColumn::Float32(v) => v.get(row).copied().map(ScalarValue::Float32),
            TypedColumn::Float64(v) => v.get(row).copied().map(ScalarValue::Float64),
            TypedColumn::String(v) => v.get(row).cloned().map(ScalarValue::String),
            TypedColumn::Timestamp(v) => v.get(row).copied().map(ScalarValue::Timestamp),
            TypedColumn::ByteArray(v) => v.get(row).cloned().map(ScalarValue::ByteArray),
            TypedColumn::Array(v) => v.get(row).cloned().map(ScalarValue::Array),
            TypedColumn::Structure(v) => v.get(row).cloned().map(ScalarValue::Structure),
            TypedColumn::Image(v) => v.get(row).cloned().map(ScalarValue::Image),
        }
    }
}

/// `{start, count, period}` form of a timebase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformClock {
    pub start: SystemTime,
    pub count: u64,
    pub period: Duration,
}

impl UniformClock {
    pub fn end(&self) -> SystemTime {
        self.start + self.period * self.count as u32
    }

    /// The sub-clock covering rows `[offset, offset + count)`.
    pub fn sub_clock(&self, offset: u64, count: u64) -> UniformClock {
        UniformClock {
            start: self.start + self.period * offset as u32,
            count,
            period: self.period,
        }
    }
}

/// An explicit, strictly increasing sequence of instants.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampList(Vec<SystemTime>);

impl TimestampList {
    pub fn new(instants: Vec<SystemTime>) -> DpResult<Self> {
        if instants.windows(2).any(|w| w[0] >= w[1]) {
            return Err(DpError::consistency(
                "timestamp list must be strictly increasing",
            ));
        }
        Ok(Self(instants))
    }

    pub fn as_slice(&self) -> &[SystemTime] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<SystemTime> {
        self.0
    }
}

/// Either a [`UniformClock`] or a [`TimestampList`]; a frame or sampling
/// block carries exactly one.
#[derive(Debug, Clone, PartialEq)]
pub enum Timebase {
    Uniform(UniformClock),
    List(TimestampList),
}

/// A stable fingerprint used to key correlated blocks by timebase equality
/// (§4.7). Backed by SHA-256 over the defining fields, matching the spec's
/// `hash(start, period, count)` / `hash(first, last, count, structural-hash)`
/// recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimebaseFingerprint([u8; 32]);

impl Timebase {
    pub fn count(&self) -> u64 {
        match self {
            Timebase::Uniform(c) => c.count,
            Timebase::List(l) => l.as_slice().len() as u64,
        }
    }

    pub fn start(&self) -> SystemTime {
        match self {
            Timebase::Uniform(c) => c.start,
            Timebase::List(l) => l
                .as_slice()
                .first()
                .copied()
                .unwrap_or(std::time::UNIX_EPOCH),
        }
    }

    /// The span from the first to the last instant, used as the secondary
    /// sort key for the final correlated-block ordering (§4.7).
    pub fn duration(&self) -> Duration {
        match self {
            Timebase::Uniform(c) => c.period * c.count.saturating_sub(1) as u32,
            Timebase::List(l) => match (l.as_slice().first(), l.as_slice().last()) {
                (Some(first), Some(last)) => last.duration_since(*first).unwrap_or(Duration::ZERO),
                _ => Duration::ZERO,
            },
        }
    }

    pub fn timestamps(&self) -> Vec<SystemTime> {
        match self {
            Timebase::Uniform(c) => (0..c.count)
                .map(|i| c.start + c.period * i as u32)
                .collect(),
            Timebase::List(l) => l.as_slice().to_vec(),
        }
    }

    pub fn fingerprint(&self) -> TimebaseFingerprint {
        let mut hasher = Sha256::new();
        match self {
            Timebase::Uniform(c) => {
                hasher.update(b"uniform");
                hasher.update(
                    c.start
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_nanos()
                        .to_le_bytes(),
                );
                hasher.update(c.period.as_nanos().to_le_bytes());
                hasher.update(c.count.to_le_bytes());
            }
            Timebase::List(l) => {
                hasher.update(b"list");
                let slice = l.as_slice();
                hasher.update((slice.len() as u64).to_le_bytes());
                if let (Some(first), Some(last)) = (slice.first(), slice.last()) {
                    hasher.update(
                        first
                            .duration_since(std::time::UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_nanos()
                            .to_le_bytes(),
                    );
                    hasher.update(
                        last.duration_since(std::time::UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_nanos()
                            .to_le_bytes(),
                    );
                }
                for instant in slice {
                    hasher.update(
                        instant
                            .duration_since(std::time::UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_nanos()
                            .to_le_bytes(),
                    );
                }
            }
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        TimebaseFingerprint(bytes)
    }

    /// Splits this timebase at row index `at`, preserving clock semantics for
    /// a [`UniformClock`] and slicing for a [`TimestampList`] (§4.2 step 2).
    pub fn split_at_row(&self, at: usize) -> (Timebase, Timebase) {
        match self {
            Timebase::Uniform(c) => (
                Timebase::Uniform(c.sub_clock(0, at as u64)),
                Timebase::Uniform(c.sub_clock(at as u64, c.count - at as u64)),
            ),
            Timebase::List(l) => {
                let slice = l.as_slice();
                let left = TimestampList::new(slice[..at].to_vec()).expect("prefix stays ordered");
                let right =
                    TimestampList::new(slice[at..].to_vec()).expect("suffix stays ordered");
                (Timebase::List(left), Timebase::List(right))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_clock_fingerprint_is_stable() {
        let clock = UniformClock {
            start: std::time::UNIX_EPOCH,
            count: 10,
            period: Duration::from_millis(1),
        };
        let a = Timebase::Uniform(clock).fingerprint();
        let b = Timebase::Uniform(clock).fingerprint();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_clocks_fingerprint_differently() {
        let base = UniformClock {
            start: std::time::UNIX_EPOCH,
            count: 10,
            period: Duration::from_millis(1),
        };
        let other = UniformClock {
            count: 11,
            ..base
        };
        assert_ne!(
            Timebase::Uniform(base).fingerprint(),
            Timebase::Uniform(other).fingerprint()
        );
    }

    #[test]
    fn timestamp_list_rejects_non_increasing_input() {
        let now = std::time::UNIX_EPOCH;
        let err = TimestampList::new(vec![now, now]);
        assert!(err.is_err());
    }

    #[test]
    fn uniform_clock_splits_preserve_period() {
        let clock = UniformClock {
            start: std::time::UNIX_EPOCH,
            count: 10,
            period: Duration::from_millis(1),
        };
        let (left, right) = Timebase::Uniform(clock).split_at_row(4);
        assert_eq!(left.count(), 4);
        assert_eq!(right.count(), 6);
        assert_eq!(right.start(), clock.start + clock.period * 4);
    }
}
