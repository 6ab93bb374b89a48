//! Telemetry primitives: typed sample buffers and the batches that carry them.

mod frame;
mod series;

pub use frame::Frame;
pub use series::{MultiSeries, Series};

use serde::{Deserialize, Serialize};

/// Identifier of an external telemetry channel.
pub type ChannelKey = u32;

/// A nanosecond-precision UTC instant.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeStamp(pub i64);

impl TimeStamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    pub fn nanos(&self) -> i64 {
        self.0
    }
}

/// A signed nanosecond duration.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeSpan(pub i64);

pub const MICROSECOND: TimeSpan = TimeSpan(1_000);
pub const MILLISECOND: TimeSpan = TimeSpan(1_000_000);
pub const SECOND: TimeSpan = TimeSpan(1_000_000_000);

impl std::ops::Mul<TimeSpan> for i64 {
    type Output = TimeSpan;

    fn mul(self, rhs: TimeSpan) -> TimeSpan {
        TimeSpan(self * rhs.0)
    }
}

impl std::ops::Add<TimeSpan> for TimeStamp {
    type Output = TimeStamp;

    fn add(self, rhs: TimeSpan) -> TimeStamp {
        TimeStamp(self.0 + rhs.0)
    }
}

/// A half-open `[start, end)` range of timestamps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimeStamp,
    pub end: TimeStamp,
}

/// The element type of a [`Series`].
///
/// Fixed-density types carry a byte size per sample; `String` and `Json` are
/// variable-width and use a newline terminator on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    TimeStamp,
    String,
    Json,
}

impl DataType {
    /// Bytes per sample, or `None` for variable-width types.
    pub fn density(&self) -> Option<usize> {
        match self {
            DataType::U8 | DataType::I8 => Some(1),
            DataType::U16 | DataType::I16 => Some(2),
            DataType::U32 | DataType::I32 | DataType::F32 => Some(4),
            DataType::U64 | DataType::I64 | DataType::F64 | DataType::TimeStamp => Some(8),
            DataType::String | DataType::Json => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        self.density().is_none()
    }

    /// The on-wire name of the type.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::U8 => "uint8",
            DataType::U16 => "uint16",
            DataType::U32 => "uint32",
            DataType::U64 => "uint64",
            DataType::I8 => "int8",
            DataType::I16 => "int16",
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
            DataType::TimeStamp => "timestamp",
            DataType::String => "string",
            DataType::Json => "json",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "uint8" => DataType::U8,
            "uint16" => DataType::U16,
            "uint32" => DataType::U32,
            "uint64" => DataType::U64,
            "int8" => DataType::I8,
            "int16" => DataType::I16,
            "int32" => DataType::I32,
            "int64" => DataType::I64,
            "float32" => DataType::F32,
            "float64" => DataType::F64,
            "timestamp" => DataType::TimeStamp,
            "string" => DataType::String,
            "json" => DataType::Json,
            _ => return None,
        })
    }
}

/// A single dynamically typed sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SampleValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    TimeStamp(TimeStamp),
    Str(String),
}

macro_rules! sample_value_casts {
    ($(($fn:ident, $t:ty)),* $(,)?) => {
        impl SampleValue {
            $(
                /// Numeric cast to the target type; strings cast to the
                /// type's default.
                pub fn $fn(&self) -> $t {
                    match self {
                        SampleValue::U8(v) => *v as $t,
                        SampleValue::U16(v) => *v as $t,
                        SampleValue::U32(v) => *v as $t,
                        SampleValue::U64(v) => *v as $t,
                        SampleValue::I8(v) => *v as $t,
                        SampleValue::I16(v) => *v as $t,
                        SampleValue::I32(v) => *v as $t,
                        SampleValue::I64(v) => *v as $t,
                        SampleValue::F32(v) => *v as $t,
                        SampleValue::F64(v) => *v as $t,
                        SampleValue::TimeStamp(v) => v.0 as $t,
                        SampleValue::Str(_) => <$t>::default(),
                    }
                }
            )*
        }
    };
}

sample_value_casts!(
    (as_u8, u8),
    (as_u16, u16),
    (as_u32, u32),
    (as_u64, u64),
    (as_i8, i8),
    (as_i16, i16),
    (as_i32, i32),
    (as_i64, i64),
    (as_f32, f32),
    (as_f64, f64),
);

impl SampleValue {
    pub fn data_type(&self) -> DataType {
        match self {
            SampleValue::U8(_) => DataType::U8,
            SampleValue::U16(_) => DataType::U16,
            SampleValue::U32(_) => DataType::U32,
            SampleValue::U64(_) => DataType::U64,
            SampleValue::I8(_) => DataType::I8,
            SampleValue::I16(_) => DataType::I16,
            SampleValue::I32(_) => DataType::I32,
            SampleValue::I64(_) => DataType::I64,
            SampleValue::F32(_) => DataType::F32,
            SampleValue::F64(_) => DataType::F64,
            SampleValue::TimeStamp(_) => DataType::TimeStamp,
            SampleValue::Str(_) => DataType::String,
        }
    }
}

/// A fixed-density element type that can live in a [`Series`] buffer.
///
/// Samples are stored little-endian regardless of host byte order, which is
/// also the wire layout.
pub trait Sample:
    Copy + Default + PartialEq + PartialOrd + Send + Sync + std::fmt::Debug + 'static
{
    const DATA_TYPE: DataType;
    const DENSITY: usize;

    fn write_le(&self, out: &mut [u8]);
    fn read_le(buf: &[u8]) -> Self;
    fn into_sample_value(self) -> SampleValue;
}

macro_rules! impl_sample {
    ($($t:ty => $dt:ident),* $(,)?) => {
        $(
            impl Sample for $t {
                const DATA_TYPE: DataType = DataType::$dt;
                const DENSITY: usize = std::mem::size_of::<$t>();

                fn write_le(&self, out: &mut [u8]) {
                    out[..Self::DENSITY].copy_from_slice(&self.to_le_bytes());
                }

                fn read_le(buf: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&buf[..Self::DENSITY]);
                    <$t>::from_le_bytes(raw)
                }

                fn into_sample_value(self) -> SampleValue {
                    SampleValue::$dt(self)
                }
            }
        )*
    };
}

impl_sample!(
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
);

impl Sample for TimeStamp {
    const DATA_TYPE: DataType = DataType::TimeStamp;
    const DENSITY: usize = 8;

    fn write_le(&self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.0.to_le_bytes());
    }

    fn read_le(buf: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[..8]);
        TimeStamp(i64::from_le_bytes(raw))
    }

    fn into_sample_value(self) -> SampleValue {
        SampleValue::TimeStamp(self)
    }
}
