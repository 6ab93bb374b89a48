use bytes::{Buf, BufMut};

use super::{DataType, Sample, SampleValue, TimeRange};
use crate::errors::DecodeError;

/// Element terminator for variable-width (string / json) series on the wire.
const TERMINATOR: u8 = b'\n';

/// A strongly typed, contiguous sample buffer.
///
/// A series is owned by exactly one holder at a time: it is move-only and
/// sharing happens through an explicit [`Series::deep_copy`]. The element
/// type is fixed at construction and no operation changes it.
#[derive(Debug)]
pub struct Series {
    data_type: DataType,
    data: Vec<u8>,
    len: usize,
    /// The time range the samples occupy, when known.
    pub time_range: Option<TimeRange>,
    /// Alignment of the first sample within its upstream domain, when known.
    pub alignment: Option<u64>,
}

impl Default for Series {
    fn default() -> Self {
        Series::new(DataType::F64)
    }
}

impl Series {
    /// An empty series of the given type.
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            data: Vec::new(),
            len: 0,
            time_range: None,
            alignment: None,
        }
    }

    /// A zero-filled series of `len` samples. Variable-width types get `len`
    /// empty elements.
    pub fn zeroed(data_type: DataType, len: usize) -> Self {
        let data = match data_type.density() {
            Some(d) => vec![0u8; len * d],
            None => vec![TERMINATOR; len],
        };
        Self {
            data_type,
            data,
            len,
            time_range: None,
            alignment: None,
        }
    }

    /// An empty series with room for `cap` samples of a fixed-density type.
    pub fn with_capacity(data_type: DataType, cap: usize) -> Self {
        let data = Vec::with_capacity(data_type.density().unwrap_or(1) * cap);
        Self {
            data_type,
            data,
            len: 0,
            time_range: None,
            alignment: None,
        }
    }

    /// Builds a series from a vector of typed samples.
    pub fn from_vec<T: Sample>(values: Vec<T>) -> Self {
        let mut series = Self::with_capacity(T::DATA_TYPE, values.len());
        for v in values {
            series.push(v);
        }
        series
    }

    /// A one-sample series holding `value`.
    pub fn from_sample(value: &SampleValue) -> Self {
        match value {
            SampleValue::U8(v) => Self::from_vec(vec![*v]),
            SampleValue::U16(v) => Self::from_vec(vec![*v]),
            SampleValue::U32(v) => Self::from_vec(vec![*v]),
            SampleValue::U64(v) => Self::from_vec(vec![*v]),
            SampleValue::I8(v) => Self::from_vec(vec![*v]),
            SampleValue::I16(v) => Self::from_vec(vec![*v]),
            SampleValue::I32(v) => Self::from_vec(vec![*v]),
            SampleValue::I64(v) => Self::from_vec(vec![*v]),
            SampleValue::F32(v) => Self::from_vec(vec![*v]),
            SampleValue::F64(v) => Self::from_vec(vec![*v]),
            SampleValue::TimeStamp(v) => Self::from_vec(vec![*v]),
            SampleValue::Str(v) => {
                let mut series = Self::new(DataType::String);
                series.push_str(v);
                series
            }
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Raw sample bytes in wire layout.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn resolve_index(&self, index: isize) -> Option<usize> {
        let len = self.len as isize;
        let adjusted = if index < 0 { len + index } else { index };
        (0..len).contains(&adjusted).then_some(adjusted as usize)
    }

    /// The sample at `index`. Negative indices count from the back. Returns
    /// `None` out of range or when `T` does not match the element type.
    pub fn at<T: Sample>(&self, index: isize) -> Option<T> {
        if self.data_type != T::DATA_TYPE {
            return None;
        }
        let i = self.resolve_index(index)?;
        Some(T::read_le(&self.data[i * T::DENSITY..]))
    }

    /// Overwrites the sample at `index`. Returns whether the write landed.
    pub fn set<T: Sample>(&mut self, index: usize, value: T) -> bool {
        if self.data_type != T::DATA_TYPE || index >= self.len {
            return false;
        }
        value.write_le(&mut self.data[index * T::DENSITY..]);
        true
    }

    /// Appends a sample. Panics if `T` does not match the element type.
    pub fn push<T: Sample>(&mut self, value: T) {
        assert_eq!(
            self.data_type,
            T::DATA_TYPE,
            "pushed sample type does not match series type"
        );
        let offset = self.data.len();
        self.data.resize(offset + T::DENSITY, 0);
        value.write_le(&mut self.data[offset..]);
        self.len += 1;
    }

    /// Appends a variable-width element. Panics on fixed-density series.
    pub fn push_str(&mut self, value: &str) {
        assert!(
            self.data_type.is_variable(),
            "push_str on a fixed-density series"
        );
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(TERMINATOR);
        self.len += 1;
    }

    /// The variable-width element at `index`, negative indices counting from
    /// the back.
    pub fn str_at(&self, index: isize) -> Option<String> {
        if !self.data_type.is_variable() {
            return None;
        }
        let i = self.resolve_index(index)?;
        self.data
            .split(|b| *b == TERMINATOR)
            .nth(i)
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
    }

    /// The most recent sample, if any.
    pub fn latest(&self) -> Option<SampleValue> {
        if self.is_empty() {
            return None;
        }
        Some(match self.data_type {
            DataType::U8 => self.at::<u8>(-1)?.into_sample_value(),
            DataType::U16 => self.at::<u16>(-1)?.into_sample_value(),
            DataType::U32 => self.at::<u32>(-1)?.into_sample_value(),
            DataType::U64 => self.at::<u64>(-1)?.into_sample_value(),
            DataType::I8 => self.at::<i8>(-1)?.into_sample_value(),
            DataType::I16 => self.at::<i16>(-1)?.into_sample_value(),
            DataType::I32 => self.at::<i32>(-1)?.into_sample_value(),
            DataType::I64 => self.at::<i64>(-1)?.into_sample_value(),
            DataType::F32 => self.at::<f32>(-1)?.into_sample_value(),
            DataType::F64 => self.at::<f64>(-1)?.into_sample_value(),
            DataType::TimeStamp => self.at::<super::TimeStamp>(-1)?.into_sample_value(),
            DataType::String | DataType::Json => SampleValue::Str(self.str_at(-1)?),
        })
    }

    /// An owned copy of the series and all of its data.
    pub fn deep_copy(&self) -> Series {
        Series {
            data_type: self.data_type,
            data: self.data.clone(),
            len: self.len,
            time_range: self.time_range,
            alignment: self.alignment,
        }
    }

    /// The half-open sample range `[start, end)` as a new series. `None` on
    /// invalid bounds.
    pub fn slice(&self, start: usize, end: usize) -> Option<Series> {
        if start > end || end > self.len {
            return None;
        }
        match self.data_type.density() {
            Some(d) => {
                let mut out = Series::new(self.data_type);
                out.data = self.data[start * d..end * d].to_vec();
                out.len = end - start;
                Some(out)
            }
            None => {
                let mut out = Series::new(self.data_type);
                for i in start..end {
                    out.push_str(&self.str_at(i as isize)?);
                }
                Some(out)
            }
        }
    }

    /// Drops all samples, keeping the element type and capacity.
    pub fn clear(&mut self) {
        self.data.clear();
        self.len = 0;
        self.time_range = None;
    }

    /// Wire encoding: type name, then the raw sample bytes. Fixed types carry
    /// `len * density` bytes; variable types terminate each element with
    /// `0x0A`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        let name = self.data_type.name();
        buf.put_u8(name.len() as u8);
        buf.put_slice(name.as_bytes());
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
    }

    /// Decodes one series from the wire layout produced by [`Series::encode`].
    pub fn decode(buf: &mut impl Buf) -> Result<Series, DecodeError> {
        if buf.remaining() < 1 {
            return Err(DecodeError::Truncated);
        }
        let name_len = buf.get_u8() as usize;
        if buf.remaining() < name_len {
            return Err(DecodeError::Truncated);
        }
        let mut name = vec![0u8; name_len];
        buf.copy_to_slice(&mut name);
        let name = String::from_utf8_lossy(&name).into_owned();
        let data_type =
            DataType::from_name(&name).ok_or_else(|| DecodeError::UnknownDataType(name))?;
        if buf.remaining() < 4 {
            return Err(DecodeError::Truncated);
        }
        let byte_len = buf.get_u32_le() as usize;
        if buf.remaining() < byte_len {
            return Err(DecodeError::Truncated);
        }
        let mut data = vec![0u8; byte_len];
        buf.copy_to_slice(&mut data);
        let len = match data_type.density() {
            Some(d) => {
                if d != 0 && byte_len % d != 0 {
                    return Err(DecodeError::Misaligned);
                }
                byte_len / d.max(1)
            }
            None => data.iter().filter(|b| **b == TERMINATOR).count(),
        };
        Ok(Series {
            data_type,
            data,
            len,
            time_range: None,
            alignment: None,
        })
    }
}

/// The accumulation of unconsumed series for one channel.
#[derive(Debug, Default)]
pub struct MultiSeries {
    pub series: Vec<Series>,
}

impl MultiSeries {
    /// Total sample count across all series.
    pub fn len(&self) -> usize {
        self.series.iter().map(Series::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.iter().all(Series::is_empty)
    }

    /// The most recent sample across the accumulation.
    pub fn latest(&self) -> Option<SampleValue> {
        self.series.iter().rev().find_map(Series::latest)
    }

    pub fn deep_copy(&self) -> MultiSeries {
        MultiSeries {
            series: self.series.iter().map(Series::deep_copy).collect(),
        }
    }
}
