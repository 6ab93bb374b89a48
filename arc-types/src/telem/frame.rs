use bytes::{Buf, BufMut};

use super::{ChannelKey, Series};
use crate::errors::DecodeError;

/// A batch of `(channel, series)` pairs crossing the runtime boundary.
///
/// Keys and series are parallel arrays and always the same length. A frame
/// pretends to be a set but keys need not be unique; lookups return the first
/// match.
#[derive(Debug, Default)]
pub struct Frame {
    keys: Vec<ChannelKey>,
    series: Vec<Series>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            keys: Vec::with_capacity(cap),
            series: Vec::with_capacity(cap),
        }
    }

    /// A frame holding a single channel and series.
    pub fn single(key: ChannelKey, series: Series) -> Self {
        let mut frame = Self::with_capacity(1);
        frame.push(key, series);
        frame
    }

    /// Moves a series into the frame under `key`.
    pub fn push(&mut self, key: ChannelKey, series: Series) {
        self.keys.push(key);
        self.series.push(series);
    }

    /// Number of `(channel, series)` pairs.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn contains(&self, key: ChannelKey) -> bool {
        self.keys.contains(&key)
    }

    /// The first series stored under `key`.
    pub fn get(&self, key: ChannelKey) -> Option<&Series> {
        self.keys
            .iter()
            .position(|k| *k == key)
            .map(|i| &self.series[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelKey, &Series)> {
        self.keys.iter().copied().zip(self.series.iter())
    }

    pub fn deep_copy(&self) -> Frame {
        Frame {
            keys: self.keys.clone(),
            series: self.series.iter().map(Series::deep_copy).collect(),
        }
    }

    /// Wire encoding: pair count, then each key followed by its encoded
    /// series.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.len() as u32);
        for (key, series) in self.iter() {
            buf.put_u32_le(key);
            series.encode(buf);
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Frame, DecodeError> {
        if buf.remaining() < 4 {
            return Err(DecodeError::Truncated);
        }
        let count = buf.get_u32_le() as usize;
        let mut frame = Frame::with_capacity(count);
        for _ in 0..count {
            if buf.remaining() < 4 {
                return Err(DecodeError::Truncated);
            }
            let key = buf.get_u32_le();
            frame.push(key, Series::decode(buf)?);
        }
        Ok(frame)
    }
}

impl IntoIterator for Frame {
    type Item = (ChannelKey, Series);
    type IntoIter = std::iter::Zip<std::vec::IntoIter<ChannelKey>, std::vec::IntoIter<Series>>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter().zip(self.series)
    }
}
