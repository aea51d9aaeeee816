use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Size of the logical channel space. Every configured channel index must be
/// below this value.
pub const MAX_CHANNELS: usize = 524_288;

/// Immutable snapshot of the channel buffer for one tick.
///
/// Cloning is a reference count bump, so synchronous outputs read the same
/// bytes the producer wrote and threaded outputs can keep the snapshot alive
/// on their worker without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Arc<[u8]>);

impl Frame {
    /// An all-zero frame of `len` channels
    pub fn blank(len: usize) -> Self {
        Frame(vec![0u8; len].into())
    }

    /// Channel value, or 0 for channels past the end of the snapshot
    #[inline]
    pub fn channel(&self, index: usize) -> u8 {
        self.0.get(index).copied().unwrap_or(0)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Frame(data.into())
    }
}

impl From<&[u8]> for Frame {
    fn from(data: &[u8]) -> Self {
        Frame(data.into())
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({} channels)", self.0.len())
    }
}

/// Inclusive range of channels an output reads from the frame.
///
/// The empty range is the sentinel `min = MAX_CHANNELS, max = 0`, meaning
/// "no requirement".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRange {
    pub min: usize,
    pub max: usize,
}

impl ChannelRange {
    pub const EMPTY: ChannelRange = ChannelRange {
        min: MAX_CHANNELS,
        max: 0,
    };

    /// Range covering `count` channels starting at `start`
    pub fn span(start: usize, count: usize) -> Self {
        if count == 0 {
            return Self::EMPTY;
        }
        ChannelRange {
            min: start,
            max: start + count - 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    /// Widen the range to include `channel`. Indices outside the channel
    /// space are ignored.
    pub fn include(&mut self, channel: usize) {
        if channel < MAX_CHANNELS {
            self.min = self.min.min(channel);
            self.max = self.max.max(channel);
        }
    }

    /// Smallest range covering both
    pub fn union(self, other: ChannelRange) -> ChannelRange {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        ChannelRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

impl Default for ChannelRange {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl FromIterator<usize> for ChannelRange {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut range = ChannelRange::EMPTY;
        for channel in iter {
            range.include(channel);
        }
        range
    }
}

impl fmt::Display for ChannelRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}
