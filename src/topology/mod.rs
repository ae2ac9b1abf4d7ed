use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One rule describing how a contiguous run of output positions maps
/// onto DMX channel offsets. Channel offsets are 0-based byte offsets
/// into the universe payload; every position consumes three channels
/// (R, G, B).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Segment {
    /// `count` positions mapping one-to-one to consecutive 3-channel
    /// groups starting at `channel`.
    Normal { count: usize, channel: usize },
    /// `half` positions mapping to consecutive groups starting at
    /// `channel`, followed by `half` positions carrying the same
    /// values in reverse order.
    Mirrored { half: usize, channel: usize },
    /// The inner pattern applied `times` times, shifting every channel
    /// offset by `stride` on each repetition.
    Repeated {
        pattern: Vec<Segment>,
        times: usize,
        stride: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Topology {
    pub segments: Vec<Segment>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("topology resolves to {resolved} positions but the strip has {expected} LEDs")]
    CountMismatch { resolved: usize, expected: usize },
}

/// Flat mapping table produced by [`Topology::resolve`]: one channel
/// offset per output position, in strip order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    offsets: Vec<usize>,
}

impl ChannelMap {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }
}

impl Topology {
    /// Expands all segments into a flat per-LED channel map. Done once
    /// at startup so decoding is a straight table walk. A resolved
    /// position count that differs from the physical strip length is a
    /// deployment error and fatal.
    pub fn resolve(&self, led_count: usize) -> Result<ChannelMap, TopologyError> {
        let mut offsets = Vec::with_capacity(led_count);
        for segment in &self.segments {
            segment.expand(0, &mut offsets);
        }

        if offsets.len() != led_count {
            return Err(TopologyError::CountMismatch {
                resolved: offsets.len(),
                expected: led_count,
            });
        }

        Ok(ChannelMap { offsets })
    }
}

impl Segment {
    fn expand(&self, shift: usize, out: &mut Vec<usize>) {
        match self {
            Segment::Normal { count, channel } => {
                for i in 0..*count {
                    out.push(shift + channel + i * 3);
                }
            }
            Segment::Mirrored { half, channel } => {
                for i in 0..*half {
                    out.push(shift + channel + i * 3);
                }
                for i in 0..*half {
                    out.push(shift + channel + (half - 1 - i) * 3);
                }
            }
            Segment::Repeated {
                pattern,
                times,
                stride,
            } => {
                for rep in 0..*times {
                    for segment in pattern {
                        segment.expand(shift + rep * stride, out);
                    }
                }
            }
        }
    }
}
