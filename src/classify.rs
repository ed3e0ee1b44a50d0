use std::fmt;

use crate::fetch::SegmentFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Every segment shares container, resolution, codecs and stream
    /// parameters.
    DirectConcat,
    NormalizeRequired,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Classification::DirectConcat => write!(f, "direct concat"),
            Classification::NormalizeRequired => write!(f, "normalize required"),
        }
    }
}

/// Decides whether `segments` can be joined by stream copy. Any difference
/// in container, resolution, codec, sample rate, pixel format or frame rate
/// means they cannot.
pub fn classify(segments: &[SegmentFile]) -> Classification {
    let Some(first) = segments.first() else {
        return Classification::DirectConcat;
    };

    if segments
        .iter()
        .all(|segment| segment.format.concat_compatible(&first.format))
    {
        Classification::DirectConcat
    } else {
        Classification::NormalizeRequired
    }
}
