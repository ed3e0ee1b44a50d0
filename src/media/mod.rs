//! Media metadata and the media-processing seam.
//!
//! [`MediaTool`] is everything the pipeline needs from ffmpeg: probing a
//! file, joining compatible files without re-encoding, and re-encoding one
//! file to a target format. [`ffmpeg::Ffmpeg`] is the real implementation.

pub mod ffmpeg;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::Result;
use crate::options::EncodeOptions;

/// Container that normalized segments are written in.
pub const NORMALIZED_CONTAINER: &str = "mp4";

/// Audio sample rate every re-encode is resampled to.
pub const NORMALIZED_SAMPLE_RATE: u32 = 48_000;

pub const NORMALIZED_PIXEL_FORMAT: &str = "yuv420p";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width = w.trim().parse::<u32>().map_err(|e| format!("bad width {w:?}: {e}"))?;
        let height = h.trim().parse::<u32>().map_err(|e| format!("bad height {h:?}: {e}"))?;
        if width == 0 || height == 0 {
            return Err(format!("resolution {s:?} has a zero dimension"));
        }
        Ok(Self { width, height })
    }
}

/// What a segment file actually contains, as reported by the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    pub container: String,
    pub resolution: Resolution,
    pub video_codec: String,
    /// `None` when the file carries no audio stream.
    pub audio_codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub pixel_format: Option<String>,
    /// As ffprobe reports it, e.g. `30000/1001`.
    pub frame_rate: Option<String>,
}

impl MediaFormat {
    /// Two segments can be stream-copied together only when every one of
    /// these matches, stream parameters included.
    pub fn concat_compatible(&self, other: &MediaFormat) -> bool {
        self == other
    }

    pub fn frames_per_second(&self) -> Option<f64> {
        self.frame_rate.as_deref().and_then(parse_frame_rate)
    }
}

/// Parses `num/den` or a plain number. Zero and malformed rates are `None`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };

    (value.is_finite() && value > 0.0).then_some(value)
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {}/{} {}Hz {}fps",
            self.container,
            self.resolution,
            self.video_codec,
            self.audio_codec.as_deref().unwrap_or("-"),
            self.sample_rate.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            self.frame_rate.as_deref().unwrap_or("-")
        )
    }
}

/// The common format every segment is re-encoded to.
#[derive(Debug, Clone)]
pub struct EncodeTarget {
    pub resolution: Resolution,
    /// Output frame rate; `None` keeps each source's rate.
    pub frame_rate: Option<String>,
    pub encode: EncodeOptions,
}

impl EncodeTarget {
    /// Whether `format` carries every stream parameter a re-encode to this
    /// target forces: container, resolution, sample rate, pixel format and
    /// an audio track.
    pub fn is_satisfied_by(&self, format: &MediaFormat) -> bool {
        format.container == NORMALIZED_CONTAINER
            && format.resolution == self.resolution
            && format.audio_codec.is_some()
            && format.sample_rate == Some(NORMALIZED_SAMPLE_RATE)
            && format.pixel_format.as_deref() == Some(NORMALIZED_PIXEL_FORMAT)
    }
}

/// Collapses ffprobe's `format_name` list into one stable container name.
pub fn container_name(format_name: &str) -> String {
    let names: Vec<&str> = format_name.split(',').map(str::trim).collect();
    if names.contains(&"mp4") {
        "mp4".to_string()
    } else if names.contains(&"matroska") {
        "matroska".to_string()
    } else {
        names.first().copied().unwrap_or_default().to_string()
    }
}

#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaFormat>;

    /// Joins `inputs` in order into `output` without re-encoding.
    /// `workdir` may be used for scratch files.
    async fn concat(&self, inputs: &[PathBuf], output: &Path, workdir: &Path) -> Result<()>;

    /// Re-encodes one file to `target`. `source` is the probed format of
    /// `input`. `overlay` filters are drawn after scaling, on the target
    /// resolution.
    async fn reencode(
        &self,
        input: &Path,
        source: &MediaFormat,
        output: &Path,
        target: &EncodeTarget,
        overlay: &[String],
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(container: &str, w: u32, h: u32, audio: Option<&str>, rate: Option<u32>) -> MediaFormat {
        MediaFormat {
            container: container.to_string(),
            resolution: Resolution::new(w, h),
            video_codec: "h264".to_string(),
            audio_codec: audio.map(str::to_string),
            sample_rate: rate,
            pixel_format: Some("yuv420p".to_string()),
            frame_rate: Some("30/1".to_string()),
        }
    }

    #[test]
    fn parses_resolution() {
        assert_eq!("1920x1080".parse::<Resolution>(), Ok(Resolution::new(1920, 1080)));
        assert_eq!("640X360".parse::<Resolution>(), Ok(Resolution::new(640, 360)));
        assert!("1920".parse::<Resolution>().is_err());
        assert!("0x720".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn parses_frame_rates() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("fast"), None);
    }

    #[test]
    fn container_name_is_stable() {
        assert_eq!(container_name("mov,mp4,m4a,3gp,3g2,mj2"), "mp4");
        assert_eq!(container_name("matroska,webm"), "matroska");
        assert_eq!(container_name("mpegts"), "mpegts");
    }

    #[test]
    fn target_needs_the_forced_stream_parameters() {
        let target = EncodeTarget {
            resolution: Resolution::new(1280, 720),
            frame_rate: None,
            encode: EncodeOptions::default(),
        };
        assert!(target.is_satisfied_by(&format("mp4", 1280, 720, Some("aac"), Some(48_000))));
        assert!(!target.is_satisfied_by(&format("matroska", 1280, 720, Some("aac"), Some(48_000))));
        assert!(!target.is_satisfied_by(&format("mp4", 1920, 1080, Some("aac"), Some(48_000))));
        assert!(!target.is_satisfied_by(&format("mp4", 1280, 720, None, None)));

        // YouTube m4a audio is 44.1 kHz.
        assert!(!target.is_satisfied_by(&format("mp4", 1280, 720, Some("aac"), Some(44_100))));
    }

    #[test]
    fn sample_rate_breaks_concat_compatibility() {
        let a = format("mp4", 1920, 1080, Some("aac"), Some(48_000));
        let b = format("mp4", 1920, 1080, Some("aac"), Some(44_100));
        assert!(a.concat_compatible(&a.clone()));
        assert!(!a.concat_compatible(&b));
    }
}
