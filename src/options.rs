use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::media::Resolution;
use crate::overlay::ScoreboardOptions;

/// How the normalizer picks the common output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetPolicy {
    /// Largest resolution observed across all segments.
    #[default]
    Max,
    Fixed(Resolution),
}

impl FromStr for TargetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("max") {
            return Ok(TargetPolicy::Max);
        }

        s.parse::<Resolution>().map(TargetPolicy::Fixed)
    }
}

impl fmt::Display for TargetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TargetPolicy::Max => write!(f, "max"),
            TargetPolicy::Fixed(resolution) => write!(f, "{}", resolution),
        }
    }
}

/// Encoder settings used whenever segments have to be re-encoded.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub video_codec: String,
    pub audio_codec: String,
    pub crf: u32,
    pub preset: String,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            crf: 23,
            preset: "fast".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub max_parallel_downloads: usize,
    pub max_download_retries: usize,
    pub max_height: u32,
    pub target: TargetPolicy,
    pub encode: EncodeOptions,
    pub output: PathBuf,
    pub keep_temp: bool,
    /// Burn a scoreboard into every clip. Forces every segment through a
    /// re-encode.
    pub scoreboard: Option<ScoreboardOptions>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_parallel_downloads: 4,
            max_download_retries: 1,
            max_height: 1080,
            target: TargetPolicy::Max,
            encode: EncodeOptions::default(),
            output: PathBuf::from("Final_Highlights.mp4"),
            keep_temp: false,
            scoreboard: None,
        }
    }
}
