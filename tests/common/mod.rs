//! In-process stand-ins for yt-dlp and ffmpeg.
//!
//! Segment files are small text files: the first line is a label
//! (`<video>:<start>-<end>`), the last line the format the fake probe
//! reports (`<container> <WxH> <video codec> <audio codec> [sample rate]`).
//! The sample rate defaults to 48000.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use highlights_rs::error::{Error, FetchErrorKind, Result};
use highlights_rs::fetch::{ClipRequest, Retriever};
use highlights_rs::manifest::{Clip, Manifest};
use highlights_rs::media::{EncodeTarget, MediaFormat, MediaTool, Resolution};

pub const HD: &str = "mp4 1920x1080 h264 aac";

pub fn write_manifest(dir: &Path, name: &str, video_id: &str, clips: &[(f64, f64)]) -> PathBuf {
    let manifest = Manifest {
        source_video_id: video_id.to_string(),
        title: None,
        team1: None,
        team2: None,
        clips: clips.iter().map(|&(s, e)| Clip::new(s, e)).collect(),
    };
    save_manifest(dir, name, &manifest)
}

pub fn save_manifest(dir: &Path, name: &str, manifest: &Manifest) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, manifest.to_json().unwrap()).unwrap();
    path
}

/// Names of everything left in `dir` that looks like a run's working
/// directory.
pub fn leftover_workdirs(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(".highlights-"))
        .collect()
}

fn label(request: &ClipRequest) -> String {
    format!(
        "{}:{}-{}",
        request.video_id, request.clip.start_seconds, request.clip.end_seconds
    )
}

#[derive(Default)]
pub struct FakeRetriever {
    formats: HashMap<String, String>,
    permanent: HashMap<String, FetchErrorKind>,
    flaky: Mutex<HashMap<String, usize>>,
    attempts: Mutex<Vec<String>>,
    /// Delay later clips less, so completion order is the reverse of
    /// request order.
    reverse_delays: bool,
}

impl FakeRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, video_id: &str, format: &str) -> Self {
        self.formats.insert(video_id.to_string(), format.to_string());
        self
    }

    pub fn failing(mut self, video_id: &str, kind: FetchErrorKind) -> Self {
        self.permanent.insert(video_id.to_string(), kind);
        self
    }

    /// The first `times` attempts for `video_id` fail with a network error.
    pub fn flaky(self, video_id: &str, times: usize) -> Self {
        self.flaky.lock().unwrap().insert(video_id.to_string(), times);
        self
    }

    pub fn with_reverse_delays(mut self) -> Self {
        self.reverse_delays = true;
        self
    }

    pub fn attempts_for(&self, video_id: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.as_str() == video_id)
            .count()
    }
}

#[async_trait]
impl Retriever for FakeRetriever {
    async fn retrieve(&self, request: &ClipRequest, dir: &Path, stem: &str) -> Result<PathBuf> {
        self.attempts.lock().unwrap().push(request.video_id.clone());

        if self.reverse_delays {
            let wait = 5 * (20usize.saturating_sub(request.id.manifest * 5 + request.id.clip)) as u64;
            tokio::time::sleep(Duration::from_millis(wait)).await;
        }

        if let Some(kind) = self.permanent.get(&request.video_id) {
            return Err(Error::fetch(&request.video_id, *kind, "scripted failure"));
        }

        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(left) = flaky.get_mut(&request.video_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(Error::fetch(&request.video_id, FetchErrorKind::Network, "connection reset"));
                }
            }
        }

        let format = self
            .formats
            .get(&request.video_id)
            .cloned()
            .unwrap_or_else(|| HD.to_string());
        let path = dir.join(format!("{stem}.mp4"));
        std::fs::write(&path, format!("{}\n{}", label(request), format))?;
        Ok(path)
    }
}

#[derive(Default)]
pub struct FakeMedia {
    /// Number of upcoming concat calls that fail.
    concat_failures: Mutex<usize>,
    /// Labels containing this never re-encode.
    broken_label: Option<String>,
    concat_calls: Mutex<Vec<Vec<String>>>,
    concat_formats: Mutex<Vec<Vec<String>>>,
    reencodes: Mutex<Vec<String>>,
    overlays: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_concat(self, times: usize) -> Self {
        *self.concat_failures.lock().unwrap() = times;
        self
    }

    pub fn broken_reencode(mut self, label_part: &str) -> Self {
        self.broken_label = Some(label_part.to_string());
        self
    }

    /// Labels passed to each concat call, in order.
    pub fn concat_calls(&self) -> Vec<Vec<String>> {
        self.concat_calls.lock().unwrap().clone()
    }

    pub fn concat_formats(&self) -> Vec<Vec<String>> {
        self.concat_formats.lock().unwrap().clone()
    }

    pub fn reencoded(&self) -> Vec<String> {
        self.reencodes.lock().unwrap().clone()
    }

    /// Label and overlay filters of every re-encode that drew something.
    pub fn overlays(&self) -> Vec<(String, Vec<String>)> {
        self.overlays.lock().unwrap().clone()
    }
}

fn read_segment(path: &Path) -> Result<(String, String)> {
    let text = std::fs::read_to_string(path)?;
    let mut lines = text.lines();
    let label = lines.next().unwrap_or_default().to_string();
    let format = lines.last().unwrap_or_default().to_string();
    Ok((label, format))
}

fn parse_format(line: &str) -> Result<MediaFormat> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 4 && parts.len() != 5 {
        return Err(Error::tool("fake-probe", format!("bad format line {line:?}")));
    }
    let resolution: Resolution = parts[1]
        .parse()
        .map_err(|e: String| Error::tool("fake-probe", e))?;
    let sample_rate = match parts.get(4) {
        Some(rate) => rate
            .parse()
            .map_err(|_| Error::tool("fake-probe", format!("bad sample rate {rate:?}")))?,
        None => 48_000,
    };
    Ok(MediaFormat {
        container: parts[0].to_string(),
        resolution,
        video_codec: parts[2].to_string(),
        audio_codec: Some(parts[3].to_string()),
        sample_rate: Some(sample_rate),
        pixel_format: Some("yuv420p".to_string()),
        frame_rate: Some("30/1".to_string()),
    })
}

#[async_trait]
impl MediaTool for FakeMedia {
    async fn probe(&self, path: &Path) -> Result<MediaFormat> {
        let (_, format) = read_segment(path)?;
        parse_format(&format)
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path, _workdir: &Path) -> Result<()> {
        let mut labels = Vec::new();
        let mut formats = Vec::new();
        for input in inputs {
            let (label, format) = read_segment(input)?;
            labels.push(label);
            formats.push(format);
        }
        self.concat_calls.lock().unwrap().push(labels.clone());
        self.concat_formats.lock().unwrap().push(formats.clone());

        {
            let mut failures = self.concat_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::tool("fake-ffmpeg", "Non-monotonic DTS"));
            }
        }

        if formats.windows(2).any(|w| w[0] != w[1]) {
            return Err(Error::tool("fake-ffmpeg", "stream parameters differ"));
        }

        std::fs::write(output, labels.join("\n"))?;
        Ok(())
    }

    async fn reencode(
        &self,
        input: &Path,
        _source: &MediaFormat,
        output: &Path,
        target: &EncodeTarget,
        overlay: &[String],
    ) -> Result<()> {
        let (label, _) = read_segment(input)?;
        self.reencodes.lock().unwrap().push(label.clone());
        if !overlay.is_empty() {
            self.overlays.lock().unwrap().push((label.clone(), overlay.to_vec()));
        }

        if let Some(broken) = &self.broken_label {
            if label.contains(broken.as_str()) {
                return Err(Error::tool("fake-ffmpeg", "Invalid data found when processing input"));
            }
        }

        std::fs::write(output, format!("{}\nmp4 {} h264 aac", label, target.resolution))?;
        Ok(())
    }
}
