//! [`MediaTool`] backed by the `ffmpeg` and `ffprobe` command-line tools.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{
    container_name, EncodeTarget, MediaFormat, MediaTool, Resolution, NORMALIZED_PIXEL_FORMAT,
    NORMALIZED_SAMPLE_RATE,
};
use crate::error::{Error, Result};
use crate::tool::ToolCommand;

const CONCAT_LIST_NAME: &str = "concat_list.txt";

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Ffmpeg {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self { ffmpeg, ffprobe }
    }
}

#[async_trait]
impl MediaTool for Ffmpeg {
    async fn probe(&self, path: &Path) -> Result<MediaFormat> {
        let mut cmd = ToolCommand::new(&self.ffprobe);
        cmd.args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .path_arg(path);

        let output = cmd.execute().await?;
        parse_probe_output(&output.stdout)
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path, workdir: &Path) -> Result<()> {
        let list_path = workdir.join(CONCAT_LIST_NAME);
        tokio::fs::write(&list_path, concat_list(inputs)?).await?;
        debug!(list = %list_path.display(), segments = inputs.len(), "wrote concat list");

        let mut cmd = ToolCommand::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .path_arg(&list_path)
            .args(["-c", "copy"])
            .path_arg(output);

        let result = cmd.execute().await;
        let _ = tokio::fs::remove_file(&list_path).await;
        result.map(|_| ())
    }

    async fn reencode(
        &self,
        input: &Path,
        source: &MediaFormat,
        output: &Path,
        target: &EncodeTarget,
        overlay: &[String],
    ) -> Result<()> {
        let mut cmd = ToolCommand::new(&self.ffmpeg);
        cmd.args(reencode_args(input, source.audio_codec.is_some(), output, target, overlay));
        cmd.execute().await.map(|_| ())
    }
}

/// Builds the concat demuxer input: one `file '<absolute path>'` line per
/// segment, in order.
pub fn concat_list(inputs: &[PathBuf]) -> Result<String> {
    let mut list = String::new();
    for input in inputs {
        let absolute = std::path::absolute(input)?;
        let escaped = absolute.to_string_lossy().replace('\'', "'\\''");
        list.push_str(&format!("file '{}'\n", escaped));
    }
    Ok(list)
}

fn reencode_args(
    input: &Path,
    has_audio: bool,
    output: &Path,
    target: &EncodeTarget,
    overlay: &[String],
) -> Vec<String> {
    let Resolution { width, height } = target.resolution;
    let mut filter = format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1"
    );
    for extra in overlay {
        filter.push(',');
        filter.push_str(extra);
    }

    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().to_string(),
    ];

    if has_audio {
        args.extend(["-map", "0:v:0", "-map", "0:a:0"].map(String::from));
    } else {
        // Silent track so every normalized segment has the same stream layout.
        args.extend(
            [
                "-f",
                "lavfi",
                "-i",
                "anullsrc=channel_layout=stereo:sample_rate=48000",
                "-map",
                "0:v:0",
                "-map",
                "1:a:0",
                "-shortest",
            ]
            .map(String::from),
        );
    }

    args.extend(["-vf".to_string(), filter]);
    if let Some(rate) = &target.frame_rate {
        args.extend(["-r".to_string(), rate.clone()]);
    }

    args.extend([
        "-c:v".to_string(),
        target.encode.video_codec.clone(),
        "-preset".to_string(),
        target.encode.preset.clone(),
        "-crf".to_string(),
        target.encode.crf.to_string(),
        "-pix_fmt".to_string(),
        NORMALIZED_PIXEL_FORMAT.to_string(),
        "-c:a".to_string(),
        target.encode.audio_codec.clone(),
        "-ar".to_string(),
        NORMALIZED_SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        "2".to_string(),
        output.to_string_lossy().to_string(),
    ]);

    args
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    /// ffprobe prints this as a string.
    sample_rate: Option<String>,
}

fn parse_probe_output(json: &str) -> Result<MediaFormat> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| Error::tool("ffprobe", format!("unreadable output: {e}")))?;

    let container = container_name(probe.format.format_name.as_deref().unwrap_or_default());

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| Error::tool("ffprobe", "no video stream"))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(Error::tool("ffprobe", "video stream has no dimensions")),
    };

    let audio = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(MediaFormat {
        container,
        resolution: Resolution::new(width, height),
        video_codec: video.codec_name.clone().unwrap_or_default(),
        audio_codec: audio.and_then(|s| s.codec_name.clone()),
        sample_rate: audio
            .and_then(|s| s.sample_rate.as_deref())
            .and_then(|r| r.parse().ok()),
        pixel_format: video.pix_fmt.clone(),
        frame_rate: video.r_frame_rate.clone(),
    })
}
