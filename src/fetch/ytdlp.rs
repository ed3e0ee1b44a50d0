//! [`Retriever`] backed by `yt-dlp`, downloading only the requested section.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{ClipRequest, Retriever};
use crate::error::{Error, FetchErrorKind, Result};
use crate::tool::ToolCommand;

const WATCH_URL: &str = "https://www.youtube.com/watch";

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    max_height: u32,
}

impl YtDlp {
    pub fn new(program: PathBuf, max_height: u32) -> Self {
        Self { program, max_height }
    }

    fn format_selector(&self) -> String {
        format!(
            "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/best[height<={h}][ext=mp4]/best",
            h = self.max_height
        )
    }
}

#[async_trait]
impl Retriever for YtDlp {
    async fn retrieve(&self, request: &ClipRequest, dir: &Path, stem: &str) -> Result<PathBuf> {
        let url = video_url(&request.video_id)
            .map_err(|e| Error::fetch(&request.video_id, FetchErrorKind::Unavailable, e))?;
        let template = dir.join(format!("{stem}.%(ext)s"));

        // A failed attempt may have left a truncated file under the final name.
        remove_stale(dir, stem)?;

        let mut cmd = ToolCommand::new(&self.program);
        cmd.args(["--quiet", "--no-warnings", "--no-playlist", "--no-part"])
            .args(["--force-overwrites", "--force-keyframes-at-cuts"])
            .arg("-f")
            .arg(self.format_selector())
            .arg("--download-sections")
            .arg(section(request.clip.start_seconds, request.clip.end_seconds))
            .arg("-o")
            .path_arg(&template)
            .arg(url.as_str());

        if let Err(err) = cmd.execute().await {
            let message = err.to_string();
            return Err(Error::fetch(&request.video_id, classify_failure(&message), message));
        }

        find_output(dir, stem)?.ok_or_else(|| {
            Error::fetch(
                &request.video_id,
                FetchErrorKind::OutOfRange,
                format!("yt-dlp produced no file for {stem}"),
            )
        })
    }
}

/// Watch URL for a video id. Ids that already are URLs pass through.
pub fn video_url(video_id: &str) -> std::result::Result<Url, String> {
    if let Ok(url) = Url::parse(video_id) {
        if url.scheme() == "http" || url.scheme() == "https" {
            return Ok(url);
        }
    }

    Url::parse_with_params(WATCH_URL, &[("v", video_id)]).map_err(|e| e.to_string())
}

/// `--download-sections` value for a time range in seconds.
pub fn section(start: f64, end: f64) -> String {
    format!("*{:.3}-{:.3}", start, end)
}

/// Sorts a yt-dlp failure message into a [`FetchErrorKind`].
pub fn classify_failure(message: &str) -> FetchErrorKind {
    let message = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if any(&[
        "available in your country",
        "blocked it in your country",
        "geo restrict",
        "sign in to confirm",
        "age-restricted",
        "members-only",
        "join this channel",
        "embedding disabled",
        "playback on other websites has been disabled",
    ]) {
        FetchErrorKind::Restricted
    } else if any(&[
        "video unavailable",
        "private video",
        "has been removed",
        "account associated with this video has been terminated",
        "this video is not available",
        "does not exist",
        "http error 404",
        "incomplete youtube id",
    ]) {
        FetchErrorKind::Unavailable
    } else if any(&[
        "timed out",
        "connection reset",
        "connection refused",
        "temporary failure in name resolution",
        "name or service not known",
        "network is unreachable",
        "unable to download",
        "http error 5",
        "read timed out",
        "remote end closed connection",
    ]) {
        FetchErrorKind::Network
    } else if any(&["out of range", "invalid start", "no video formats"]) {
        FetchErrorKind::OutOfRange
    } else {
        FetchErrorKind::Tool
    }
}

/// Every file in `dir` named `<stem>.<anything>`.
fn files_for(dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    let prefix = format!("{stem}.");
    let mut found = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => continue,
        };
        if name.starts_with(&prefix) {
            found.push(path);
        }
    }

    found.sort();
    Ok(found)
}

fn remove_stale(dir: &Path, stem: &str) -> Result<()> {
    for path in files_for(dir, stem)? {
        debug!(path = %path.display(), "removing leftover from earlier attempt");
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

/// Looks for the finished file yt-dlp wrote for `stem`, whatever extension
/// it picked.
fn find_output(dir: &Path, stem: &str) -> Result<Option<PathBuf>> {
    Ok(files_for(dir, stem)?.into_iter().find(|path| {
        let name = path.to_string_lossy();
        !name.ends_with(".part") && !name.ends_with(".ytdl")
    }))
}
