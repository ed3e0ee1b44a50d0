//! Reading and validating highlight manifests.
//!
//! A manifest is the JSON document exported by the marking UI: one source
//! video plus the ordered list of clips to cut from it. The exporter's own
//! field names (`videoId`, `segments`, `start`, `end`) are accepted next to
//! the canonical ones.
//!
//! Team names and per-clip score states are optional and only used when a
//! scoreboard is drawn onto the clips.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Running score at the end of a clip.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScoreState {
    pub t1: u32,
    pub t2: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Clip {
    #[serde(alias = "start")]
    pub start_seconds: f64,
    #[serde(alias = "end")]
    pub end_seconds: f64,
    #[serde(alias = "scoreState", default, skip_serializing_if = "Option::is_none")]
    pub score_state: Option<ScoreState>,
}

impl Clip {
    pub fn new(start_seconds: f64, end_seconds: f64) -> Self {
        Self {
            start_seconds,
            end_seconds,
            score_state: None,
        }
    }

    pub fn with_score(mut self, t1: u32, t2: u32) -> Self {
        self.score_state = Some(ScoreState { t1, t2 });
        self
    }

    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    fn check(&self) -> std::result::Result<(), String> {
        if !self.start_seconds.is_finite() || !self.end_seconds.is_finite() {
            return Err("timestamps must be finite numbers".to_string());
        }
        if self.start_seconds < 0.0 {
            return Err(format!("start {} is negative", self.start_seconds));
        }
        if self.end_seconds <= self.start_seconds {
            return Err(format!(
                "end {} is not after start {}",
                self.end_seconds, self.start_seconds
            ));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Manifest {
    #[serde(alias = "videoId")]
    pub source_video_id: String,
    #[serde(alias = "videoTitle", default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team2: Option<String>,
    #[serde(alias = "segments")]
    pub clips: Vec<Clip>,
}

impl Manifest {
    /// Parses and validates a manifest document. `path` is only used for
    /// error reporting.
    pub fn from_json(json: &str, path: &Path) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(json).map_err(|err| Error::ManifestParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        manifest.validate(path)?;

        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self, path: &Path) -> Result<()> {
        if self.source_video_id.trim().is_empty() {
            return Err(Error::ManifestParse {
                path: path.to_path_buf(),
                message: "source_video_id is empty".to_string(),
            });
        }

        for (index, clip) in self.clips.iter().enumerate() {
            clip.check().map_err(|reason| Error::InvalidClip {
                path: path.to_path_buf(),
                index,
                reason,
            })?;
        }

        Ok(())
    }

    /// Name shown in progress output.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.source_video_id)
    }
}

/// One manifest file found on disk together with its parse outcome.
#[derive(Debug)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub manifest: Result<Manifest>,
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let json = std::fs::read_to_string(path).map_err(|err| Error::ManifestParse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    Manifest::from_json(&json, path)
}

/// Lists the `.json` files directly inside `dir`, sorted by file name.
pub fn manifest_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_manifest_file(&path) {
            paths.push(path);
        }
    }

    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    Ok(paths)
}

/// Loads every manifest in `dir`. A broken file becomes a failed entry; it
/// never stops the others from loading.
pub fn load_dir(dir: &Path) -> Result<Vec<ManifestEntry>> {
    let entries = manifest_paths(dir)?
        .into_iter()
        .map(|path| {
            let manifest = load_manifest(&path);
            ManifestEntry { path, manifest }
        })
        .collect();

    Ok(entries)
}

/// Accepts either a folder of manifests or a single manifest file.
pub fn load_path(path: &Path) -> Result<Vec<ManifestEntry>> {
    if path.is_dir() {
        return load_dir(path);
    }

    if path.is_file() {
        let manifest = load_manifest(path);
        return Ok(vec![ManifestEntry {
            path: path.to_path_buf(),
            manifest,
        }]);
    }

    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )))
}

fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
