//! Runs the whole job: load manifests, fetch clips, classify, normalize if
//! needed, assemble, clean up.
//!
//! A run moves through [`RunState`]s:
//!
//! ```text
//! Loading -> Fetching -> Classifying -> (Normalizing) -> Assembling -> Done
//!                                            ^               |
//!                                            +---- once -----+
//! ```
//!
//! The back edge is the re-encode fallback. It is taken at most once, and
//! only when a direct join failed. Any other failure ends in `Failed`.
//! Drawing a scoreboard needs a re-encode, so it always goes through
//! `Normalizing`.
//! Manifests fail independently; a manifest that fails is left out of the
//! output while the others carry on.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::assemble::assemble;
use crate::classify::{classify, Classification};
use crate::error::{Error, Result};
use crate::fetch::{fetch_all, ClipId, ClipRequest, FetchOutcome, FetchSettings, Retriever, SegmentFile};
use crate::manifest::{self, ManifestEntry};
use crate::media::MediaTool;
use crate::normalize::{normalize_all, select_target};
use crate::options::Options;
use crate::overlay::{self, Scoreboard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Loading,
    Fetching,
    Classifying,
    Normalizing,
    Assembling,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (Loading, Fetching)
                | (Fetching, Classifying)
                | (Classifying, Normalizing)
                | (Classifying, Assembling)
                | (Normalizing, Assembling)
                | (Assembling, Normalizing)
                | (Assembling, Done)
                | (_, Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RunState::Loading => "loading",
            RunState::Fetching => "fetching",
            RunState::Classifying => "classifying",
            RunState::Normalizing => "normalizing",
            RunState::Assembling => "assembling",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManifestStatus {
    Pending,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ManifestOutcome {
    pub path: PathBuf,
    pub clips: usize,
    pub status: ManifestStatus,
}

impl ManifestOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == ManifestStatus::Succeeded
    }
}

/// What a run did, reported once at the end.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub manifests: Vec<ManifestOutcome>,
    pub clips_fetched: usize,
    pub normalized: bool,
    pub output: Option<PathBuf>,
    pub failure: Option<String>,
    /// Every state the run entered, in order, starting with `Loading`.
    pub transitions: Vec<RunState>,
    /// Set when the working directory was kept on request.
    pub kept_workdir: Option<PathBuf>,
}

impl RunSummary {
    pub fn final_state(&self) -> RunState {
        self.transitions.last().copied().unwrap_or(RunState::Loading)
    }

    /// True when an output was written and no manifest failed.
    pub fn is_success(&self) -> bool {
        self.final_state() == RunState::Done && self.manifests.iter().all(ManifestOutcome::succeeded)
    }

    /// How many times the run entered `state`.
    pub fn entered(&self, state: RunState) -> usize {
        self.transitions.iter().filter(|s| **s == state).count()
    }

    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        for outcome in &self.manifests {
            let name = outcome
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| outcome.path.display().to_string());

            let line = match (&outcome.status, &self.output) {
                (ManifestStatus::Succeeded, Some(output)) => {
                    format!("   OK   {} ({} clips) -> {}", name, outcome.clips, output.display())
                }
                (ManifestStatus::Succeeded, None) | (ManifestStatus::Pending, _) => {
                    format!("   OK   {} ({} clips)", name, outcome.clips)
                }
                (ManifestStatus::Failed(cause), _) => format!("   FAIL {}: {}", name, cause),
            };
            lines.push(line);
        }

        lines.push(format!(
            "Processed {} manifest(s), fetched {} clip(s), normalization {}",
            self.manifests.len(),
            self.clips_fetched,
            if self.normalized { "used" } else { "not used" }
        ));

        match (&self.output, &self.failure) {
            (Some(output), _) => lines.push(format!("Video saved as: {}", output.display())),
            (None, Some(cause)) => lines.push(format!("Run failed: {}", cause)),
            (None, None) => {}
        }

        lines.join("\n")
    }
}

/// State owned by a single run: its working directory and everything
/// recorded along the way. Never shared between runs.
pub struct PipelineRun {
    workdir: TempDir,
    state: RunState,
    transitions: Vec<RunState>,
    outcomes: Vec<ManifestOutcome>,
    clips_fetched: usize,
    normalized: bool,
    output: Option<PathBuf>,
    failure: Option<String>,
}

impl PipelineRun {
    /// Creates the run's working directory next to `output` so the final
    /// move stays on one filesystem.
    pub fn new(output: &Path) -> Result<Self> {
        let parent = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let workdir = tempfile::Builder::new()
            .prefix(".highlights-")
            .tempdir_in(&parent)
            .map_err(|e| Error::Workspace(format!("cannot create working directory in {}: {e}", parent.display())))?;

        info!(workdir = %workdir.path().display(), "created working directory");

        Ok(Self {
            workdir,
            state: RunState::Loading,
            transitions: vec![RunState::Loading],
            outcomes: Vec::new(),
            clips_fetched: 0,
            normalized: false,
            output: None,
            failure: None,
        })
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn advance(&mut self, next: RunState) {
        if !self.state.can_advance_to(next) {
            let from = self.state;
            error!(%from, to = %next, "illegal state transition");
            self.failure
                .get_or_insert_with(|| format!("illegal transition {} -> {}", from, next));
            self.state = RunState::Failed;
            self.transitions.push(RunState::Failed);
            return;
        }

        info!(from = %self.state, to = %next, "state");
        self.state = next;
        self.transitions.push(next);
    }

    fn fail(&mut self, cause: String) {
        error!(%cause, "run failed");
        self.failure = Some(cause);
        if self.state != RunState::Failed {
            self.advance(RunState::Failed);
        }
    }

    fn fail_manifest(&mut self, index: usize, cause: String) {
        if let Some(outcome) = self.outcomes.get_mut(index) {
            if !matches!(outcome.status, ManifestStatus::Failed(_)) {
                warn!(manifest = %outcome.path.display(), %cause, "manifest failed");
                outcome.status = ManifestStatus::Failed(cause);
            }
        }
    }

    fn is_live(&self, index: usize) -> bool {
        self.outcomes
            .get(index)
            .map(|o| !matches!(o.status, ManifestStatus::Failed(_)))
            .unwrap_or(false)
    }

    /// Drops segments whose manifest has failed.
    fn retain_live(&self, segments: Vec<SegmentFile>) -> Vec<SegmentFile> {
        segments.into_iter().filter(|s| self.is_live(s.id.manifest)).collect()
    }

    /// Applies per-segment results, failing the manifest of every error, and
    /// returns the surviving segments in order.
    fn absorb(&mut self, results: Vec<(ClipId, Result<SegmentFile>)>) -> Vec<SegmentFile> {
        let mut segments = Vec::new();
        for (id, result) in results {
            match result {
                Ok(segment) => segments.push(segment),
                Err(err) => self.fail_manifest(id.manifest, err.to_string()),
            }
        }
        self.retain_live(segments)
    }

    fn finish(mut self, keep_workdir: bool) -> RunSummary {
        let run_failure = self.failure.clone();
        for outcome in &mut self.outcomes {
            if outcome.status == ManifestStatus::Pending {
                outcome.status = match (&self.output, &run_failure) {
                    (Some(_), _) => ManifestStatus::Succeeded,
                    (None, Some(cause)) => ManifestStatus::Failed(cause.clone()),
                    (None, None) => ManifestStatus::Failed("run did not finish".to_string()),
                };
            }
        }

        println!("\nCleaning up temporary files...");
        let kept_workdir = if keep_workdir {
            #[allow(deprecated)]
            let path = self.workdir.into_path();
            info!(workdir = %path.display(), "keeping working directory");
            Some(path)
        } else {
            let path = self.workdir.path().to_path_buf();
            if let Err(err) = self.workdir.close() {
                warn!(workdir = %path.display(), %err, "could not remove working directory");
            }
            None
        };

        RunSummary {
            manifests: self.outcomes,
            clips_fetched: self.clips_fetched,
            normalized: self.normalized,
            output: self.output,
            failure: self.failure,
            transitions: self.transitions,
            kept_workdir,
        }
    }
}

pub struct Pipeline {
    retriever: Arc<dyn Retriever>,
    media: Arc<dyn MediaTool>,
    options: Options,
}

impl Pipeline {
    pub fn new(retriever: Arc<dyn Retriever>, media: Arc<dyn MediaTool>, options: Options) -> Self {
        Self { retriever, media, options }
    }

    /// Processes every manifest under `input` (a folder or a single
    /// manifest file) into one output video.
    ///
    /// Only a failure to set up the run's working directory is returned as
    /// an error. Everything else is reported in the [`RunSummary`], and the
    /// working directory is removed on every path.
    pub async fn run(&self, input: &Path) -> Result<RunSummary> {
        let mut run = PipelineRun::new(&self.options.output)?;

        if let Err(err) = self.drive(&mut run, input).await {
            run.fail(err.to_string());
        }

        Ok(run.finish(self.options.keep_temp))
    }

    async fn drive(&self, run: &mut PipelineRun, input: &Path) -> Result<()> {
        let requests = self.load(run, input)?;

        run.advance(RunState::Fetching);
        let segments = self.fetch(run, requests).await?;

        run.advance(RunState::Classifying);
        let classification = classify(&segments);
        info!(%classification, segments = segments.len(), "classified");

        let reencode = classification == Classification::NormalizeRequired || self.options.scoreboard.is_some();
        let segments = if reencode {
            run.advance(RunState::Normalizing);
            self.normalize(run, segments).await?
        } else {
            segments
        };

        run.advance(RunState::Assembling);
        println!("\nEditing final video...");
        let assembled = assemble(&segments, &self.options.output, self.media.as_ref(), run.workdir()).await;

        let output = match assembled {
            Ok(output) => output,
            Err(err) if !reencode => {
                warn!(%err, "direct join failed, re-encoding and retrying once");
                println!("Join failed ({}). Trying re-encode fallback...", err);

                run.advance(RunState::Normalizing);
                let segments = self.normalize(run, segments).await?;

                run.advance(RunState::Assembling);
                assemble(&segments, &self.options.output, self.media.as_ref(), run.workdir()).await?
            }
            Err(err) => return Err(err),
        };

        run.output = Some(output);
        run.advance(RunState::Done);
        Ok(())
    }

    fn load(&self, run: &mut PipelineRun, input: &Path) -> Result<Vec<ClipRequest>> {
        let entries = manifest::load_path(input)?;
        if entries.is_empty() {
            return Err(Error::Empty(format!("no manifest files found in {}", input.display())));
        }

        println!("Found {} manifest file(s) in '{}':", entries.len(), input.display());
        for entry in &entries {
            let name = entry.path.file_name().unwrap_or(entry.path.as_os_str());
            println!("   - {}", name.to_string_lossy());
        }

        let mut requests = Vec::new();
        for (index, ManifestEntry { path, manifest }) in entries.into_iter().enumerate() {
            match manifest {
                Ok(manifest) => {
                    let title = manifest.display_title().to_string();
                    let scoreboards: Vec<Option<Scoreboard>> = match self.options.scoreboard {
                        Some(_) => overlay::scoreboards(&manifest).into_iter().map(Some).collect(),
                        None => vec![None; manifest.clips.len()],
                    };
                    let mut scoreboards = scoreboards.into_iter();
                    run.outcomes.push(ManifestOutcome {
                        path,
                        clips: manifest.clips.len(),
                        status: ManifestStatus::Pending,
                    });
                    requests.extend(manifest.clips.into_iter().enumerate().map(|(clip, c)| ClipRequest {
                        id: ClipId::new(index, clip),
                        video_id: manifest.source_video_id.clone(),
                        title: title.clone(),
                        clip: c,
                        scoreboard: scoreboards.next().flatten(),
                    }));
                }
                Err(err) => {
                    println!("   Skipping invalid file {}: {}", path.display(), err);
                    run.outcomes.push(ManifestOutcome {
                        path,
                        clips: 0,
                        status: ManifestStatus::Pending,
                    });
                    run.fail_manifest(index, err.to_string());
                }
            }
        }

        if requests.is_empty() {
            return Err(Error::Empty("no clips to fetch in any manifest".to_string()));
        }

        println!("Found {} total segments to process.", requests.len());
        Ok(requests)
    }

    async fn fetch(&self, run: &mut PipelineRun, requests: Vec<ClipRequest>) -> Result<Vec<SegmentFile>> {
        println!("\nStarting downloads (only the marked segments)...");

        let settings = FetchSettings {
            max_parallel: self.options.max_parallel_downloads,
            max_retries: self.options.max_download_retries,
        };
        let outcomes = fetch_all(
            requests,
            Arc::clone(&self.retriever),
            Arc::clone(&self.media),
            run.workdir(),
            settings,
        )
        .await;

        let mut segments = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                FetchOutcome::Fetched(segment) => {
                    run.clips_fetched += 1;
                    segments.push(segment);
                }
                FetchOutcome::Failed(err) => run.fail_manifest(id.manifest, err.to_string()),
                FetchOutcome::Skipped => {}
            }
        }

        let segments = run.retain_live(segments);
        if segments.is_empty() {
            return Err(Error::Empty("every fetch failed".to_string()));
        }

        Ok(segments)
    }

    async fn normalize(&self, run: &mut PipelineRun, segments: Vec<SegmentFile>) -> Result<Vec<SegmentFile>> {
        let target = select_target(&segments, self.options.target, &self.options.encode)
            .ok_or_else(|| Error::Empty("no segments to normalize".to_string()))?;

        println!("\nRe-encoding {} segment(s) to {}...", segments.len(), target.resolution);
        run.normalized = true;

        let results = normalize_all(
            segments,
            &target,
            self.options.scoreboard.as_ref(),
            Arc::clone(&self.media),
            run.workdir(),
            self.options.max_parallel_downloads,
        )
        .await;

        let segments = run.absorb(results);
        if segments.is_empty() {
            return Err(Error::Empty("every segment failed to normalize".to_string()));
        }

        Ok(segments)
    }
}
