//! Range-limited retrieval of clips into the run's working directory.

pub mod ytdlp;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Error, FetchErrorKind, Result};
use crate::manifest::Clip;
use crate::media::{MediaFormat, MediaTool};
use crate::overlay::Scoreboard;

/// Position of a clip in the final output: manifest index, then clip index
/// within that manifest. Sorting on this restores concatenation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClipId {
    pub manifest: usize,
    pub clip: usize,
}

impl ClipId {
    pub fn new(manifest: usize, clip: usize) -> Self {
        Self { manifest, clip }
    }

    /// File stem used for this clip's files in the working directory.
    pub fn stem(&self) -> String {
        format!("clip_{:03}_{:03}", self.manifest, self.clip)
    }
}

#[derive(Debug, Clone)]
pub struct ClipRequest {
    pub id: ClipId,
    pub video_id: String,
    pub title: String,
    pub clip: Clip,
    pub scoreboard: Option<Scoreboard>,
}

/// A fetched clip on disk with the format that was actually delivered.
#[derive(Debug, Clone)]
pub struct SegmentFile {
    pub id: ClipId,
    pub video_id: String,
    pub clip: Clip,
    pub path: PathBuf,
    pub format: MediaFormat,
    pub scoreboard: Option<Scoreboard>,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Downloads only `request.clip` of the video into `dir`, naming the
    /// file after `stem`, and returns the produced path.
    async fn retrieve(&self, request: &ClipRequest, dir: &Path, stem: &str) -> Result<PathBuf>;
}

/// Outcome of one clip in [`fetch_all`].
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(SegmentFile),
    Failed(Error),
    /// Not attempted because another clip of the same manifest failed
    /// permanently.
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
    pub max_parallel: usize,
    pub max_retries: usize,
}

/// Fetches one clip, retrying transient failures up to `max_retries` times,
/// then probes the result.
pub async fn fetch_segment(
    request: &ClipRequest,
    retriever: &dyn Retriever,
    media: &dyn MediaTool,
    dir: &Path,
    max_retries: usize,
) -> Result<SegmentFile> {
    let stem = request.id.stem();
    let mut attempt = 0;

    let path = loop {
        match retriever.retrieve(request, dir, &stem).await {
            Ok(path) => break path,
            Err(err) if err.is_transient() && attempt < max_retries => {
                attempt += 1;
                warn!(video_id = %request.video_id, clip = %stem, %err, attempt, "retrying fetch");
            }
            Err(err) => return Err(err),
        }
    };

    let format = media.probe(&path).await.map_err(|err| {
        Error::fetch(&request.video_id, FetchErrorKind::Corrupt, err.to_string())
    })?;

    debug!(clip = %stem, %format, "fetched");

    Ok(SegmentFile {
        id: request.id,
        video_id: request.video_id.clone(),
        clip: request.clip.clone(),
        path,
        format,
        scoreboard: request.scoreboard.clone(),
    })
}

/// Fetches every request with at most `settings.max_parallel` downloads in
/// flight. The result is sorted by [`ClipId`], whatever the completion
/// order was. Dropping the returned future aborts every download still
/// running.
pub async fn fetch_all(
    requests: Vec<ClipRequest>,
    retriever: Arc<dyn Retriever>,
    media: Arc<dyn MediaTool>,
    dir: &Path,
    settings: FetchSettings,
) -> Vec<(ClipId, FetchOutcome)> {
    let semaphore = Arc::new(Semaphore::new(settings.max_parallel.max(1)));
    let aborted = Arc::new(Mutex::new(HashSet::<usize>::new()));
    let fetched = Arc::new(Mutex::new(0usize));
    let total = requests.len();
    let dir = Arc::new(dir.to_path_buf());
    let ids: Vec<ClipId> = requests.iter().map(|r| r.id).collect();

    let mut tasks = JoinSet::new();
    for (i, request) in requests.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let aborted = Arc::clone(&aborted);
        let fetched = Arc::clone(&fetched);
        let retriever = Arc::clone(&retriever);
        let media = Arc::clone(&media);
        let dir = Arc::clone(&dir);

        tasks.spawn(async move {
            let outcome = async {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(err) => return FetchOutcome::Failed(Error::Workspace(err.to_string())),
                };

                if aborted.lock().await.contains(&request.id.manifest) {
                    return FetchOutcome::Skipped;
                }

                println!(
                    "   [{}/{}] Downloading: {} ({} - {})",
                    i + 1,
                    total,
                    request.title,
                    format_time(request.clip.start_seconds),
                    format_time(request.clip.end_seconds)
                );

                match fetch_segment(&request, retriever.as_ref(), media.as_ref(), &dir, settings.max_retries).await {
                    Ok(segment) => {
                        let mut fetched = fetched.lock().await;
                        *fetched += 1;
                        println!(
                            "Fetched {:width$} / {:width$} segments ({:5.2}%)",
                            *fetched,
                            total,
                            (*fetched as f64 / total as f64) * 100.,
                            width = total.to_string().len()
                        );
                        FetchOutcome::Fetched(segment)
                    }
                    Err(err) => {
                        error!(video_id = %request.video_id, clip = %request.id.stem(), %err, "fetch failed");
                        aborted.lock().await.insert(request.id.manifest);
                        FetchOutcome::Failed(err)
                    }
                }
            }
            .await;

            (request.id, outcome)
        });
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => error!(%err, "fetch task failed"),
        }
    }

    // A task that panicked left no outcome behind.
    let finished: HashSet<ClipId> = outcomes.iter().map(|(id, _)| *id).collect();
    for id in ids {
        if !finished.contains(&id) {
            outcomes.push((id, FetchOutcome::Failed(Error::Workspace("fetch task failed".to_string()))));
        }
    }

    outcomes.sort_by_key(|(id, _)| *id);
    info!(total, "fetch finished");

    outcomes
}

/// `m:ss`, the way clip ranges are shown in progress output.
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn clip_ids_sort_by_manifest_then_clip() {
        let mut ids = vec![ClipId::new(1, 0), ClipId::new(0, 2), ClipId::new(0, 0), ClipId::new(0, 10)];
        ids.sort();
        assert_eq!(
            ids,
            vec![ClipId::new(0, 0), ClipId::new(0, 2), ClipId::new(0, 10), ClipId::new(1, 0)]
        );
        assert_eq!(ClipId::new(2, 7).stem(), "clip_002_007");
    }

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(65.9), "1:05");
        assert_eq!(format_time(3600.0), "60:00");
    }

    struct SlowRetriever {
        finished: AtomicUsize,
    }

    #[async_trait]
    impl Retriever for SlowRetriever {
        async fn retrieve(&self, _request: &ClipRequest, dir: &Path, stem: &str) -> Result<PathBuf> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(dir.join(format!("{stem}.mp4")))
        }
    }

    struct NoMedia;

    #[async_trait]
    impl MediaTool for NoMedia {
        async fn probe(&self, path: &Path) -> Result<MediaFormat> {
            Err(Error::tool("probe", path.display().to_string()))
        }

        async fn concat(&self, _inputs: &[PathBuf], _output: &Path, _workdir: &Path) -> Result<()> {
            Ok(())
        }

        async fn reencode(
            &self,
            _input: &Path,
            _source: &MediaFormat,
            _output: &Path,
            _target: &crate::media::EncodeTarget,
            _overlay: &[String],
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dropping_fetch_all_stops_running_downloads() {
        let retriever = Arc::new(SlowRetriever {
            finished: AtomicUsize::new(0),
        });
        let requests = (0..3)
            .map(|clip| ClipRequest {
                id: ClipId::new(0, clip),
                video_id: "abc".to_string(),
                title: "abc".to_string(),
                clip: Clip::new(0.0, 1.0),
                scoreboard: None,
            })
            .collect();
        let settings = FetchSettings {
            max_parallel: 3,
            max_retries: 0,
        };

        let run = fetch_all(requests, retriever.clone(), Arc::new(NoMedia), Path::new("."), settings);
        assert!(tokio::time::timeout(Duration::from_millis(50), run).await.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(retriever.finished.load(Ordering::SeqCst), 0);
    }
}
