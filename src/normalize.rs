//! Re-encoding segments to one common format so they can be joined.
//!
//! This is the slow path. It runs when the classifier finds mismatched
//! segments, when a scoreboard has to be drawn, or once as a fallback when a
//! direct join failed. Every segment is re-encoded, so the joined streams
//! share codecs, resolution, frame rate, pixel format and sample rate.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::fetch::{ClipId, SegmentFile};
use crate::media::{EncodeTarget, MediaFormat, MediaTool, Resolution};
use crate::options::{EncodeOptions, TargetPolicy};
use crate::overlay::{self, ScoreboardOptions};

/// Picks the common output format. With [`TargetPolicy::Max`] this is the
/// largest resolution seen (by pixel count, then width), so nothing is
/// downscaled. Dimensions are rounded down to even numbers for the encoder.
/// The frame rate is the highest one reported.
pub fn select_target(
    segments: &[SegmentFile],
    policy: TargetPolicy,
    encode: &EncodeOptions,
) -> Option<EncodeTarget> {
    let resolution = match policy {
        TargetPolicy::Fixed(resolution) => resolution,
        TargetPolicy::Max => segments
            .iter()
            .map(|s| s.format.resolution)
            .max_by_key(|r| (r.pixels(), r.width))?,
    };

    let frame_rate = segments
        .iter()
        .filter_map(|s| Some((s.format.frames_per_second()?, s.format.frame_rate.clone()?)))
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, rate)| rate);

    Some(EncodeTarget {
        resolution: even(resolution),
        frame_rate,
        encode: encode.clone(),
    })
}

fn even(resolution: Resolution) -> Resolution {
    Resolution::new((resolution.width & !1).max(2), (resolution.height & !1).max(2))
}

/// Re-encodes one segment to `target`, drawing its scoreboard when
/// `scoreboard` is set, and checks the result carries the forced stream
/// parameters.
pub async fn normalize_segment(
    segment: SegmentFile,
    target: &EncodeTarget,
    scoreboard: Option<&ScoreboardOptions>,
    media: &dyn MediaTool,
    dir: &Path,
) -> Result<SegmentFile> {
    let output = dir.join(format!("{}_norm.mp4", segment.id.stem()));
    let fail = |message: String| Error::Normalize {
        path: segment.path.clone(),
        message,
    };

    let overlay = match (scoreboard, &segment.scoreboard) {
        (Some(options), Some(board)) => overlay::filters(board, target.resolution, options),
        _ => Vec::new(),
    };

    media
        .reencode(&segment.path, &segment.format, &output, target, &overlay)
        .await
        .map_err(|err| fail(err.to_string()))?;
    let format: MediaFormat = media.probe(&output).await.map_err(|err| fail(err.to_string()))?;

    if !target.is_satisfied_by(&format) {
        return Err(fail(format!("re-encode produced {format}")));
    }

    debug!(clip = %segment.id.stem(), from = %segment.format, to = %format, "normalized");

    Ok(SegmentFile {
        path: output,
        format,
        ..segment
    })
}

/// Normalizes every segment with at most `max_parallel` encodes running.
/// Each segment succeeds or fails on its own; the result is sorted by
/// [`ClipId`]. Dropping the returned future aborts the running encodes.
pub async fn normalize_all(
    segments: Vec<SegmentFile>,
    target: &EncodeTarget,
    scoreboard: Option<&ScoreboardOptions>,
    media: Arc<dyn MediaTool>,
    dir: &Path,
    max_parallel: usize,
) -> Vec<(ClipId, Result<SegmentFile>)> {
    info!(
        segments = segments.len(),
        target = %target.resolution,
        codec = %target.encode.video_codec,
        scoreboard = scoreboard.is_some(),
        "normalizing"
    );

    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let target = Arc::new(target.clone());
    let scoreboard = scoreboard.cloned();
    let dir = Arc::new(dir.to_path_buf());
    let ids: Vec<ClipId> = segments.iter().map(|s| s.id).collect();

    let mut tasks = JoinSet::new();
    for segment in segments {
        let id = segment.id;
        let semaphore = Arc::clone(&semaphore);
        let target = Arc::clone(&target);
        let scoreboard = scoreboard.clone();
        let media = Arc::clone(&media);
        let dir = Arc::clone(&dir);

        tasks.spawn(async move {
            let result = match semaphore.acquire().await {
                Ok(_permit) => {
                    normalize_segment(segment, &target, scoreboard.as_ref(), media.as_ref(), &dir).await
                }
                Err(err) => Err(Error::Workspace(err.to_string())),
            };
            (id, result)
        });
    }

    let mut results = Vec::with_capacity(ids.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, result)) => {
                if let Err(err) = &result {
                    warn!(clip = %id.stem(), %err, "normalize failed");
                }
                results.push((id, result));
            }
            Err(err) => error!(%err, "normalize task failed"),
        }
    }

    let finished: HashSet<ClipId> = results.iter().map(|(id, _)| *id).collect();
    for id in ids {
        if !finished.contains(&id) {
            results.push((id, Err(Error::Workspace("normalize task failed".to_string()))));
        }
    }

    results.sort_by_key(|(id, _)| *id);
    results
}
