use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};
use crate::fetch::SegmentFile;
use crate::media::MediaTool;

/// Joins `segments`, in the order given, into `output`.
///
/// The join is written inside `workdir` first and only moved to `output`
/// once it succeeded, so a failed attempt never leaves a half-written file
/// at the destination.
pub async fn assemble(
    segments: &[SegmentFile],
    output: &Path,
    media: &dyn MediaTool,
    workdir: &Path,
) -> Result<PathBuf> {
    if segments.is_empty() {
        return Err(Error::Assembly("no segments to assemble".to_string()));
    }

    if segments.windows(2).any(|pair| pair[0].id >= pair[1].id) {
        return Err(Error::Assembly("segments are not in concatenation order".to_string()));
    }

    let inputs: Vec<PathBuf> = segments.iter().map(|s| s.path.clone()).collect();
    let extension = output.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
    let staging = workdir.join(format!("assembled.{extension}"));

    info!(segments = inputs.len(), output = %output.display(), "assembling");

    media
        .concat(&inputs, &staging, workdir)
        .await
        .map_err(|err| Error::Assembly(err.to_string()))?;

    if !staging.exists() {
        return Err(Error::Assembly("join produced no output file".to_string()));
    }

    move_into_place(&staging, output)
        .await
        .map_err(|err| Error::Assembly(format!("could not write {}: {err}", output.display())))?;

    Ok(output.to_path_buf())
}

async fn move_into_place(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    // Different filesystem.
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}
