use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a single clip could not be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Connection, DNS, timeout or server side failure. Worth one more try.
    Network,
    /// Removed, private or otherwise gone.
    Unavailable,
    /// Geo block, sign-in/age gate, members only, embedding disabled.
    Restricted,
    /// The requested range produced no media.
    OutOfRange,
    /// Something was written but it is not readable media.
    Corrupt,
    /// The retrieval tool failed for a reason we could not classify.
    Tool,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FetchErrorKind::Network => "network error",
            FetchErrorKind::Unavailable => "video unavailable",
            FetchErrorKind::Restricted => "video restricted",
            FetchErrorKind::OutOfRange => "time range out of bounds",
            FetchErrorKind::Corrupt => "corrupt download",
            FetchErrorKind::Tool => "retrieval tool failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not parse manifest {}: {message}", path.display())]
    ManifestParse { path: PathBuf, message: String },

    #[error("invalid clip #{index} in {}: {reason}", path.display())]
    InvalidClip {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    #[error("fetching {video_id} failed ({kind}): {message}")]
    Fetch {
        video_id: String,
        kind: FetchErrorKind,
        message: String,
    },

    #[error("normalizing {} failed: {message}", path.display())]
    Normalize { path: PathBuf, message: String },

    #[error("assembly failed: {0}")]
    Assembly(String),

    #[error("nothing to assemble: {0}")]
    Empty(String),

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("{0} not found; is it installed and in PATH?")]
    ToolNotFound(String),

    #[error("working directory error: {0}")]
    Workspace(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn fetch(video_id: impl Into<String>, kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self::Fetch {
            video_id: video_id.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Only network hiccups during retrieval are retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Fetch {
                kind: FetchErrorKind::Network,
                ..
            }
        )
    }
}
