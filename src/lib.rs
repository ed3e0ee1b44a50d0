//! Builds one highlight video out of marked time ranges on online videos.
//!
//! Each manifest names a source video and the clips to take from it. Only
//! those ranges are downloaded, then everything is joined into a single
//! file, re-encoding to a common format only when the clips would not join
//! cleanly otherwise.

pub mod assemble;
pub mod classify;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod media;
pub mod normalize;
pub mod options;
pub mod overlay;
pub mod pipeline;
pub mod tool;

pub use error::{Error, FetchErrorKind, Result};
pub use pipeline::{Pipeline, RunState, RunSummary};
