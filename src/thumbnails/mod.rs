//! Avatar thumbnails: URL to cache key, cache hit or deduplicated download.
//!
//! - A key is on disk: the path is returned immediately
//! - A key is downloading: the caller waits on the same download
//! - A key is absent: one download starts; a failure returns the key to absent

mod cache;
mod download;
#[cfg(test)]
pub(crate) mod testing;

pub use cache::{resolve, ImageResult, ThumbnailCache};
