//! Filesystem helpers: tree walking, path filtering and metadata.

pub mod filter;
pub mod metadata;
pub mod walker;

pub use filter::{to_slash, PathFilter};
pub use walker::{walk_directory, FileInfo, TreeListing, WalkOptions};
