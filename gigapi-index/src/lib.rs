//! The crash-safe `metadata.json` index kept alongside each partition's
//! Parquet files: a monotonic-id file list with aggregate min/max/row
//! count/size, a drop queue, and a coalescing background writer.

pub mod entry;
pub mod index;

pub use entry::{IndexDocument, IndexEntry, NewIndexEntry};
pub use index::JsonIndex;
