//! Time-indexed photo and data trees.
//!
//! - [`cursor`] walks a directory tree file by file, forward or backward,
//!   with time-range pruning and timestamp seeks.
//! - [`time_index`] maps calendar fields to directory names such as
//!   `2020/01_jan/02_thu/03/04`.
//! - [`exif`] pulls capture times out of JPEG files.
//! - [`sort`] copies or moves photos into a dated layout.

pub mod cursor;
pub mod error;
pub mod exif;
pub mod sort;
pub mod time_block;
pub mod time_index;

pub use cursor::{CancelToken, CursorOptions, CursorState, DirCursor, Direction, TimedEntry};
pub use error::{Error, Result};
pub use exif::{TimestampReader, extract_timestamp, read_file_timestamp};
pub use sort::{SortConfig, SortStats, Sorter};
pub use time_block::TimeBlock;
pub use time_index::{TimeLevel, Zone};
