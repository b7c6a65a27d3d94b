//! The project file-set model: gathering files under a set of filtered
//! roots, hashing them, coalescing nested roots and diffing snapshots
//! against a peer's reported state.

use std::io;
use std::path::PathBuf;

pub mod delta;
pub mod filter;
pub mod gather;
pub mod snapshot;

pub use self::delta::{fileset_delta, FolderDelta, ProjectDelta};
pub use self::filter::FilterSpec;
pub use self::gather::{gather_active_file, gather_project, FolderEntry, GlobalExcludes};
pub use self::snapshot::{FileRecord, FolderSnapshot, ProjectSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub enum GatherError {
    /// A folder entry carries no path at all.
    MissingPath,
    /// A relative folder path was supplied without a project anchor to hang
    /// it off.
    Unanchored(PathBuf),
    /// A glob pattern in a filter list failed to parse.
    BadPattern { pattern: String, reason: String },
    Io(io::ErrorKind),
}

impl From<io::Error> for GatherError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        GatherError::Io(io_error.kind())
    }
}

pub type GatherResult<T> = Result<T, GatherError>;
