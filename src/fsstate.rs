use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::error::{Error, Result};

/// What currently sits at a path, without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Absent,
    File,
    Directory,
    Symlink,
    Hardlink,
}

impl FileState {
    pub fn name(&self) -> &'static str {
        match self {
            FileState::Absent => "absent",
            FileState::File => "file",
            FileState::Directory => "directory",
            FileState::Symlink => "symlink",
            FileState::Hardlink => "hardlink",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classify a path. A missing path (or one whose parent is not a directory)
/// is `Absent`, never an error.
///
/// Regular files with more than one link are reported as `Hardlink`. Other
/// node types (fifos, sockets, devices) are reported as `File`.
pub fn classify(path: &Path) -> Result<FileState> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FileState::Absent),
        // a file where a parent directory should be
        Err(e) if e.raw_os_error() == Some(nix::libc::ENOTDIR) => return Ok(FileState::Absent),
        Err(e) => return Err(Error::io("stat", path, e)),
    };

    let file_type = meta.file_type();
    let state = if file_type.is_symlink() {
        FileState::Symlink
    } else if file_type.is_dir() {
        FileState::Directory
    } else if meta.nlink() > 1 {
        FileState::Hardlink
    } else {
        FileState::File
    };

    Ok(state)
}
