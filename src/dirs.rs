//! Directory reconciliation: create missing directories segment by segment
//! and bring existing trees in line with the attribute policy.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::attrs::Attrs;
use crate::error::{Error, Result};
use crate::fsstate::{self, FileState};

/// runsv keeps its own state here; its modes are not ours to manage
const SUPERVISE_DIR: &str = "supervise";

#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    /// Reconcile the targets of symlinked entries too
    pub follow_symlinks: bool,
    /// Directories nested deeper than this are left untouched
    pub max_depth: usize,
    pub check_mode: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: true,
            max_depth: 32,
            check_mode: false,
        }
    }
}

/// Make sure `path` is a directory carrying `attrs`, recursively.
///
/// Missing parents are created from the nearest existing ancestor down, each
/// new segment getting the policy. An existing non-directory is a conflict and
/// is never replaced.
pub fn ensure_directory(path: &Path, attrs: &Attrs, opts: &WalkOptions) -> Result<bool> {
    let mut path = path.to_path_buf();
    let mut state = fsstate::classify(&path)?;

    if state == FileState::Symlink && opts.follow_symlinks {
        path = resolve_link(&path)?;
        state = fsstate::classify(&path)?;
    }

    let mut changed = false;
    match state {
        FileState::Absent => {
            if opts.check_mode {
                tracing::info!("would create directory {}", path.display());
                return Ok(true);
            }
            create_segments(&path, attrs)?;
            changed = true;
        }
        FileState::Directory => {}
        found => return Err(Error::Conflict { path, found }),
    }

    changed |= attrs.apply_if_different(&path, opts.check_mode)?;

    let mut visited = HashSet::new();
    if let Ok(canonical) = fs::canonicalize(&path) {
        visited.insert(canonical);
    }
    changed |= reconcile_tree(&path, attrs, opts, &mut visited, 0)?;

    Ok(changed)
}

fn resolve_link(path: &Path) -> Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(target) => Ok(target),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::Conflict {
            path: path.to_path_buf(),
            found: FileState::Symlink,
        }),
        Err(e) => Err(Error::io("resolve", path, e)),
    }
}

fn create_segments(path: &Path, attrs: &Attrs) -> Result<()> {
    let mut missing = Vec::new();
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        match fsstate::classify(ancestor)? {
            FileState::Absent => missing.push(ancestor.to_path_buf()),
            FileState::Directory => break,
            FileState::Symlink if ancestor.is_dir() => break,
            found => {
                return Err(Error::Conflict {
                    path: ancestor.to_path_buf(),
                    found,
                })
            }
        }
    }

    for dir in missing.iter().rev() {
        tracing::info!("creating directory {}", dir.display());
        match fs::create_dir(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => continue,
            Err(e) => return Err(Error::io("mkdir", dir, e)),
        }
        attrs.apply_if_different(dir, false)?;
    }

    Ok(())
}

fn reconcile_tree(
    dir: &Path,
    attrs: &Attrs,
    opts: &WalkOptions,
    visited: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<bool> {
    if depth >= opts.max_depth {
        tracing::warn!(
            "not descending into {}: nesting exceeds {}",
            dir.display(),
            opts.max_depth
        );
        return Ok(false);
    }

    let mut entries = fs::read_dir(dir)
        .map_err(|e| Error::io("read directory", dir, e))?
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| Error::io("read directory", dir, e))?;
    entries.sort_by_key(|e| e.file_name());

    let mut changed = false;
    for entry in entries {
        if entry.file_name() == SUPERVISE_DIR {
            continue;
        }

        let entry_path = entry.path();
        changed |= attrs.apply_if_different(&entry_path, opts.check_mode)?;

        match fsstate::classify(&entry_path)? {
            FileState::Directory => {
                changed |= descend(&entry_path, attrs, opts, visited, depth)?;
            }
            FileState::Symlink if opts.follow_symlinks => {
                let target = match fs::canonicalize(&entry_path) {
                    Ok(target) => target,
                    Err(e) => {
                        tracing::debug!("skipping dangling link {}: {}", entry_path.display(), e);
                        continue;
                    }
                };
                changed |= attrs.apply_if_different(&target, opts.check_mode)?;
                if target.is_dir() {
                    changed |= descend(&target, attrs, opts, visited, depth)?;
                }
            }
            _ => {}
        }
    }

    Ok(changed)
}

fn descend(
    dir: &Path,
    attrs: &Attrs,
    opts: &WalkOptions,
    visited: &mut HashSet<PathBuf>,
    depth: usize,
) -> Result<bool> {
    let canonical = fs::canonicalize(dir).map_err(|e| Error::io("resolve", dir, e))?;
    if !visited.insert(canonical) {
        tracing::debug!("already visited {}", dir.display());
        return Ok(false);
    }
    reconcile_tree(dir, attrs, opts, visited, depth + 1)
}
