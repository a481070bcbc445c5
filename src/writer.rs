use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::attrs::Attrs;
use crate::error::{Error, Result};
use crate::fsstate::{self, FileState};

/// Hex SHA-256 of `content`
pub fn digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Hex SHA-256 of the file at `path`, or `None` when it does not exist
pub fn digest_file(path: &Path) -> Result<Option<String>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io("open", path, e)),
    };

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io("read", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Some(hex::encode(hasher.finalize())))
}

/// Write `content` to `dest` only when it differs from what is there.
///
/// Content goes to a scratch file beside the destination and is renamed over
/// it, so readers never see a partial file. The attribute policy is applied
/// afterwards either way; a metadata-only correction still counts as a change.
pub fn write_if_changed(content: &[u8], dest: &Path, attrs: &Attrs, check_mode: bool) -> Result<bool> {
    let dest = resolve_destination(dest)?;

    let new_digest = digest(content);
    let old_digest = digest_file(&dest)?;

    if old_digest.as_deref() == Some(new_digest.as_str()) {
        tracing::debug!("{} unchanged", dest.display());
        return attrs.apply_if_different(&dest, check_mode);
    }

    if check_mode {
        tracing::info!("would write {}", dest.display());
        return Ok(true);
    }

    tracing::info!("writing {}", dest.display());
    replace(content, &dest)?;
    attrs.apply_if_different(&dest, false)?;

    Ok(true)
}

/// Symlinked destinations are written through to their target, even when the
/// target does not exist yet. Directories are never replaced by files.
fn resolve_destination(dest: &Path) -> Result<PathBuf> {
    match fsstate::classify(dest)? {
        FileState::Directory => Err(Error::Conflict {
            path: dest.to_path_buf(),
            found: FileState::Directory,
        }),
        FileState::Symlink => match fs::canonicalize(dest) {
            Ok(target) => resolve_destination(&target),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let target = fs::read_link(dest).map_err(|e| Error::io("readlink", dest, e))?;
                let target = match dest.parent() {
                    Some(parent) if target.is_relative() => parent.join(target),
                    _ => target,
                };
                resolve_destination(&target)
            }
            Err(e) => Err(Error::io("resolve", dest, e)),
        },
        _ => Ok(dest.to_path_buf()),
    }
}

fn replace(content: &[u8], dest: &Path) -> Result<()> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut scratch =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io("create scratch file", parent, e))?;
    scratch
        .write_all(content)
        .map_err(|e| Error::io("write", scratch.path(), e))?;
    scratch
        .as_file()
        .sync_all()
        .map_err(|e| Error::io("sync", scratch.path(), e))?;

    scratch
        .persist(dest)
        .map_err(|e| Error::io("rename", dest, e.error))?;

    Ok(())
}
