use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use crate::error::{Error, Result};
use crate::fsstate::{self, FileState};

/// What `set_enabled` decided to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    CreateLink,
    RemoveLink,
    Nothing,
}

/// Decide the enablement step from the desired flag and what sits at the link.
/// Anything other than a symlink or nothing is refused either way.
pub fn plan(enabled: bool, link: &Path, current: FileState) -> Result<Toggle> {
    match (enabled, current) {
        (true, FileState::Absent) => Ok(Toggle::CreateLink),
        (true, FileState::Symlink) => Ok(Toggle::Nothing),
        (false, FileState::Symlink) => Ok(Toggle::RemoveLink),
        (false, FileState::Absent) => Ok(Toggle::Nothing),
        (_, found) => Err(Error::Conflict {
            path: link.to_path_buf(),
            found,
        }),
    }
}

/// Make the presence of `link` (pointing at `target`) match `enabled`.
///
/// Creating the link hands the service to runsvdir, which starts it on its
/// next scan; status may lag behind until then.
pub fn set_enabled(enabled: bool, target: &Path, link: &Path, check_mode: bool) -> Result<bool> {
    let current = fsstate::classify(link)?;
    let toggle = plan(enabled, link, current)?;

    if current == FileState::Symlink && enabled {
        if let Ok(existing) = fs::read_link(link) {
            if existing.components().ne(target.components()) {
                tracing::warn!(
                    "{} points at {} rather than {}",
                    link.display(),
                    existing.display(),
                    target.display()
                );
            }
        }
    }

    if check_mode {
        return Ok(toggle != Toggle::Nothing);
    }

    match toggle {
        Toggle::CreateLink => {
            if let Some(parent) = link.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io("mkdir", parent, e))?;
            }
            tracing::info!("enabling: {} -> {}", link.display(), target.display());
            symlink(target, link).map_err(|e| Error::io("symlink", link, e))?;
            Ok(true)
        }
        Toggle::RemoveLink => {
            tracing::info!("disabling: removing {}", link.display());
            fs::remove_file(link).map_err(|e| Error::io("unlink", link, e))?;
            Ok(true)
        }
        Toggle::Nothing => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        target: std::path::PathBuf,
        link: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("etc/sv/web");
        fs::create_dir_all(&target).unwrap();
        let link = dir.path().join("etc/service/web");
        Fixture {
            target,
            link,
            _dir: dir,
        }
    }

    #[test]
    fn enable_absent_creates_link() {
        let f = fixture();
        assert!(set_enabled(true, &f.target, &f.link, false).unwrap());
        assert_eq!(fsstate::classify(&f.link).unwrap(), FileState::Symlink);
        assert_eq!(fs::read_link(&f.link).unwrap(), f.target);
    }

    #[test]
    fn enable_existing_link_is_noop() {
        let f = fixture();
        set_enabled(true, &f.target, &f.link, false).unwrap();
        assert!(!set_enabled(true, &f.target, &f.link, false).unwrap());
    }

    #[test]
    fn enable_over_file_fails() {
        let f = fixture();
        fs::create_dir_all(f.link.parent().unwrap()).unwrap();
        fs::write(&f.link, "").unwrap();

        let err = set_enabled(true, &f.target, &f.link, false).unwrap_err();
        assert!(matches!(err, Error::Conflict { found: FileState::File, .. }));
        assert_eq!(fsstate::classify(&f.link).unwrap(), FileState::File);
    }

    #[test]
    fn disable_link_removes_it() {
        let f = fixture();
        set_enabled(true, &f.target, &f.link, false).unwrap();
        assert!(set_enabled(false, &f.target, &f.link, false).unwrap());
        assert_eq!(fsstate::classify(&f.link).unwrap(), FileState::Absent);
        assert!(f.target.is_dir());
    }

    #[test]
    fn disable_absent_is_noop() {
        let f = fixture();
        assert!(!set_enabled(false, &f.target, &f.link, false).unwrap());
    }

    #[test]
    fn disable_directory_fails() {
        let f = fixture();
        fs::create_dir_all(&f.link).unwrap();

        let err = set_enabled(false, &f.target, &f.link, false).unwrap_err();
        assert!(matches!(err, Error::Conflict { found: FileState::Directory, .. }));
        assert!(f.link.is_dir());
    }

    #[test]
    fn check_mode_reports_without_linking() {
        let f = fixture();
        assert!(set_enabled(true, &f.target, &f.link, true).unwrap());
        assert_eq!(fsstate::classify(&f.link).unwrap(), FileState::Absent);
    }

    #[test]
    fn plan_table() {
        let link = Path::new("/etc/service/web");
        assert_eq!(plan(true, link, FileState::Absent).unwrap(), Toggle::CreateLink);
        assert_eq!(plan(true, link, FileState::Symlink).unwrap(), Toggle::Nothing);
        assert_eq!(plan(false, link, FileState::Symlink).unwrap(), Toggle::RemoveLink);
        assert_eq!(plan(false, link, FileState::Absent).unwrap(), Toggle::Nothing);
        assert!(plan(true, link, FileState::Hardlink).is_err());
        assert!(plan(false, link, FileState::File).is_err());
    }
}
