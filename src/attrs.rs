//! Fixed ownership/mode policy applied to everything the reconciler creates.

use nix::unistd::{Group, User};
use std::fs::{self, Metadata};
use std::os::unix::fs::{lchown, MetadataExt, PermissionsExt};
use std::path::Path;

use crate::error::{Error, Result};

pub const DEFAULT_MODE: u32 = 0o755;

/// Ownership and permission bits a path should carry. `None` leaves that
/// attribute alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attrs {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<u32>,
}

impl Default for Attrs {
    /// root:root 0755
    fn default() -> Self {
        Self {
            uid: Some(0),
            gid: Some(0),
            mode: Some(DEFAULT_MODE),
        }
    }
}

impl Attrs {
    /// Build a policy from user/group names, looked up in the host's databases
    pub fn resolve(owner: Option<&str>, group: Option<&str>, mode: Option<u32>) -> Result<Self> {
        let uid = match owner {
            Some(name) => Some(lookup_user(name)?),
            None => None,
        };
        let gid = match group {
            Some(name) => Some(lookup_group(name)?),
            None => None,
        };

        if let Some(mode) = mode {
            if mode > 0o7777 {
                return Err(Error::Config(format!("invalid mode {:o}", mode)));
            }
        }

        Ok(Self { uid, gid, mode })
    }

    /// Whether `meta` already satisfies this policy
    pub fn matches(&self, meta: &Metadata) -> bool {
        let owner_ok = self.uid.map_or(true, |uid| meta.uid() == uid);
        let group_ok = self.gid.map_or(true, |gid| meta.gid() == gid);
        let mode_ok = meta.file_type().is_symlink()
            || self.mode.map_or(true, |mode| meta.mode() & 0o7777 == mode);
        owner_ok && group_ok && mode_ok
    }

    /// Correct ownership and mode on `path` where they differ from policy.
    ///
    /// Symlinks get their own ownership changed (never the target's) and no
    /// mode change. Returns whether anything differed; in check mode nothing
    /// is touched.
    pub fn apply_if_different(&self, path: &Path, check_mode: bool) -> Result<bool> {
        let meta = fs::symlink_metadata(path).map_err(|e| Error::io("stat", path, e))?;
        if self.matches(&meta) {
            return Ok(false);
        }

        if check_mode {
            return Ok(true);
        }

        let uid = self.uid.filter(|uid| meta.uid() != *uid);
        let gid = self.gid.filter(|gid| meta.gid() != *gid);
        if uid.is_some() || gid.is_some() {
            tracing::debug!("chown {} to {:?}:{:?}", path.display(), uid, gid);
            lchown(path, uid, gid).map_err(|e| Error::io("chown", path, e))?;
        }

        if let Some(mode) = self.mode {
            if !meta.file_type().is_symlink() && meta.mode() & 0o7777 != mode {
                tracing::debug!("chmod {} to {:o}", path.display(), mode);
                fs::set_permissions(path, fs::Permissions::from_mode(mode))
                    .map_err(|e| Error::io("chmod", path, e))?;
            }
        }

        Ok(true)
    }
}

fn lookup_user(name: &str) -> Result<u32> {
    match User::from_name(name) {
        Ok(Some(user)) => Ok(user.uid.as_raw()),
        Ok(None) => Err(Error::Config(format!("unknown user {}", name))),
        Err(e) => Err(Error::Config(format!("failed to look up user {}: {}", name, e))),
    }
}

fn lookup_group(name: &str) -> Result<u32> {
    match Group::from_name(name) {
        Ok(Some(group)) => Ok(group.gid.as_raw()),
        Ok(None) => Err(Error::Config(format!("unknown group {}", name))),
        Err(e) => Err(Error::Config(format!("failed to look up group {}: {}", name, e))),
    }
}
