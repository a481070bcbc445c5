use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::attrs::{Attrs, DEFAULT_MODE};
use crate::dirs::WalkOptions;
use crate::error::{Error, Result};
use crate::paths::{self, ServiceLayout};

/// Environment variable naming an alternative host config file
pub const CONFIG_ENV: &str = "RUNIT_SERVICE_CONFIG";

/// Host-level settings, built once at the entry point and passed down
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix every managed path is written under (`/` on a live system)
    pub root: PathBuf,
    pub sv_dir: PathBuf,
    pub enablement_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Explicit `sv` binary; looked up on `PATH` when unset
    pub sv_bin: Option<PathBuf>,
    pub chpst: String,
    pub svlogd: String,
    pub attrs: Attrs,
    pub follow_symlinks: bool,
    pub max_depth: usize,
    /// Report what would change without changing it
    pub check_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            sv_dir: PathBuf::from(paths::SERVICE_DIR),
            enablement_dir: PathBuf::from(paths::ENABLEMENT_DIR),
            log_dir: PathBuf::from(paths::LOG_DIR),
            sv_bin: None,
            chpst: "chpst".into(),
            svlogd: "svlogd".into(),
            attrs: Attrs::default(),
            follow_symlinks: true,
            max_depth: WalkOptions::default().max_depth,
            check_mode: false,
        }
    }
}

/// On-disk form of [`Config`]; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    root: Option<PathBuf>,
    sv_dir: Option<PathBuf>,
    enablement_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    sv_bin: Option<PathBuf>,
    chpst: Option<String>,
    svlogd: Option<String>,
    owner: Option<String>,
    group: Option<String>,
    mode: Option<String>,
    follow_symlinks: Option<bool>,
    max_depth: Option<usize>,
}

impl Config {
    /// Load from `$RUNIT_SERVICE_CONFIG`, else the default config file.
    /// A missing default file just means defaults.
    pub fn load() -> Result<Self> {
        match env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => match fs::read_to_string(paths::CONFIG_FILE) {
                Ok(content) => Self::from_toml(&content),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
                Err(e) => Err(Error::io("read", paths::CONFIG_FILE, e)),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("invalid config: {}", e)))?;

        let mut config = Self::default();
        if let Some(root) = file.root {
            config.root = root;
        }
        if let Some(dir) = file.sv_dir {
            config.sv_dir = require_absolute("sv_dir", dir)?;
        }
        if let Some(dir) = file.enablement_dir {
            config.enablement_dir = require_absolute("enablement_dir", dir)?;
        }
        if let Some(dir) = file.log_dir {
            config.log_dir = require_absolute("log_dir", dir)?;
        }
        config.sv_bin = file.sv_bin;
        if let Some(chpst) = file.chpst {
            config.chpst = chpst;
        }
        if let Some(svlogd) = file.svlogd {
            config.svlogd = svlogd;
        }

        if file.owner.is_some() || file.group.is_some() || file.mode.is_some() {
            let mode = match file.mode.as_deref() {
                Some(mode) => parse_mode(mode)?,
                None => DEFAULT_MODE,
            };
            config.attrs = Attrs::resolve(
                Some(file.owner.as_deref().unwrap_or("root")),
                Some(file.group.as_deref().unwrap_or("root")),
                Some(mode),
            )?;
        }

        if let Some(follow) = file.follow_symlinks {
            config.follow_symlinks = follow;
        }
        if let Some(depth) = file.max_depth {
            if depth == 0 {
                return Err(Error::Config("max_depth must be at least 1".into()));
            }
            config.max_depth = depth;
        }

        Ok(config)
    }

    /// Config writing everything below `root` instead of `/`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn layout(&self, name: &str) -> ServiceLayout {
        ServiceLayout::new(
            &self.root,
            &self.sv_dir,
            &self.enablement_dir,
            &self.log_dir,
            name,
        )
    }

    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            follow_symlinks: self.follow_symlinks,
            max_depth: self.max_depth,
            check_mode: self.check_mode,
        }
    }

    /// Resolve the `sv` binary, failing before anything is mutated
    pub fn sv_path(&self) -> Result<PathBuf> {
        match &self.sv_bin {
            Some(path) => Ok(path.clone()),
            None => which::which("sv")
                .map_err(|e| Error::Config(format!("sv not found on PATH: {}", e))),
        }
    }
}

fn require_absolute(key: &str, path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Err(Error::Config(format!(
            "{} must be absolute, got {}",
            key,
            path.display()
        )))
    }
}

/// Parse an octal mode such as `0755` or `755`
pub fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.trim().trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(value) if value <= 0o7777 => Ok(value),
        _ => Err(Error::Config(format!("invalid mode {:?}", mode))),
    }
}
