//! Content of the run, log/run and env files for a service.

use indexmap::IndexMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::attrs::Attrs;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fsstate::{self, FileState};
use crate::params::{ScriptSource, ServiceSpec};
use crate::paths::ServiceLayout;
use crate::writer;

/// Rendered script bodies for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scripts {
    pub run: Vec<u8>,
    pub log: Vec<u8>,
}

impl Scripts {
    pub fn for_spec(spec: &ServiceSpec, config: &Config, layout: &ServiceLayout) -> Self {
        match &spec.script {
            ScriptSource::Generated { command } => Self {
                run: run_script(config, layout, &spec.user, command).into_bytes(),
                log: log_script(config, layout).into_bytes(),
            },
            ScriptSource::Custom { run, log } => Self {
                run: run.clone(),
                log: log.clone(),
            },
        }
    }
}

/// The supervised command, exec'd through chpst with the env directory and
/// target user applied
pub fn run_script(config: &Config, layout: &ServiceLayout, user: &str, command: &str) -> String {
    format!(
        "#!/bin/sh\n\
         exec 2>&1\n\
         exec {} -e {} -u {} {}\n",
        shell_quote(&config.chpst),
        shell_quote(&layout.host_env_dir.to_string_lossy()),
        user,
        command
    )
}

/// svlogd writing timestamped logs to the service's log directory
pub fn log_script(config: &Config, layout: &ServiceLayout) -> String {
    let log_path = shell_quote(&layout.host_log_path.to_string_lossy());
    format!(
        "#!/bin/sh\n\
         [ -d {path} ] || mkdir -p {path}\n\
         exec {chpst} -u root {svlogd} -tt {path}\n",
        path = log_path,
        chpst = shell_quote(&config.chpst),
        svlogd = shell_quote(&config.svlogd),
    )
}

/// Single-quote `s` unless it is made only of characters the shell leaves alone
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '@' | ':' | '='));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// Write one file per variable into `env_dir` and drop files for variables no
/// longer declared. Only regular files are ever removed.
pub fn sync_env_dir(
    env_dir: &Path,
    env: &IndexMap<String, String>,
    attrs: &Attrs,
    check_mode: bool,
) -> Result<bool> {
    let mut changed = false;

    for (key, value) in env {
        changed |= writer::write_if_changed(value.as_bytes(), &env_dir.join(key), attrs, check_mode)?;
    }

    let entries = match fs::read_dir(env_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound && check_mode => return Ok(changed),
        Err(e) => return Err(Error::io("read directory", env_dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| Error::io("read directory", env_dir, e))?;
        let name = entry.file_name();
        let declared = name.to_str().map(|n| env.contains_key(n)).unwrap_or(false);
        if declared {
            continue;
        }

        let path = entry.path();
        match fsstate::classify(&path)? {
            FileState::File | FileState::Hardlink => {
                if check_mode {
                    tracing::info!("would remove stale env file {}", path.display());
                } else {
                    tracing::info!("removing stale env file {}", path.display());
                    fs::remove_file(&path).map_err(|e| Error::io("unlink", &path, e))?;
                }
                changed = true;
            }
            other => {
                tracing::warn!("leaving undeclared {} {} in place", other, path.display());
            }
        }
    }

    Ok(changed)
}
