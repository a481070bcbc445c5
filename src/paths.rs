use std::path::{Path, PathBuf};

/// Where service definitions live
pub const SERVICE_DIR: &str = "/etc/sv";

/// runsvdir scan directory; a link here enables the service
pub const ENABLEMENT_DIR: &str = "/etc/service";

/// Parent of each service's svlogd directory
pub const LOG_DIR: &str = "/var/log";

/// Host config file consulted when `RUNIT_SERVICE_CONFIG` is unset
pub const CONFIG_FILE: &str = "/etc/runit-service.toml";

/// Every path a service touches.
///
/// `host_*` paths are as the running system sees them and end up inside
/// generated scripts and link targets. The rest are where this process reads
/// and writes, i.e. the host path under the configured root prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLayout {
    pub service_dir: PathBuf,
    pub log_dir: PathBuf,
    pub env_dir: PathBuf,
    pub run_file: PathBuf,
    pub log_run_file: PathBuf,
    pub link: PathBuf,
    pub host_service_dir: PathBuf,
    pub host_env_dir: PathBuf,
    pub host_log_path: PathBuf,
}

impl ServiceLayout {
    pub fn new(root: &Path, sv_dir: &Path, enablement_dir: &Path, log_dir: &Path, name: &str) -> Self {
        let host_service_dir = sv_dir.join(name);
        let service_dir = under_root(root, &host_service_dir);
        let log = service_dir.join("log");

        Self {
            env_dir: service_dir.join("env"),
            run_file: service_dir.join("run"),
            log_run_file: log.join("run"),
            log_dir: log,
            link: under_root(root, &enablement_dir.join(name)),
            host_env_dir: host_service_dir.join("env"),
            host_log_path: log_dir.join(name),
            service_dir,
            host_service_dir,
        }
    }

    /// Target of the enablement link, with the trailing slash runit tooling uses
    pub fn link_target(&self) -> PathBuf {
        let mut target = self.host_service_dir.clone().into_os_string();
        target.push("/");
        PathBuf::from(target)
    }

    /// Directories that must exist before any script is written, parents first
    pub fn directories(&self) -> [&Path; 3] {
        [
            self.service_dir.as_path(),
            self.log_dir.as_path(),
            self.env_dir.as_path(),
        ]
    }
}

/// Re-anchor an absolute host path below `root`
pub fn under_root(root: &Path, host_path: &Path) -> PathBuf {
    match host_path.strip_prefix("/") {
        Ok(relative) => root.join(relative),
        Err(_) => root.join(host_path),
    }
}
