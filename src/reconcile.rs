//! One idempotent pass: directories, scripts, env, enablement, run state.

use serde::Serialize;
use std::path::PathBuf;

use crate::config::Config;
use crate::control::{self, RunStatus, Supervisor};
use crate::dirs;
use crate::enable;
use crate::error::Result;
use crate::params::{DesiredState, ServiceSpec};
use crate::scripts::{self, Scripts};
use crate::writer;

/// Result document for a successful pass
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub changed: bool,
    pub name: String,
    pub state: DesiredState,
    pub enabled: bool,
    pub status: RunStatus,
    pub run_service_file: PathBuf,
    pub log_service_file: PathBuf,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub check_mode: bool,
}

/// Bring the service named by `spec` to its declared state.
///
/// Every stage reports whether it changed anything; the first failure aborts
/// the pass. Re-running after a failure is safe.
pub fn reconcile(spec: &ServiceSpec, config: &Config, supervisor: &dyn Supervisor) -> Result<Outcome> {
    let layout = config.layout(&spec.name);
    let walk = config.walk_options();
    let check_mode = config.check_mode;
    let mut changed = false;

    tracing::info!(
        "reconciling {} (state={}, enabled={})",
        spec.name,
        spec.state,
        spec.enabled
    );

    for dir in layout.directories() {
        changed |= dirs::ensure_directory(dir, &config.attrs, &walk)?;
    }

    let scripts = Scripts::for_spec(spec, config, &layout);
    changed |= writer::write_if_changed(&scripts.run, &layout.run_file, &config.attrs, check_mode)?;
    changed |= writer::write_if_changed(&scripts.log, &layout.log_run_file, &config.attrs, check_mode)?;
    changed |= scripts::sync_env_dir(&layout.env_dir, &spec.env, &config.attrs, check_mode)?;

    changed |= enable::set_enabled(spec.enabled, &layout.link_target(), &layout.link, check_mode)?;

    let state = control::reconcile_state(
        supervisor,
        &spec.name,
        spec.enabled,
        spec.state,
        spec.action,
        spec.timeout,
        check_mode,
    )?;
    changed |= state.changed;

    tracing::info!("{}: changed={} status={}", spec.name, changed, state.status);

    Ok(Outcome {
        changed,
        name: spec.name.clone(),
        state: spec.state,
        enabled: spec.enabled,
        status: state.status,
        run_service_file: layout.run_file,
        log_service_file: layout.log_run_file,
        check_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::Attrs;
    use crate::control::fake::FakeSv;
    use crate::error::Error;
    use crate::fsstate::{self, FileState};
    use crate::params::{Action, ScriptSource};
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;

    fn test_config(root: &Path) -> Config {
        let mut config = Config::with_root(root);
        if !nix::unistd::Uid::effective().is_root() {
            config.attrs = Attrs {
                uid: None,
                gid: None,
                mode: Some(0o755),
            };
        }
        config
    }

    fn web_spec() -> ServiceSpec {
        let mut spec = ServiceSpec::new("web", "/usr/bin/webserver", DesiredState::Up);
        spec.user = "www".into();
        spec
    }

    fn assert_policy(path: &Path) {
        let meta = fs::symlink_metadata(path).unwrap();
        assert!(meta.is_dir() || meta.is_file(), "{}", path.display());
        assert_eq!(meta.mode() & 0o7777, 0o755, "{}", path.display());
        if nix::unistd::Uid::effective().is_root() {
            assert_eq!((meta.uid(), meta.gid()), (0, 0), "{}", path.display());
        }
    }

    #[test]
    fn fresh_host_gets_full_service() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let sv = FakeSv::new(RunStatus::Unknown);

        let outcome = reconcile(&web_spec(), &config, &sv).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.status, RunStatus::Running);

        let sv_dir = root.path().join("etc/sv/web");
        for dir in ["", "log", "env"] {
            assert_policy(&sv_dir.join(dir));
        }
        assert_policy(&sv_dir.join("run"));
        assert_policy(&sv_dir.join("log/run"));

        let run = fs::read_to_string(sv_dir.join("run")).unwrap();
        assert!(run.contains("exec chpst -e /etc/sv/web/env -u www /usr/bin/webserver\n"));

        let link = root.path().join("etc/service/web");
        assert_eq!(fsstate::classify(&link).unwrap(), FileState::Symlink);
        assert_eq!(fs::read_link(&link).unwrap().to_str(), Some("/etc/sv/web/"));

        assert_eq!(sv.control_calls(), vec!["-w 7 up web"]);
        assert_eq!(outcome.run_service_file, sv_dir.join("run"));
        assert_eq!(outcome.log_service_file, sv_dir.join("log/run"));
    }

    #[test]
    fn second_pass_changes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let sv = FakeSv::new(RunStatus::Unknown);

        assert!(reconcile(&web_spec(), &config, &sv).unwrap().changed);
        sv.calls.borrow_mut().clear();

        let outcome = reconcile(&web_spec(), &config, &sv).unwrap();
        assert!(!outcome.changed);
        assert_eq!(*sv.calls.borrow(), vec!["status web"]);
    }

    #[test]
    fn file_in_place_of_service_dir_aborts_untouched() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let sv_parent = root.path().join("etc/sv");
        fs::create_dir_all(&sv_parent).unwrap();
        fs::write(sv_parent.join("myservice"), "oops").unwrap();

        let sv = FakeSv::new(RunStatus::Unknown);
        let spec = ServiceSpec::new("myservice", "/bin/true", DesiredState::Up);
        let err = reconcile(&spec, &config, &sv).unwrap_err();

        assert!(matches!(err, Error::Conflict { found: FileState::File, .. }));
        assert_eq!(fs::read_to_string(sv_parent.join("myservice")).unwrap(), "oops");
        assert!(!root.path().join("etc/service").exists());
        assert!(sv.calls.borrow().is_empty());
    }

    #[test]
    fn env_vars_become_files() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let sv = FakeSv::new(RunStatus::Running);
        let mut spec = web_spec();
        spec.env.insert("PORT".into(), "8080".into());

        reconcile(&spec, &config, &sv).unwrap();
        let env_file = root.path().join("etc/sv/web/env/PORT");
        assert_eq!(fs::read_to_string(env_file).unwrap(), "8080");

        spec.env.clear();
        assert!(reconcile(&spec, &config, &sv).unwrap().changed);
        assert!(!root.path().join("etc/sv/web/env/PORT").exists());
    }

    #[test]
    fn changed_command_rewrites_run_script_only() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let sv = FakeSv::new(RunStatus::Running);

        reconcile(&web_spec(), &config, &sv).unwrap();
        let log_before = fs::read(root.path().join("etc/sv/web/log/run")).unwrap();

        let mut spec = web_spec();
        spec.script = ScriptSource::Generated {
            command: "/usr/bin/webserver --verbose".into(),
        };
        assert!(reconcile(&spec, &config, &sv).unwrap().changed);

        let run = fs::read_to_string(root.path().join("etc/sv/web/run")).unwrap();
        assert!(run.ends_with("/usr/bin/webserver --verbose\n"));
        assert_eq!(fs::read(root.path().join("etc/sv/web/log/run")).unwrap(), log_before);
    }

    #[test]
    fn disabling_removes_link_and_stops_service() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let sv = FakeSv::new(RunStatus::Running);

        reconcile(&web_spec(), &config, &sv).unwrap();
        sv.calls.borrow_mut().clear();

        let mut spec = web_spec();
        spec.enabled = false;
        spec.state = DesiredState::Down;
        assert!(reconcile(&spec, &config, &sv).unwrap().changed);

        let link = root.path().join("etc/service/web");
        assert_eq!(fsstate::classify(&link).unwrap(), FileState::Absent);
        assert_eq!(sv.control_calls(), vec!["-w 7 down web"]);
    }

    #[test]
    fn custom_scripts_are_installed_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let sv = FakeSv::new(RunStatus::Running);

        let mut spec = web_spec();
        spec.script = ScriptSource::Custom {
            run: b"#!/bin/sh\nexec /opt/app/start\n".to_vec(),
            log: b"#!/bin/sh\nexec logger -t app\n".to_vec(),
        };

        let outcome = reconcile(&spec, &config, &sv).unwrap();
        assert_eq!(
            fs::read_to_string(&outcome.run_service_file).unwrap(),
            "#!/bin/sh\nexec /opt/app/start\n"
        );
        assert_eq!(
            fs::read_to_string(&outcome.log_service_file).unwrap(),
            "#!/bin/sh\nexec logger -t app\n"
        );
    }

    #[test]
    fn check_mode_touches_nothing() {
        let root = tempfile::tempdir().unwrap();
        let mut config = test_config(root.path());
        config.check_mode = true;
        let sv = FakeSv::new(RunStatus::Down);

        let mut spec = web_spec();
        spec.env.insert("PORT".into(), "80".into());
        spec.action = Some(Action::Restart);

        let outcome = reconcile(&spec, &config, &sv).unwrap();
        assert!(outcome.changed);
        assert!(outcome.check_mode);
        assert!(!root.path().join("etc").exists());
        assert!(sv.control_calls().is_empty());
    }

    #[test]
    fn outcome_serializes_for_the_caller() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let sv = FakeSv::new(RunStatus::Running);

        let outcome = reconcile(&web_spec(), &config, &sv).unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["state"], "up");
        assert_eq!(json["status"], "running");
        assert_eq!(json["name"], "web");
        assert!(json["run_service_file"].as_str().unwrap().ends_with("etc/sv/web/run"));
        assert!(json.get("check_mode").is_none());
    }
}
