//! Run-state control through runit's `sv`.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::cmd::{self, Output};
use crate::error::{Error, Result};
use crate::params::{Action, DesiredState};

/// Service state as reported by `sv status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Down,
    Unknown,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Running => "running",
            RunStatus::Down => "down",
            RunStatus::Unknown => "unknown",
        })
    }
}

/// Classify the first line of `sv status` output, e.g.
/// `run: web: (pid 123) 10s; run: log: (pid 124) 10s`
pub fn parse_status(output: &str) -> RunStatus {
    let token = output
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().next())
        .map(|t| t.to_lowercase());

    match token.as_deref().map(|t| t.strip_suffix(':').unwrap_or(t)) {
        Some("run") => RunStatus::Running,
        Some("down") => RunStatus::Down,
        _ => RunStatus::Unknown,
    }
}

/// State-changing `sv` verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Up,
    Down,
    Once,
    Restart,
    Reload,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Up => "up",
            Verb::Down => "down",
            Verb::Once => "once",
            Verb::Restart => "restart",
            Verb::Reload => "reload",
        }
    }
}

impl From<Action> for Verb {
    fn from(action: Action) -> Self {
        match action {
            Action::Restart => Verb::Restart,
            Action::Reload => Verb::Reload,
        }
    }
}

/// The control utility, behind a trait so the transition logic can be driven
/// without a live runsvdir
pub trait Supervisor {
    /// `sv status <service>`
    fn status(&self, service: &str) -> Result<Output>;

    /// `sv -w <timeout> <verb> <service>`
    fn control(&self, verb: Verb, service: &str, timeout: u64) -> Result<Output>;
}

/// The real `sv` binary
#[derive(Debug, Clone)]
pub struct Sv {
    bin: PathBuf,
}

impl Sv {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

impl Supervisor for Sv {
    fn status(&self, service: &str) -> Result<Output> {
        cmd::capture(&self.bin, ["status", service])
    }

    fn control(&self, verb: Verb, service: &str, timeout: u64) -> Result<Output> {
        let timeout = timeout.to_string();
        cmd::capture(&self.bin, ["-w", timeout.as_str(), verb.as_str(), service])
    }
}

/// Result of driving a service toward its desired state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateOutcome {
    pub changed: bool,
    pub status: RunStatus,
}

/// Current status. A non-zero exit (service not supervised yet, runsv gone)
/// is `Unknown`, not an error.
pub fn query(supervisor: &dyn Supervisor, service: &str) -> Result<RunStatus> {
    let output = supervisor.status(service)?;
    let status = parse_status(&output.stdout);
    tracing::debug!("{} status: {}", service, status);
    Ok(status)
}

/// The transition, if any, needed to move from `status` toward `desired`
pub fn transition(desired: DesiredState, status: RunStatus) -> Option<Verb> {
    match desired {
        DesiredState::Up if status != RunStatus::Running => Some(Verb::Up),
        DesiredState::Down if status != RunStatus::Down => Some(Verb::Down),
        DesiredState::Once if status != RunStatus::Running => Some(Verb::Once),
        _ => None,
    }
}

/// The requested action verb, if it applies to the desired state
pub fn action_verb(desired: DesiredState, action: Option<Action>) -> Option<Verb> {
    let action = action?;
    let applies = match action {
        Action::Restart => matches!(desired, DesiredState::Up | DesiredState::Once),
        Action::Reload => desired == DesiredState::Up,
    };
    applies.then(|| Verb::from(action))
}

/// Issue the minimal transitions to reach `desired`, then the requested
/// action. Status is re-queried after every command; any failing command
/// aborts with its exit code, output and last known status.
///
/// A disabled service still gets its state transition while runsv is around
/// to take it (removing the link does not stop the service). Actions are only
/// sent to enabled services, and nothing is sent once the status is unknown.
pub fn reconcile_state(
    supervisor: &dyn Supervisor,
    service: &str,
    enabled: bool,
    desired: DesiredState,
    action: Option<Action>,
    timeout: u64,
    check_mode: bool,
) -> Result<StateOutcome> {
    let mut status = query(supervisor, service)?;

    let verbs: Vec<Verb> = if enabled {
        transition(desired, status)
            .into_iter()
            .chain(action_verb(desired, action))
            .collect()
    } else if status == RunStatus::Unknown {
        tracing::debug!("{} is disabled and not supervised", service);
        Vec::new()
    } else {
        transition(desired, status).into_iter().collect()
    };

    if verbs.is_empty() {
        return Ok(StateOutcome {
            changed: false,
            status,
        });
    }

    if check_mode {
        for verb in &verbs {
            tracing::info!("would run sv {} {}", verb.as_str(), service);
        }
        return Ok(StateOutcome {
            changed: true,
            status,
        });
    }

    for verb in verbs {
        status = issue(supervisor, verb, service, timeout, status)?;
    }

    Ok(StateOutcome {
        changed: true,
        status,
    })
}

fn issue(
    supervisor: &dyn Supervisor,
    verb: Verb,
    service: &str,
    timeout: u64,
    last_status: RunStatus,
) -> Result<RunStatus> {
    tracing::info!("sv {} {} (timeout {}s)", verb.as_str(), service, timeout);
    let output = supervisor.control(verb, service, timeout)?;

    if !output.success() {
        let status = query(supervisor, service).unwrap_or(last_status);
        return Err(Error::Command {
            verb: verb.as_str().into(),
            service: service.into(),
            code: output.code,
            output: output.combined(),
            status,
        });
    }

    query(supervisor, service)
}

/// Scripted stand-in for `sv`, shared with the reconcile tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::RefCell;

    pub struct FakeSv {
        status: RefCell<RunStatus>,
        pub calls: RefCell<Vec<String>>,
        pub fail_verb: Option<Verb>,
    }

    impl FakeSv {
        pub fn new(status: RunStatus) -> Self {
            Self {
                status: RefCell::new(status),
                calls: RefCell::new(Vec::new()),
                fail_verb: None,
            }
        }

        pub fn set_status(&self, status: RunStatus) {
            *self.status.borrow_mut() = status;
        }

        /// Everything except status queries
        pub fn control_calls(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .filter(|c| !c.starts_with("status"))
                .cloned()
                .collect()
        }
    }

    impl Supervisor for FakeSv {
        fn status(&self, service: &str) -> Result<Output> {
            self.calls.borrow_mut().push(format!("status {}", service));
            let stdout = match *self.status.borrow() {
                RunStatus::Running => format!("run: {}: (pid 100) 5s; run: log: (pid 99) 5s\n", service),
                RunStatus::Down => format!("down: {}: 3s, normally up\n", service),
                RunStatus::Unknown => String::new(),
            };
            let code = if *self.status.borrow() == RunStatus::Unknown { 1 } else { 0 };
            Ok(Output {
                code: Some(code),
                stdout,
                stderr: String::new(),
            })
        }

        fn control(&self, verb: Verb, service: &str, timeout: u64) -> Result<Output> {
            self.calls
                .borrow_mut()
                .push(format!("-w {} {} {}", timeout, verb.as_str(), service));

            if self.fail_verb == Some(verb) {
                return Ok(Output {
                    code: Some(1),
                    stdout: format!("timeout: down: {}: 1s\n", service),
                    stderr: String::new(),
                });
            }

            match verb {
                Verb::Up | Verb::Once | Verb::Restart => self.set_status(RunStatus::Running),
                Verb::Down => self.set_status(RunStatus::Down),
                Verb::Reload => {}
            }
            Ok(Output {
                code: Some(0),
                stdout: format!("ok: run: {}\n", service),
                stderr: String::new(),
            })
        }
    }
}
