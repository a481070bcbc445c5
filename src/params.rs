//! Caller parameters: loading, loose-typed decoding, and validation into a
//! [`ServiceSpec`] before anything on the host is touched.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT: u64 = 7;
pub const MAX_TIMEOUT: u64 = 3600;
pub const DEFAULT_USER: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Up,
    Down,
    Once,
}

impl DesiredState {
    pub fn name(&self) -> &'static str {
        match self {
            DesiredState::Up => "up",
            DesiredState::Down => "down",
            DesiredState::Once => "once",
        }
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Restart,
    Reload,
}

/// Where the run and log/run script content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// Generated from the command and user
    Generated { command: String },
    /// Supplied verbatim by the caller, already rendered
    Custom { run: Vec<u8>, log: Vec<u8> },
}

/// A validated service request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub user: String,
    pub env: IndexMap<String, String>,
    pub timeout: u64,
    pub enabled: bool,
    pub state: DesiredState,
    pub action: Option<Action>,
    pub script: ScriptSource,
}

impl ServiceSpec {
    /// Spec for a generated-script service with every default applied
    pub fn new(name: impl Into<String>, command: impl Into<String>, state: DesiredState) -> Self {
        Self {
            name: name.into(),
            user: DEFAULT_USER.into(),
            env: IndexMap::new(),
            timeout: DEFAULT_TIMEOUT,
            enabled: true,
            state,
            action: None,
            script: ScriptSource::Generated {
                command: command.into(),
            },
        }
    }
}

/// Parameters as the caller sends them
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub name: String,
    pub state: DesiredState,
    #[serde(default = "default_true", deserialize_with = "loose_bool")]
    pub enabled: bool,
    #[serde(default = "default_timeout", deserialize_with = "loose_u64")]
    pub timeout: u64,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Values are kept as written; a YAML `1.0` stays `1.0`
    #[serde(default)]
    pub env_vars: Option<IndexMap<String, String>>,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default = "default_true", deserialize_with = "loose_bool")]
    pub auto: bool,
    #[serde(default)]
    pub src_run: Option<PathBuf>,
    #[serde(default)]
    pub src_log: Option<PathBuf>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub check_mode: bool,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

fn loose_bool<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    match Loose::deserialize(deserializer)? {
        Loose::Bool(b) => Ok(b),
        Loose::Int(i) => Ok(i != 0),
        Loose::Str(s) => match s.to_lowercase().as_str() {
            "yes" | "true" | "on" | "1" | "y" => Ok(true),
            "no" | "false" | "off" | "0" | "n" => Ok(false),
            other => Err(serde::de::Error::custom(format!("not a boolean: {}", other))),
        },
    }
}

fn loose_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Int(u64),
        Str(String),
    }

    match Loose::deserialize(deserializer)? {
        Loose::Int(n) => Ok(n),
        Loose::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("not a number of seconds: {}", s))),
    }
}

/// Input source for parameters
#[derive(Debug, Clone)]
pub enum ParamsSource {
    File(PathBuf),
    Stdin,
}

impl ParamsSource {
    /// Parse from command line argument; `-` means stdin
    pub fn from_arg(arg: &str) -> Self {
        match arg {
            "-" => Self::Stdin,
            path => Self::File(PathBuf::from(path)),
        }
    }
}

/// Read and decode parameters (YAML or JSON)
pub fn load(source: &ParamsSource) -> Result<Params> {
    let content = match source {
        ParamsSource::File(path) => {
            fs::read_to_string(path).map_err(|e| Error::io("read parameters", path, e))?
        }
        ParamsSource::Stdin => {
            let mut content = String::new();
            io::stdin()
                .read_to_string(&mut content)
                .map_err(|e| Error::io("read parameters", "<stdin>", e))?;
            content
        }
    };
    parse_auto(&content)
}

/// Auto-detect format and parse
pub fn parse_auto(content: &str) -> Result<Params> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') {
        let mut value: serde_json::Value =
            serde_json::from_str(trimmed).map_err(|e| Error::validation(e.to_string()))?;
        stringify_env_values(&mut value);
        serde_json::from_value(value).map_err(|e| Error::validation(e.to_string()))
    } else {
        // YAML hands plain scalars to string fields as their source text
        serde_yaml::from_str(content).map_err(|e| Error::validation(e.to_string()))
    }
}

/// JSON numbers and booleans in `env_vars` become their printed form
fn stringify_env_values(value: &mut serde_json::Value) {
    let Some(env) = value.get_mut("env_vars").and_then(|v| v.as_object_mut()) else {
        return;
    };
    for v in env.values_mut() {
        let text = match v {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        *v = serde_json::Value::String(text);
    }
}

impl Params {
    /// Check every field and read custom script sources. Nothing on the host
    /// is modified here.
    pub fn validate(self) -> Result<ServiceSpec> {
        validate_name(&self.name)?;

        let user = self.user.unwrap_or_else(|| DEFAULT_USER.into());
        validate_user(&user)?;

        if self.timeout == 0 || self.timeout > MAX_TIMEOUT {
            return Err(Error::validation(format!(
                "timeout must be between 1 and {} seconds, got {}",
                MAX_TIMEOUT, self.timeout
            )));
        }

        let mut env = IndexMap::new();
        for (key, value) in self.env_vars.unwrap_or_default() {
            validate_env(&key, &value)?;
            env.insert(key, value);
        }

        let script = if self.auto {
            let command = self
                .command
                .ok_or_else(|| Error::validation("command is required when auto is enabled"))?;
            validate_command(&command)?;
            ScriptSource::Generated { command }
        } else {
            let (run_src, log_src) = match (self.src_run, self.src_log) {
                (Some(run), Some(log)) => (run, log),
                _ => return Err(Error::validation("src_run and src_log are required")),
            };
            ScriptSource::Custom {
                run: read_source(&run_src)?,
                log: read_source(&log_src)?,
            }
        };

        Ok(ServiceSpec {
            name: self.name,
            user,
            env,
            timeout: self.timeout,
            enabled: self.enabled,
            state: self.state,
            action: self.action,
            script,
        })
    }
}

fn read_source(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::validation(format!("cannot read {}: {}", path.display(), e)))
}

/// Service names become path segments and appear in scripts
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::validation(format!("invalid service name {:?}", name)));
    }
    if name.starts_with('-') {
        return Err(Error::validation(format!(
            "service name must not start with '-': {:?}",
            name
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@')))
    {
        return Err(Error::validation(format!(
            "service name {:?} contains disallowed character {:?}",
            name, c
        )));
    }
    Ok(())
}

pub fn validate_user(user: &str) -> Result<()> {
    let valid = !user.is_empty()
        && !user.starts_with('-')
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!("invalid user {:?}", user)))
    }
}

/// The command lands on a single `exec` line; anything that could end that
/// line or hide in it is refused.
pub fn validate_command(command: &str) -> Result<()> {
    if command.trim().is_empty() {
        return Err(Error::validation("command must not be empty"));
    }
    if command.chars().any(|c| c.is_control() && c != '\t') {
        return Err(Error::validation(
            "command must not contain newlines or control characters",
        ));
    }
    Ok(())
}

pub fn validate_env(key: &str, value: &str) -> Result<()> {
    let mut chars = key.chars();
    let key_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !key_ok {
        return Err(Error::validation(format!(
            "invalid environment variable name {:?}",
            key
        )));
    }
    if value.contains(['\0', '\n']) {
        return Err(Error::validation(format!(
            "value of {} must be a single line",
            key
        )));
    }
    Ok(())
}
