use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::control::RunStatus;
use crate::fsstate::FileState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A path exists but is not the kind of node the step requires
    #[error("{} already exists as a {found}", .path.display())]
    Conflict { path: PathBuf, found: FileState },

    /// `sv` exited non-zero or timed out
    #[error("sv {verb} {service} failed with exit code {code:?}: {output}")]
    Command {
        verb: String,
        service: String,
        code: Option<i32>,
        output: String,
        status: RunStatus,
    },

    #[error("{op} failed for {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid parameters: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Structured payload reported back to the caller
    pub fn to_failure(&self) -> Failure {
        let mut failure = Failure {
            failed: true,
            msg: self.to_string(),
            path: None,
            rc: None,
            output: None,
            status: None,
        };

        match self {
            Error::Conflict { path, .. } | Error::Io { path, .. } => {
                failure.path = Some(path.clone());
            }
            Error::Command {
                code,
                output,
                status,
                ..
            } => {
                failure.rc = *code;
                failure.output = Some(output.clone());
                failure.status = Some(*status);
            }
            Error::Validation(_) | Error::Config(_) => {}
        }

        failure
    }
}

/// Failure payload, serialized as the result document on error
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub failed: bool,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}
