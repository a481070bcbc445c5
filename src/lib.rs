//! Idempotent configuration of runit-supervised services.
//!
//! A pass creates the service directory tree, writes the run and log/run
//! scripts and env files, toggles the enablement link, and drives the run
//! state through `sv`, reporting whether anything changed.

pub mod attrs;
pub mod cmd;
pub mod config;
pub mod control;
pub mod dirs;
pub mod enable;
pub mod error;
pub mod fsstate;
pub mod params;
pub mod paths;
pub mod reconcile;
pub mod scripts;
pub mod writer;

pub use config::Config;
pub use error::{Error, Failure, Result};
pub use params::{Action, DesiredState, ServiceSpec};
pub use reconcile::{reconcile, Outcome};
