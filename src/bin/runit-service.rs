use anyhow::{Context, Result};
use serde::Serialize;
use std::env;
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

use runit_service::control::Sv;
use runit_service::params::{self, ParamsSource};
use runit_service::{reconcile, Config, Error, Outcome};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let source = match args.get(1).map(|s| s.as_str()) {
        Some("help" | "--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(arg) if args.len() == 2 => ParamsSource::from_arg(arg),
        _ => {
            print_usage();
            std::process::exit(2);
        }
    };

    match run(&source) {
        Ok(outcome) => emit(&outcome),
        Err(e) => {
            tracing::error!("{}", e);
            emit(&e.to_failure())?;
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!(
        r#"runit-service - configure a runit service

Usage:
    runit-service <params>   Apply parameters from a YAML or JSON file
    runit-service -          Read parameters from stdin

Parameters:
    name        service name (required)
    state       up | down | once (required)
    enabled     start on boot (default: yes)
    timeout     seconds sv waits for a transition (default: 7)
    command     command to supervise (required unless auto is false)
    user        user the command runs as (default: root)
    env_vars    mapping written to the service's env directory
    action      restart | reload
    auto        generate run scripts (default: yes)
    src_run     run script to install when auto is false
    src_log     log/run script to install when auto is false
    check_mode  report changes without making them

Host settings are read from $RUNIT_SERVICE_CONFIG or /etc/runit-service.toml.
The result is printed to stdout as JSON."#
    );
}

fn run(source: &ParamsSource) -> Result<Outcome, Error> {
    let params = params::load(source)?;
    let check_mode = params.check_mode;
    let spec = params.validate()?;

    let mut config = Config::load()?;
    config.check_mode = check_mode;

    if !check_mode && !nix::unistd::geteuid().is_root() {
        return Err(Error::Config("runit-service must be run as root".into()));
    }

    let sv = Sv::new(config.sv_path()?);
    reconcile(&spec, &config, &sv)
}

fn emit<T: Serialize>(result: &T) -> Result<()> {
    let json = serde_json::to_string(result).context("Failed to serialize result")?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", json).context("Failed to write result")?;
    Ok(())
}
