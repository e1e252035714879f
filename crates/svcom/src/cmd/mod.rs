use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod demo;
pub mod doctor;
pub mod envinfo;
mod scenario;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an in-process provider/consumer scenario and report the results.
    Demo(DemoArgs),
    /// Publish a demo event stream and print every value a consumer receives.
    Watch(WatchArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local runtime self-checks.
    Doctor(DoctorArgs),
    /// Print build and environment diagnostics.
    Envinfo(EnvinfoArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Demo(args) => demo::run(args, format),
        Command::Watch(args) => watch::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, format),
        Command::Envinfo(args) => envinfo::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Number of consumers.
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u16).range(1..))]
    pub clients: u16,
    /// Event updates published after every consumer subscribed.
    #[arg(long, default_value = "5")]
    pub updates: u32,
    /// Method calls made by each consumer.
    #[arg(long, default_value = "2")]
    pub calls: u32,
    /// Maximum time to wait for each step (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Delay between published values (e.g. 1s, 200ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Exit after receiving N values.
    #[arg(long)]
    pub count: Option<usize>,
    /// Service instance the demo provider offers.
    #[arg(long, default_value = "local")]
    pub instance: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

#[derive(Args, Debug, Default)]
pub struct EnvinfoArgs {}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
