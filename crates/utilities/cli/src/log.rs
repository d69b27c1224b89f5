//! Logging flags and the tracing subscriber.

use clap::Args;
use tracing::Level;
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, prelude::*};

use crate::CliResult;

/// Logging arguments shared by the binaries.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct LogArgs {
    /// Verbosity level. Repeat to raise it: `-v` info, `-vv` debug, `-vvv` trace.
    #[arg(short = 'v', long = "verbosity", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,
}

impl LogArgs {
    /// The most verbose level enabled by these flags. Warnings are always shown.
    pub const fn level(&self) -> Level {
        match self.verbosity {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    /// Installs the global subscriber for these flags.
    pub fn init_tracing(&self) -> CliResult<()> {
        init_tracing_subscriber(self.verbosity, None::<EnvFilter>)
    }
}

/// Installs a `fmt` subscriber on stderr.
///
/// `verbosity` sets the default level as in [`LogArgs::level`]. Directives from `filter`,
/// or from `RUST_LOG` when no filter is given, take precedence over it.
pub fn init_tracing_subscriber(
    verbosity: u8,
    filter: Option<impl Into<EnvFilter>>,
) -> CliResult<()> {
    let level = LogArgs { verbosity }.level();
    let filter = match filter {
        Some(filter) => filter.into(),
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(level).into())
            .from_env_lossy(),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .try_init()?;
    Ok(())
}
