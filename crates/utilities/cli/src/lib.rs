//! # fbscan-cli
//!
//! Utilities shared by the scanner binaries: logging flags and the tracing subscriber,
//! the Prometheus exporter, backtrace defaults and the clap color scheme.

pub mod backtrace;

mod error;
pub use error::{CliError, CliResult, PrometheusError};

mod log;
pub use log::{LogArgs, init_tracing_subscriber};

mod prometheus;
pub use prometheus::init_prometheus_server;

mod metrics_args;
pub use metrics_args::MetricsArgs;

use clap::builder::{
    Styles,
    styling::{AnsiColor, Color, Style},
};

/// The color scheme used by the binaries' help output.
pub const fn cli_styles() -> Styles {
    Styles::styled()
        .usage(Style::new().bold().underline().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
        .header(Style::new().bold().underline().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
        .literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .invalid(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Red))))
        .error(Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Red))))
        .valid(Style::new().bold().underline().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::White))))
}
