//! The `fbscan` binary: scans the Factoid chain of a factomd node into a SQLite ledger.

mod cli;
mod version;

fn main() {
    use clap::Parser;

    fbscan_cli::backtrace::enable();

    if let Err(err) = cli::Cli::parse().run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
