//! Contains the fbscan CLI.

use crate::version;
use anyhow::{Context, Result};
use clap::Parser;
use fbscan_cli::{LogArgs, MetricsArgs, cli_styles};
use fbscan_core::{
    DEFAULT_POLL_INTERVAL, Engine, EngineConfig, NetworkId, RetryPolicy,
};
use fbscan_providers_http::{
    CRYPTOCOMPARE_URL, CryptoCompareClient, DEFAULT_FACTOMD_URL, FactomdClient,
};
use fbscan_storage::StoreOptions;
use fbscan_types::{AddressFilter, FactoidAddress};
use std::{future::Future, path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

/// File name of the store when `--db` is not given.
const DEFAULT_DB_FILE: &str = "fblock-scan.sqlite3";

/// Scans Factoid blocks from a factomd node into a SQLite ledger of transactions and
/// address balances.
#[derive(Parser, Clone, Debug)]
#[command(
    author,
    version = version::SHORT_VERSION,
    long_version = version::LONG_VERSION,
    about,
    styles = cli_styles(),
    long_about = None
)]
pub(crate) struct Cli {
    /// Logging arguments.
    #[command(flatten)]
    pub(crate) log: LogArgs,
    /// Prometheus arguments.
    #[command(flatten)]
    pub(crate) metrics: MetricsArgs,
    /// SQLite database path. Defaults to `~/fblock-scan.sqlite3`.
    #[arg(long, env = "FBSCAN_DB")]
    pub(crate) db: Option<PathBuf>,
    /// URL of the factomd API.
    #[arg(short = 's', long, env = "FACTOMD_URL", default_value = DEFAULT_FACTOMD_URL)]
    pub(crate) factomd: Url,
    /// Network the node must serve: `mainnet`, `testnet` or a hex network id.
    #[arg(long, env = "FBSCAN_NETWORK", default_value = "mainnet")]
    pub(crate) network: NetworkId,
    /// Base URL of the CryptoCompare API.
    #[arg(long = "cryptocompare", env = "CRYPTOCOMPARE_URL", default_value = CRYPTOCOMPARE_URL)]
    pub(crate) cryptocompare: Url,
    /// CryptoCompare API key.
    #[arg(long, env = "CRYPTOCOMPARE_API_KEY")]
    pub(crate) api_key: Option<String>,
    /// Track only these addresses (comma separated list).
    #[arg(long, value_delimiter = ',')]
    pub(crate) whitelist: Vec<FactoidAddress>,
    /// Start scanning from this height if creating a new database.
    #[arg(long = "start-scan", default_value_t = 0)]
    pub(crate) start_scan: u32,
    /// Improve insert speed at the risk of database corruption on crashes.
    #[arg(long)]
    pub(crate) speed: bool,
    /// Stop instead of storing a block without a price once price retries are exhausted.
    #[arg(long)]
    pub(crate) require_price: bool,
    /// Seconds between chain height checks once synced.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    pub(crate) poll_interval: u64,
}

impl Cli {
    /// Runs the scanner until ctrl-c or a fatal error.
    pub(crate) fn run(self) -> Result<()> {
        self.log.init_tracing()?;
        self.metrics.init_metrics()?;

        let config = self.engine_config()?;
        let chain = Arc::new(FactomdClient::new(self.factomd.clone()));
        let prices = Arc::new(CryptoCompareClient::new(self.cryptocompare, self.api_key));
        info!(target: "fbscan", factomd = %self.factomd, "Starting scanner\n{config}");

        Self::run_until_ctrl_c(|cancel| async move {
            let handle = Engine::start(config, chain, prices, cancel).await?;

            let mut synced = handle.synced();
            tokio::spawn(async move {
                let height = synced.wait_for(Option::is_some).await.map(|height| *height);
                if let Ok(Some(height)) = height {
                    info!(target: "fbscan", height, "FBlock scan complete");
                }
            });

            handle.wait().await?;
            Ok(())
        })
    }

    /// Assembles the engine configuration from the flags.
    pub(crate) fn engine_config(&self) -> Result<EngineConfig> {
        let db = match &self.db {
            Some(db) => db.clone(),
            None => dirs::home_dir()
                .context("no home directory, pass --db")?
                .join(DEFAULT_DB_FILE),
        };

        let mut config = EngineConfig::new(db);
        config.store_options = StoreOptions { speed: self.speed };
        config.filter = AddressFilter::from_addresses(self.whitelist.iter().copied());
        config.start_height = self.start_scan;
        config.poll_interval = Duration::from_secs(self.poll_interval.max(1));
        config.network_id = self.network;
        config.require_price = self.require_price;
        config.retry_policy = RetryPolicy::default();
        Ok(config)
    }

    /// Runs the future produced by `f` on a new runtime. Ctrl-c cancels the token handed to
    /// `f`, and the future is expected to wind down and return once it is cancelled.
    pub(crate) fn run_until_ctrl_c<F, Fut>(f: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let rt = Self::tokio_runtime()?;
        rt.block_on(async move {
            let cancel = CancellationToken::new();
            let signal = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => match res {
                        Ok(()) => {
                            info!(target: "fbscan", "Received ctrl-c, shutting down");
                            signal.cancel();
                        }
                        Err(err) => error!(target: "fbscan", %err, "Failed to listen for ctrl-c"),
                    },
                    _ = signal.cancelled() => {}
                }
            });
            f(cancel).await
        })
    }

    /// Creates a new default tokio multi-thread [Runtime](tokio::runtime::Runtime) with all
    /// features enabled
    pub(crate) fn tokio_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
        tokio::runtime::Builder::new_multi_thread().enable_all().build()
    }
}
