//! Prometheus exporter flags.

use crate::{PrometheusError, init_prometheus_server};
use clap::Args;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Where to serve Prometheus metrics.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct MetricsArgs {
    /// Port of the metrics endpoint. 0 disables it.
    #[arg(long = "metrics.port", default_value_t = 0, env = "FBSCAN_METRICS_PORT")]
    pub port: u16,
    /// Address the metrics endpoint binds to.
    #[arg(long = "metrics.addr", default_value = "0.0.0.0", env = "FBSCAN_METRICS_ADDR")]
    pub addr: IpAddr,
}

impl Default for MetricsArgs {
    fn default() -> Self {
        Self { port: 0, addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED) }
    }
}

impl MetricsArgs {
    /// Starts the exporter if a port is set.
    pub fn init_metrics(&self) -> Result<Option<SocketAddr>, PrometheusError> {
        init_prometheus_server(self.addr, self.port)
    }
}
