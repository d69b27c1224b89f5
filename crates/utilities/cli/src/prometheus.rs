//! Utilities for spinning up a prometheus metrics server.

use crate::PrometheusError;
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_process::Collector;
use std::{
    net::{IpAddr, SocketAddr},
    thread::{self, sleep},
    time::Duration,
};
use tracing::info;

/// Interval between process metric samples.
const PROCESS_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Installs the global Prometheus recorder and serves it over HTTP at `addr:port`.
///
/// A `port` of zero leaves metrics disabled and returns `None`.
pub fn init_prometheus_server(
    addr: IpAddr,
    port: u16,
) -> Result<Option<SocketAddr>, PrometheusError> {
    if port == 0 {
        return Ok(None);
    }

    let listen = SocketAddr::from((addr, port));
    PrometheusBuilder::new().with_http_listener(listen).install()?;

    // Process metrics such as CPU and memory usage.
    let collector = Collector::default();
    collector.describe();
    thread::spawn(move || {
        loop {
            collector.collect();
            sleep(PROCESS_SAMPLE_INTERVAL);
        }
    });

    info!(target: "prometheus", "Serving metrics at: http://{listen}");
    Ok(Some(listen))
}
